use crate::error::{Result, ShipgateError};
use crate::version::{IncrementKind, VersionIncrementer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ReleaseStrategyConfig
// ---------------------------------------------------------------------------

/// How release membership is determined and which next-release artifact is
/// managed. Name patterns support a single `{{version}}` placeholder; a
/// pattern without it yields the same name every release and is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseStrategyConfig {
    /// Diff previous → current git tag.
    Tag {
        #[serde(default = "default_tag_pattern")]
        pattern: String,
        #[serde(default)]
        auto_create: bool,
        #[serde(default)]
        cleanup: bool,
        #[serde(default)]
        open_next_request: bool,
    },
    /// PRs merged to a release branch vs. a base branch.
    Branch {
        #[serde(default = "default_branch_pattern")]
        pattern: String,
        #[serde(default = "default_base_branch")]
        base_branch: String,
        #[serde(default)]
        auto_create: bool,
        #[serde(default)]
        cleanup: bool,
        #[serde(default)]
        open_next_request: bool,
    },
    /// PRs carrying a release label.
    Label {
        #[serde(default = "default_label_pattern")]
        pattern: String,
        #[serde(default)]
        auto_create: bool,
        #[serde(default)]
        cleanup: bool,
        #[serde(default)]
        open_next_request: bool,
    },
    /// PRs assigned to a release milestone.
    Milestone {
        #[serde(default = "default_milestone_pattern")]
        pattern: String,
        #[serde(default)]
        auto_create: bool,
        #[serde(default)]
        cleanup: bool,
        #[serde(default)]
        open_next_request: bool,
    },
}

fn default_tag_pattern() -> String {
    "v{{version}}".to_string()
}

fn default_branch_pattern() -> String {
    "release/{{version}}".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_label_pattern() -> String {
    "release:{{version}}".to_string()
}

fn default_milestone_pattern() -> String {
    "{{version}}".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Tag,
    Branch,
    Label,
    Milestone,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Tag => "tag",
            StrategyKind::Branch => "branch",
            StrategyKind::Label => "label",
            StrategyKind::Milestone => "milestone",
        };
        f.write_str(s)
    }
}

impl ReleaseStrategyConfig {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ReleaseStrategyConfig::Tag { .. } => StrategyKind::Tag,
            ReleaseStrategyConfig::Branch { .. } => StrategyKind::Branch,
            ReleaseStrategyConfig::Label { .. } => StrategyKind::Label,
            ReleaseStrategyConfig::Milestone { .. } => StrategyKind::Milestone,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            ReleaseStrategyConfig::Tag { pattern, .. }
            | ReleaseStrategyConfig::Branch { pattern, .. }
            | ReleaseStrategyConfig::Label { pattern, .. }
            | ReleaseStrategyConfig::Milestone { pattern, .. } => pattern,
        }
    }

    pub fn auto_create(&self) -> bool {
        match self {
            ReleaseStrategyConfig::Tag { auto_create, .. }
            | ReleaseStrategyConfig::Branch { auto_create, .. }
            | ReleaseStrategyConfig::Label { auto_create, .. }
            | ReleaseStrategyConfig::Milestone { auto_create, .. } => *auto_create,
        }
    }

    pub fn cleanup(&self) -> bool {
        match self {
            ReleaseStrategyConfig::Tag { cleanup, .. }
            | ReleaseStrategyConfig::Branch { cleanup, .. }
            | ReleaseStrategyConfig::Label { cleanup, .. }
            | ReleaseStrategyConfig::Milestone { cleanup, .. } => *cleanup,
        }
    }

    pub fn open_next_request(&self) -> bool {
        match self {
            ReleaseStrategyConfig::Tag { open_next_request, .. }
            | ReleaseStrategyConfig::Branch { open_next_request, .. }
            | ReleaseStrategyConfig::Label { open_next_request, .. }
            | ReleaseStrategyConfig::Milestone { open_next_request, .. } => *open_next_request,
        }
    }

    /// Render the artifact name for a concrete version.
    pub fn identifier(&self, version: &str) -> String {
        render_pattern(self.pattern(), version)
    }
}

// ---------------------------------------------------------------------------
// Pattern rendering / matching
// ---------------------------------------------------------------------------

pub const VERSION_PLACEHOLDER: &str = "{{version}}";

/// Substitute the `{{version}}` placeholder literally. A pattern without the
/// placeholder renders to itself.
pub fn render_pattern(pattern: &str, version: &str) -> String {
    pattern.replace(VERSION_PLACEHOLDER, version)
}

/// Compile a name pattern into an anchored matcher, with the placeholder
/// matching any non-empty version string.
pub fn pattern_matcher(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern);
    let placeholder = regex::escape(VERSION_PLACEHOLDER);
    let body = escaped.replace(&placeholder, "(.+)");
    Regex::new(&format!("^{body}$")).map_err(|e| ShipgateError::Collaborator {
        operation: format!("compiling pattern '{pattern}'"),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Release contents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// What belongs to "this release" under the configured strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseContents {
    pub strategy: StrategyKind,
    pub identifier: String,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

impl ReleaseContents {
    pub fn empty(strategy: StrategyKind, identifier: impl Into<String>) -> Self {
        Self {
            strategy,
            identifier: identifier.into(),
            pull_requests: Vec::new(),
            commits: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ReleaseTracker
// ---------------------------------------------------------------------------

/// Collaborator performing the per-strategy queries and mutations against
/// the hosting platform.
pub trait ReleaseTracker {
    /// Fetch the PRs/commits belonging to the release named `identifier`.
    /// `previous` is the prior release ref where the strategy needs one
    /// (tag diffs).
    fn release_contents(
        &self,
        strategy: &ReleaseStrategyConfig,
        identifier: &str,
        previous: Option<&str>,
    ) -> Result<ReleaseContents>;

    /// Create the next-release artifact (branch, label, or milestone).
    fn create_next_artifact(
        &self,
        strategy: &ReleaseStrategyConfig,
        identifier: &str,
    ) -> Result<()>;

    /// Delete/close the completed release's artifact and detach its PRs.
    fn cleanup(
        &self,
        strategy: &ReleaseStrategyConfig,
        identifier: &str,
        contents: &ReleaseContents,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ReleaseManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReleaseOutcome {
    pub cleaned_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_identifier: Option<String>,
    pub open_next_request: bool,
}

pub struct ReleaseManager<'a> {
    strategy: &'a ReleaseStrategyConfig,
    tracker: &'a dyn ReleaseTracker,
    versions: &'a dyn VersionIncrementer,
}

impl<'a> ReleaseManager<'a> {
    pub fn new(
        strategy: &'a ReleaseStrategyConfig,
        tracker: &'a dyn ReleaseTracker,
        versions: &'a dyn VersionIncrementer,
    ) -> Self {
        Self {
            strategy,
            tracker,
            versions,
        }
    }

    /// The contents of the release for `version`. Collaborator query errors
    /// degrade to empty contents rather than aborting the pipeline.
    pub fn contents(&self, version: &str, previous: Option<&str>) -> ReleaseContents {
        let identifier = self.strategy.identifier(version);
        match self
            .tracker
            .release_contents(self.strategy, &identifier, previous)
        {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(
                    %identifier,
                    error = %e,
                    "release contents query failed, treating release as empty"
                );
                ReleaseContents::empty(self.strategy.kind(), identifier)
            }
        }
    }

    /// Completion side effects for a released version: best-effort cleanup,
    /// then next-artifact creation when `auto_create` is set.
    ///
    /// Cleanup failures are logged and swallowed. Version computation and
    /// artifact creation failures propagate: a half-created next release is
    /// worse than a retryable one.
    pub fn finalize(
        &self,
        version: &str,
        previous: Option<&str>,
        increment: IncrementKind,
    ) -> Result<ReleaseOutcome> {
        let identifier = self.strategy.identifier(version);
        let mut cleaned_up = false;

        if self.strategy.cleanup() {
            let contents = self.contents(version, previous);
            match self.tracker.cleanup(self.strategy, &identifier, &contents) {
                Ok(()) => cleaned_up = true,
                Err(e) => {
                    tracing::warn!(%identifier, error = %e, "release cleanup failed");
                }
            }
        }

        let mut next_version = None;
        let mut next_identifier = None;
        if self.strategy.auto_create() {
            let next = self.versions.next_version(version, increment)?;
            // The tag strategy creates nothing here: tags are produced by the
            // pipeline's own create_tag stages.
            if self.strategy.kind() != StrategyKind::Tag {
                let id = self.strategy.identifier(&next);
                self.tracker.create_next_artifact(self.strategy, &id)?;
                next_identifier = Some(id);
            }
            next_version = Some(next);
        }

        let open_next_request = self.strategy.open_next_request() && next_version.is_some();
        Ok(ReleaseOutcome {
            cleaned_up,
            next_version,
            next_identifier,
            open_next_request,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SemverIncrementer;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeTracker {
        contents_error: bool,
        cleanup_error: bool,
        create_error: bool,
        created: RefCell<Vec<String>>,
        cleaned: RefCell<Vec<String>>,
    }

    impl ReleaseTracker for FakeTracker {
        fn release_contents(
            &self,
            strategy: &ReleaseStrategyConfig,
            identifier: &str,
            _previous: Option<&str>,
        ) -> Result<ReleaseContents> {
            if self.contents_error {
                return Err(ShipgateError::Collaborator {
                    operation: "listing pull requests".to_string(),
                    reason: "rate limited".to_string(),
                });
            }
            Ok(ReleaseContents {
                strategy: strategy.kind(),
                identifier: identifier.to_string(),
                pull_requests: vec![PullRequest {
                    number: 42,
                    title: "Add widget".to_string(),
                    author: Some("alice".to_string()),
                }],
                commits: Vec::new(),
            })
        }

        fn create_next_artifact(
            &self,
            _strategy: &ReleaseStrategyConfig,
            identifier: &str,
        ) -> Result<()> {
            if self.create_error {
                return Err(ShipgateError::Collaborator {
                    operation: "creating artifact".to_string(),
                    reason: "forbidden".to_string(),
                });
            }
            self.created.borrow_mut().push(identifier.to_string());
            Ok(())
        }

        fn cleanup(
            &self,
            _strategy: &ReleaseStrategyConfig,
            identifier: &str,
            _contents: &ReleaseContents,
        ) -> Result<()> {
            if self.cleanup_error {
                return Err(ShipgateError::Collaborator {
                    operation: "deleting branch".to_string(),
                    reason: "protected".to_string(),
                });
            }
            self.cleaned.borrow_mut().push(identifier.to_string());
            Ok(())
        }
    }

    fn branch_strategy() -> ReleaseStrategyConfig {
        ReleaseStrategyConfig::Branch {
            pattern: "release/{{version}}".to_string(),
            base_branch: "main".to_string(),
            auto_create: true,
            cleanup: true,
            open_next_request: true,
        }
    }

    #[test]
    fn render_substitutes_version() {
        assert_eq!(render_pattern("release/{{version}}", "1.2.0"), "release/1.2.0");
        assert_eq!(render_pattern("v{{version}}", "1.2.0"), "v1.2.0");
    }

    #[test]
    fn pattern_without_placeholder_is_constant() {
        assert_eq!(render_pattern("next-release", "1.2.0"), "next-release");
    }

    #[test]
    fn matcher_captures_version() {
        let re = pattern_matcher("release/{{version}}").unwrap();
        let caps = re.captures("release/1.2.0").unwrap();
        assert_eq!(&caps[1], "1.2.0");
        assert!(!re.is_match("hotfix/1.2.0"));
        assert!(!re.is_match("release/"));
    }

    #[test]
    fn matcher_escapes_literal_regex_chars() {
        let re = pattern_matcher("release.{{version}}").unwrap();
        assert!(re.is_match("release.1.0.0"));
        assert!(!re.is_match("releaseX1.0.0"));
    }

    #[test]
    fn contents_query_error_degrades_to_empty() {
        let strategy = branch_strategy();
        let tracker = FakeTracker {
            contents_error: true,
            ..Default::default()
        };
        let versions = SemverIncrementer;
        let mgr = ReleaseManager::new(&strategy, &tracker, &versions);

        let contents = mgr.contents("1.2.0", None);
        assert_eq!(contents.identifier, "release/1.2.0");
        assert!(contents.pull_requests.is_empty());
        assert!(contents.commits.is_empty());
    }

    #[test]
    fn finalize_cleans_up_and_creates_next() {
        let strategy = branch_strategy();
        let tracker = FakeTracker::default();
        let versions = SemverIncrementer;
        let mgr = ReleaseManager::new(&strategy, &tracker, &versions);

        let outcome = mgr.finalize("1.2.0", None, IncrementKind::Minor).unwrap();
        assert!(outcome.cleaned_up);
        assert_eq!(outcome.next_version.as_deref(), Some("1.3.0"));
        assert_eq!(outcome.next_identifier.as_deref(), Some("release/1.3.0"));
        assert!(outcome.open_next_request);
        assert_eq!(*tracker.cleaned.borrow(), vec!["release/1.2.0"]);
        assert_eq!(*tracker.created.borrow(), vec!["release/1.3.0"]);
    }

    #[test]
    fn finalize_cleanup_error_is_not_fatal() {
        let strategy = branch_strategy();
        let tracker = FakeTracker {
            cleanup_error: true,
            ..Default::default()
        };
        let versions = SemverIncrementer;
        let mgr = ReleaseManager::new(&strategy, &tracker, &versions);

        let outcome = mgr.finalize("1.2.0", None, IncrementKind::Minor).unwrap();
        assert!(!outcome.cleaned_up);
        assert_eq!(outcome.next_version.as_deref(), Some("1.3.0"));
    }

    #[test]
    fn finalize_create_error_is_fatal() {
        let strategy = branch_strategy();
        let tracker = FakeTracker {
            create_error: true,
            ..Default::default()
        };
        let versions = SemverIncrementer;
        let mgr = ReleaseManager::new(&strategy, &tracker, &versions);

        assert!(mgr.finalize("1.2.0", None, IncrementKind::Minor).is_err());
    }

    #[test]
    fn finalize_invalid_version_is_fatal() {
        let strategy = branch_strategy();
        let tracker = FakeTracker::default();
        let versions = SemverIncrementer;
        let mgr = ReleaseManager::new(&strategy, &tracker, &versions);

        let err = mgr.finalize("not-a-version", None, IncrementKind::Minor).unwrap_err();
        assert!(matches!(err, ShipgateError::InvalidVersion(_)));
    }

    #[test]
    fn tag_strategy_creates_no_next_artifact() {
        let strategy = ReleaseStrategyConfig::Tag {
            pattern: "v{{version}}".to_string(),
            auto_create: true,
            cleanup: false,
            open_next_request: false,
        };
        let tracker = FakeTracker::default();
        let versions = SemverIncrementer;
        let mgr = ReleaseManager::new(&strategy, &tracker, &versions);

        let outcome = mgr.finalize("1.2.0", None, IncrementKind::Patch).unwrap();
        assert_eq!(outcome.next_version.as_deref(), Some("1.2.1"));
        assert!(outcome.next_identifier.is_none());
        assert!(tracker.created.borrow().is_empty());
    }

    #[test]
    fn strategy_yaml_roundtrip() {
        let yaml = r#"
type: milestone
pattern: "{{version}}"
auto_create: true
"#;
        let strategy: ReleaseStrategyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::Milestone);
        assert!(strategy.auto_create());
        assert!(!strategy.cleanup());
        assert_eq!(strategy.identifier("2.0.0"), "2.0.0");
    }

    #[test]
    fn branch_defaults() {
        let strategy: ReleaseStrategyConfig = serde_yaml::from_str("type: branch\n").unwrap();
        match strategy {
            ReleaseStrategyConfig::Branch {
                pattern,
                base_branch,
                ..
            } => {
                assert_eq!(pattern, "release/{{version}}");
                assert_eq!(base_branch, "main");
            }
            other => panic!("expected branch strategy, got {other:?}"),
        }
    }
}
