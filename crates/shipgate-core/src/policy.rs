use crate::error::{Result, ShipgateError};
use crate::expr::ApprovalExpr;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Boolean connector from one advanced-policy source to the *next* one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    And,
    Or,
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connector::And => f.write_str("and"),
            Connector::Or => f.write_str("or"),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw config shapes
// ---------------------------------------------------------------------------

/// One source of an advanced ("from"-format) policy, as loaded from YAML.
///
/// Exactly one of `team`, `user`, `users` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_approvals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_all: Option<bool>,
    /// Connector to the next source in the list (default "and").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Connector>,
}

/// A named approver definition, as loaded from YAML.
///
/// Exactly one of the two formats: a flat `approvers` list with a threshold,
/// or an ordered `from` source list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_approvals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_all: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<SourceConfig>,
}

// ---------------------------------------------------------------------------
// Resolved model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    RequireAll,
    MinApprovals(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApproverSet {
    Team(String),
    User(String),
    Users(Vec<String>),
}

impl ApproverSet {
    pub fn describe(&self) -> String {
        match self {
            ApproverSet::Team(t) => format!("team {t}"),
            ApproverSet::User(u) => format!("user {u}"),
            ApproverSet::Users(us) => format!("users [{}]", us.join(", ")),
        }
    }

    /// Literal approver count, or `None` for a team (unresolved until
    /// evaluation).
    fn literal_count(&self) -> Option<usize> {
        match self {
            ApproverSet::Team(_) => None,
            ApproverSet::User(_) => Some(1),
            ApproverSet::Users(us) => Some(us.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub set: ApproverSet,
    pub threshold: Threshold,
    pub connector: Connector,
}

/// A policy resolved once at load time; the engine never re-inspects the raw
/// config format.
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    Simple {
        approvers: Vec<String>,
        threshold: Threshold,
    },
    Advanced {
        sources: Vec<Source>,
        expr: ApprovalExpr,
    },
}

impl Policy {
    /// True if any source references a team, so literal-threshold validation
    /// was skipped at load time.
    pub fn references_team(&self) -> bool {
        match self {
            Policy::Simple { .. } => false,
            Policy::Advanced { sources, .. } => sources
                .iter()
                .any(|s| matches!(s.set, ApproverSet::Team(_))),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Combine the two raw threshold fields. `require_all: true` wins over a
/// stray `min_approvals`; neither set means unanimous approval.
pub(crate) fn resolve_threshold(require_all: Option<bool>, min_approvals: Option<u32>) -> Threshold {
    match (require_all, min_approvals) {
        (Some(true), _) => Threshold::RequireAll,
        (_, Some(k)) => Threshold::MinApprovals(k),
        (Some(false), None) => Threshold::MinApprovals(1),
        (None, None) => Threshold::RequireAll,
    }
}

pub(crate) fn check_threshold(
    name: &str,
    threshold: Threshold,
    literal_count: Option<usize>,
    skip_count_check: bool,
) -> Result<()> {
    if let Threshold::MinApprovals(k) = threshold {
        if k == 0 {
            return Err(ShipgateError::InvalidPolicy {
                policy: name.to_string(),
                reason: "min_approvals must be at least 1".to_string(),
            });
        }
        if !skip_count_check {
            if let Some(count) = literal_count {
                if k as usize > count {
                    return Err(ShipgateError::InvalidPolicy {
                        policy: name.to_string(),
                        reason: format!(
                            "min_approvals {k} exceeds the {count} listed approver(s)"
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

impl SourceConfig {
    fn resolve(&self, policy: &str, index: usize) -> Result<Source> {
        let set = match (&self.team, &self.user, self.users.is_empty()) {
            (Some(t), None, true) => ApproverSet::Team(t.clone()),
            (None, Some(u), true) => ApproverSet::User(u.clone()),
            (None, None, false) => ApproverSet::Users(self.users.clone()),
            _ => {
                return Err(ShipgateError::InvalidPolicy {
                    policy: policy.to_string(),
                    reason: format!(
                        "source {} must set exactly one of 'team', 'user', or 'users'",
                        index + 1
                    ),
                })
            }
        };
        Ok(Source {
            set,
            threshold: resolve_threshold(self.require_all, self.min_approvals),
            connector: self.logic.unwrap_or(Connector::And),
        })
    }
}

impl PolicyConfig {
    /// True if any `from` source references a team. Literal threshold checks
    /// are skipped for the whole policy in that case (team sizes are unknown
    /// until evaluation).
    pub fn references_team(&self) -> bool {
        self.from.iter().any(|s| s.team.is_some())
    }

    pub fn resolve(&self, name: &str) -> Result<Policy> {
        match (self.approvers.is_empty(), self.from.is_empty()) {
            (false, false) => Err(ShipgateError::InvalidPolicy {
                policy: name.to_string(),
                reason: "'approvers' and 'from' are mutually exclusive".to_string(),
            }),
            (true, true) => Err(ShipgateError::InvalidPolicy {
                policy: name.to_string(),
                reason: "must define either 'approvers' or 'from'".to_string(),
            }),
            (false, true) => {
                let threshold = resolve_threshold(self.require_all, self.min_approvals);
                check_threshold(name, threshold, Some(self.approvers.len()), false)?;
                Ok(Policy::Simple {
                    approvers: self.approvers.clone(),
                    threshold,
                })
            }
            (true, false) => {
                let skip_count_check = self.references_team();
                let mut sources = Vec::with_capacity(self.from.len());
                for (i, sc) in self.from.iter().enumerate() {
                    let source = sc.resolve(name, i)?;
                    check_threshold(
                        name,
                        source.threshold,
                        source.set.literal_count(),
                        skip_count_check,
                    )?;
                    sources.push(source);
                }
                let connectors: Vec<Connector> = sources
                    .iter()
                    .take(sources.len() - 1)
                    .map(|s| s.connector)
                    .collect();
                let expr = ApprovalExpr::from_connectors(&connectors);
                Ok(Policy::Advanced { sources, expr })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> PolicyConfig {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn simple_policy_resolves() {
        let p = yaml("approvers: [alice, bob]\nmin_approvals: 2\n");
        match p.resolve("release").unwrap() {
            Policy::Simple {
                approvers,
                threshold,
            } => {
                assert_eq!(approvers, vec!["alice", "bob"]);
                assert_eq!(threshold, Threshold::MinApprovals(2));
            }
            other => panic!("expected simple policy, got {other:?}"),
        }
    }

    #[test]
    fn no_threshold_defaults_to_require_all() {
        let p = yaml("approvers: [alice]\n");
        match p.resolve("release").unwrap() {
            Policy::Simple { threshold, .. } => assert_eq!(threshold, Threshold::RequireAll),
            other => panic!("expected simple policy, got {other:?}"),
        }
    }

    #[test]
    fn require_all_false_without_min_means_one() {
        assert_eq!(
            resolve_threshold(Some(false), None),
            Threshold::MinApprovals(1)
        );
    }

    #[test]
    fn require_all_wins_over_min_approvals() {
        assert_eq!(
            resolve_threshold(Some(true), Some(3)),
            Threshold::RequireAll
        );
    }

    #[test]
    fn dual_format_rejected() {
        let p = yaml("approvers: [alice]\nfrom:\n  - user: bob\n");
        let err = p.resolve("broken").unwrap_err();
        assert!(matches!(err, ShipgateError::InvalidPolicy { .. }));
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn empty_policy_rejected() {
        let err = PolicyConfig::default().resolve("empty").unwrap_err();
        assert!(err.to_string().contains("either 'approvers' or 'from'"));
    }

    #[test]
    fn zero_min_approvals_rejected() {
        let p = yaml("approvers: [alice]\nmin_approvals: 0\n");
        let err = p.resolve("zero").unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn unsatisfiable_threshold_rejected() {
        let p = yaml("approvers: [alice, bob]\nmin_approvals: 3\n");
        let err = p.resolve("overcommitted").unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn source_must_set_exactly_one_shape() {
        let p = yaml("from:\n  - team: platform\n    user: alice\n");
        let err = p.resolve("mixed").unwrap_err();
        assert!(err.to_string().contains("exactly one of"));

        let p = yaml("from:\n  - min_approvals: 1\n");
        assert!(p.resolve("shapeless").is_err());
    }

    #[test]
    fn advanced_policy_resolves_with_connectors() {
        let p = yaml(
            r#"
from:
  - team: platform
    min_approvals: 2
  - team: security
    min_approvals: 1
    logic: or
  - user: dave
"#,
        );
        match p.resolve("staged").unwrap() {
            Policy::Advanced { sources, expr } => {
                assert_eq!(sources.len(), 3);
                assert_eq!(sources[0].connector, Connector::And);
                assert_eq!(sources[1].connector, Connector::Or);
                // (platform ∧ security) ∨ dave — run boundary after source 2
                assert_eq!(expr.runs(), &[vec![0, 1], vec![2]]);
            }
            other => panic!("expected advanced policy, got {other:?}"),
        }
    }

    #[test]
    fn team_reference_skips_literal_count_check() {
        // users source with min 5 > 1 would be rejected, but the team in the
        // same policy suppresses the check for the whole policy.
        let p = yaml(
            r#"
from:
  - team: platform
  - users: [alice]
    min_approvals: 5
"#,
        );
        let policy = p.resolve("masked").unwrap();
        assert!(policy.references_team());
    }

    #[test]
    fn team_free_advanced_policy_checks_counts() {
        let p = yaml("from:\n  - users: [alice]\n    min_approvals: 5\n");
        assert!(p.resolve("overcommitted").is_err());
    }
}
