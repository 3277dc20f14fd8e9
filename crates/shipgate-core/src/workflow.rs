use crate::classifier::Classifier;
use crate::error::{Result, ShipgateError};
use crate::pipeline::{ApprovalChannel, PipelineConfig};
use crate::policy::{self, Policy, PolicyConfig};
use crate::release::{ReleaseStrategyConfig, VERSION_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigFinding / FindingLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFinding {
    pub level: FindingLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingLevel {
    Warning,
    Error,
}

impl std::fmt::Display for FindingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingLevel::Warning => f.write_str("warning"),
            FindingLevel::Error => f.write_str("error"),
        }
    }
}

fn error(findings: &mut Vec<ConfigFinding>, message: String) {
    findings.push(ConfigFinding {
        level: FindingLevel::Error,
        message,
    });
}

fn warning(findings: &mut Vec<ConfigFinding>, message: String) {
    findings.push(ConfigFinding {
        level: FindingLevel::Warning,
        message,
    });
}

// ---------------------------------------------------------------------------
// RequirementConfig
// ---------------------------------------------------------------------------

/// One OR-branch of a workflow's approval gate: a policy reference or an
/// inline approver list, optionally overriding the policy's threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_approvals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RequirementConfig {
    fn has_threshold_override(&self) -> bool {
        self.min_approvals.is_some() || self.require_all.is_some()
    }

    /// Short label for diagnostics output.
    pub fn describe(&self) -> String {
        if let Some(d) = &self.description {
            return d.clone();
        }
        if let Some(p) = &self.policy {
            return format!("policy {p}");
        }
        format!("approvers [{}]", self.approvers.join(", "))
    }
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// OR-combined approval gates, evaluated in declared order.
    pub requirements: Vec<RequirementConfig>,
    #[serde(default)]
    pub allow_self_approval: bool,
    #[serde(default)]
    pub approval_channel: ApprovalChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_approve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_deny: Option<String>,
    #[serde(default)]
    pub close_on_deny: bool,
    #[serde(default)]
    pub close_children_on_deny: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseStrategyConfig>,
}

// ---------------------------------------------------------------------------
// GateConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
    #[serde(default)]
    pub workflows: HashMap<String, WorkflowConfig>,
    /// Static team rosters for configs that resolve teams locally instead of
    /// through a directory collaborator.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub teams: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub keywords: Classifier,
}

fn default_config_version() -> u32 {
    1
}

impl GateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ShipgateError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: GateConfig = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    pub fn workflow(&self, name: &str) -> Result<&WorkflowConfig> {
        self.workflows
            .get(name)
            .ok_or_else(|| ShipgateError::WorkflowNotFound(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Requirement resolution
    // -----------------------------------------------------------------------

    /// Resolve a requirement into an evaluable policy.
    ///
    /// A requirement-level threshold overrides the referenced policy's
    /// threshold for simple policies; advanced policies carry per-source
    /// thresholds and ignore the override. With no threshold anywhere the
    /// result is require-all (unanimous).
    pub fn resolve_requirement(&self, req: &RequirementConfig) -> Result<Policy> {
        match (&req.policy, req.approvers.is_empty()) {
            (Some(_), false) => Err(ShipgateError::InvalidRequirement(
                "'policy' and 'approvers' are mutually exclusive".to_string(),
            )),
            (None, true) => Err(ShipgateError::InvalidRequirement(
                "must reference a 'policy' or list 'approvers'".to_string(),
            )),
            (Some(name), true) => {
                let config = self
                    .policies
                    .get(name)
                    .ok_or_else(|| ShipgateError::PolicyNotFound(name.clone()))?;
                let resolved = config.resolve(name)?;
                match resolved {
                    Policy::Simple { approvers, .. } if req.has_threshold_override() => {
                        let threshold =
                            policy::resolve_threshold(req.require_all, req.min_approvals);
                        policy::check_threshold(name, threshold, Some(approvers.len()), false)?;
                        Ok(Policy::Simple {
                            approvers,
                            threshold,
                        })
                    }
                    other => Ok(other),
                }
            }
            (None, false) => {
                let threshold =
                    policy::resolve_threshold(req.require_all, req.min_approvals);
                policy::check_threshold(
                    &req.describe(),
                    threshold,
                    Some(req.approvers.len()),
                    false,
                )?;
                Ok(Policy::Simple {
                    approvers: req.approvers.clone(),
                    threshold,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate the loaded configuration before any evaluation. Error-level
    /// findings must abort; warnings are informational.
    pub fn validate(&self) -> Vec<ConfigFinding> {
        let mut findings = Vec::new();

        for (name, policy) in &self.policies {
            if let Err(e) = policy.resolve(name) {
                error(&mut findings, e.to_string());
                continue;
            }
            if policy.require_all == Some(true) && policy.min_approvals.is_some() {
                warning(
                    &mut findings,
                    format!("policy '{name}' sets both require_all and min_approvals; require_all wins"),
                );
            }
            if policy.references_team() {
                for (i, source) in policy.from.iter().enumerate() {
                    let count = if source.user.is_some() {
                        Some(1)
                    } else if !source.users.is_empty() {
                        Some(source.users.len())
                    } else {
                        None
                    };
                    if let (Some(count), Some(k)) = (count, source.min_approvals) {
                        if k as usize > count {
                            warning(
                                &mut findings,
                                format!(
                                    "policy '{name}' source {}: min_approvals {k} exceeds the {count} \
                                     listed approver(s); check skipped because the policy references a team",
                                    i + 1
                                ),
                            );
                        }
                    }
                }
            }
        }

        for (name, workflow) in &self.workflows {
            self.validate_workflow(name, workflow, &mut findings);
        }

        findings
    }

    fn validate_workflow(
        &self,
        name: &str,
        workflow: &WorkflowConfig,
        findings: &mut Vec<ConfigFinding>,
    ) {
        if workflow.requirements.is_empty() {
            error(
                findings,
                format!("workflow '{name}' has no requirements"),
            );
        }

        for (i, req) in workflow.requirements.iter().enumerate() {
            if let Err(e) = self.resolve_requirement(req) {
                error(
                    findings,
                    format!("workflow '{name}' requirement {}: {e}", i + 1),
                );
                continue;
            }
            if req.has_threshold_override() {
                if let Some(policy_name) = &req.policy {
                    if let Some(policy) = self.policies.get(policy_name) {
                        if !policy.from.is_empty() {
                            warning(
                                findings,
                                format!(
                                    "workflow '{name}' requirement {}: threshold override on \
                                     advanced policy '{policy_name}' is ignored",
                                    i + 1
                                ),
                            );
                        }
                    }
                }
            }
        }

        if let Some(pipeline) = &workflow.pipeline {
            self.validate_pipeline(name, workflow, pipeline, findings);
        }

        if let Some(release) = &workflow.release {
            let placeholders = release.pattern().matches(VERSION_PLACEHOLDER).count();
            if placeholders > 1 {
                error(
                    findings,
                    format!(
                        "workflow '{name}': release pattern '{}' has {placeholders} \
                         {VERSION_PLACEHOLDER} placeholders, at most one is supported",
                        release.pattern()
                    ),
                );
            } else if placeholders == 0 {
                warning(
                    findings,
                    format!(
                        "workflow '{name}': release pattern '{}' has no {VERSION_PLACEHOLDER} \
                         placeholder and names every release identically",
                        release.pattern()
                    ),
                );
            }
        }
    }

    fn validate_pipeline(
        &self,
        name: &str,
        workflow: &WorkflowConfig,
        pipeline: &PipelineConfig,
        findings: &mut Vec<ConfigFinding>,
    ) {
        if pipeline.stages.is_empty() {
            error(findings, format!("workflow '{name}' pipeline has no stages"));
        }

        for stage in &pipeline.stages {
            if !stage.auto_approve {
                if let Err(e) = self.resolve_requirement(&stage.requirement()) {
                    error(
                        findings,
                        format!("workflow '{name}' stage '{}': {e}", stage.name),
                    );
                }
            }
            let channel = stage
                .approval_channel
                .unwrap_or(workflow.approval_channel);
            if (stage.only_assignee_can_close || stage.require_approval_comment)
                && !channel.uses_sub_issues()
            {
                warning(
                    findings,
                    format!(
                        "workflow '{name}' stage '{}': close guards have no effect on the \
                         comments channel",
                        stage.name
                    ),
                );
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
    use crate::policy::Threshold;

    const SAMPLE: &str = r#"
version: 1
policies:
  release-managers:
    approvers: [alice, bob]
    min_approvals: 2
  security:
    from:
      - team: sec-team
        min_approvals: 1
      - user: dave
        logic: or
workflows:
  deploy:
    requirements:
      - policy: release-managers
      - approvers: [carol]
        require_all: true
teams:
  sec-team: [erin, frank]
"#;

    #[test]
    fn sample_loads_and_validates_clean() {
        let cfg = GateConfig::from_yaml(SAMPLE).unwrap();
        assert!(cfg.validate().is_empty());
        assert!(cfg.workflow("deploy").is_ok());
        assert!(matches!(
            cfg.workflow("missing"),
            Err(ShipgateError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn requirement_override_beats_policy_threshold() {
        let cfg = GateConfig::from_yaml(SAMPLE).unwrap();
        let req = RequirementConfig {
            policy: Some("release-managers".to_string()),
            min_approvals: Some(1),
            ..Default::default()
        };
        match cfg.resolve_requirement(&req).unwrap() {
            Policy::Simple { threshold, .. } => {
                assert_eq!(threshold, Threshold::MinApprovals(1));
            }
            other => panic!("expected simple policy, got {other:?}"),
        }
    }

    #[test]
    fn requirement_without_override_keeps_policy_threshold() {
        let cfg = GateConfig::from_yaml(SAMPLE).unwrap();
        let req = RequirementConfig {
            policy: Some("release-managers".to_string()),
            ..Default::default()
        };
        match cfg.resolve_requirement(&req).unwrap() {
            Policy::Simple { threshold, .. } => {
                assert_eq!(threshold, Threshold::MinApprovals(2));
            }
            other => panic!("expected simple policy, got {other:?}"),
        }
    }

    #[test]
    fn inline_approvers_default_to_require_all() {
        let cfg = GateConfig::default();
        let req = RequirementConfig {
            approvers: vec!["alice".to_string(), "bob".to_string()],
            ..Default::default()
        };
        match cfg.resolve_requirement(&req).unwrap() {
            Policy::Simple { threshold, .. } => assert_eq!(threshold, Threshold::RequireAll),
            other => panic!("expected simple policy, got {other:?}"),
        }
    }

    #[test]
    fn undefined_policy_reference_fails() {
        let cfg = GateConfig::default();
        let req = RequirementConfig {
            policy: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_requirement(&req),
            Err(ShipgateError::PolicyNotFound(_))
        ));
    }

    #[test]
    fn requirement_with_both_shapes_fails() {
        let cfg = GateConfig::from_yaml(SAMPLE).unwrap();
        let req = RequirementConfig {
            policy: Some("release-managers".to_string()),
            approvers: vec!["zed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_requirement(&req),
            Err(ShipgateError::InvalidRequirement(_))
        ));
    }

    #[test]
    fn validate_reports_undefined_policy_in_workflow() {
        let yaml = r#"
workflows:
  deploy:
    requirements:
      - policy: ghost
"#;
        let cfg = GateConfig::from_yaml(yaml).unwrap();
        let findings = cfg.validate();
        assert!(findings.iter().any(|f| {
            f.level == FindingLevel::Error && f.message.contains("policy not found: ghost")
        }));
    }

    #[test]
    fn validate_reports_empty_requirements() {
        let yaml = "workflows:\n  deploy:\n    requirements: []\n";
        let cfg = GateConfig::from_yaml(yaml).unwrap();
        let findings = cfg.validate();
        assert!(findings
            .iter()
            .any(|f| f.level == FindingLevel::Error && f.message.contains("no requirements")));
    }

    #[test]
    fn validate_reports_dual_format_policy() {
        let yaml = r#"
policies:
  broken:
    approvers: [alice]
    from:
      - user: bob
workflows:
  deploy:
    requirements:
      - policy: broken
"#;
        let cfg = GateConfig::from_yaml(yaml).unwrap();
        let findings = cfg.validate();
        assert!(findings
            .iter()
            .any(|f| f.level == FindingLevel::Error && f.message.contains("mutually exclusive")));
    }

    #[test]
    fn validate_warns_on_masked_threshold_with_team() {
        let yaml = r#"
policies:
  masked:
    from:
      - team: platform
      - users: [alice]
        min_approvals: 5
workflows:
  deploy:
    requirements:
      - policy: masked
"#;
        let cfg = GateConfig::from_yaml(yaml).unwrap();
        let findings = cfg.validate();
        assert!(findings
            .iter()
            .any(|f| f.level == FindingLevel::Warning && f.message.contains("check skipped")));
    }

    #[test]
    fn validate_warns_on_release_pattern_without_placeholder() {
        let yaml = r#"
workflows:
  deploy:
    requirements:
      - approvers: [alice]
    release:
      type: branch
      pattern: next-release
"#;
        let cfg = GateConfig::from_yaml(yaml).unwrap();
        let findings = cfg.validate();
        assert!(findings
            .iter()
            .any(|f| f.level == FindingLevel::Warning && f.message.contains("names every release")));
    }

    #[test]
    fn unknown_sections_tolerated_for_forward_compat() {
        let yaml = "version: 1\nworkflows: {}\nfuture_section:\n  anything: true\n";
        assert!(GateConfig::from_yaml(yaml).is_ok());
    }
}
