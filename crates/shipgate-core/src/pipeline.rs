use crate::classifier::Verdict;
use crate::comment::Comment;
use crate::context::RequestContext;
use crate::error::{Result, ShipgateError};
use crate::eval::{contains_login, same_login, ApprovalResult, Evaluator, Status, TeamResolver};
use crate::release::{self, ReleaseStrategyConfig};
use crate::state::{ChildIssueStatus, IssueState, AUTO_APPROVER};
use crate::workflow::{GateConfig, RequirementConfig, WorkflowConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ApprovalChannel
// ---------------------------------------------------------------------------

/// How a stage collects its approval: classified comments on the request
/// issue (default), one child tracking issue per stage whose close signals
/// the decision, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalChannel {
    #[default]
    Comments,
    SubIssues,
    Hybrid,
}

impl ApprovalChannel {
    pub fn uses_sub_issues(self) -> bool {
        matches!(self, ApprovalChannel::SubIssues | ApprovalChannel::Hybrid)
    }
}

impl fmt::Display for ApprovalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalChannel::Comments => "comments",
            ApprovalChannel::SubIssues => "sub_issues",
            ApprovalChannel::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StageConfig / PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_approvals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_all: Option<bool>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub create_tag: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_channel: Option<ApprovalChannel>,
    #[serde(default)]
    pub only_assignee_can_close: bool,
    #[serde(default)]
    pub require_approval_comment: bool,
}

impl StageConfig {
    /// The synthetic single-requirement gate for this stage.
    pub fn requirement(&self) -> RequirementConfig {
        RequirementConfig {
            policy: self.policy.clone(),
            approvers: self.approvers.clone(),
            min_approvals: self.min_approvals,
            require_all: self.require_all,
            description: Some(self.name.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn stage(&self, index: usize) -> Option<&StageConfig> {
        self.stages.get(index)
    }
}

// ---------------------------------------------------------------------------
// IssueRelations
// ---------------------------------------------------------------------------

/// Collaborator maintaining the parent/child link between a request issue
/// and its per-stage tracking issues.
pub trait IssueRelations {
    fn add_child(&self, parent: u64, child: u64) -> Result<()>;
    fn parent_of(&self, child: u64) -> Result<Option<u64>>;
    fn children_of(&self, parent: u64) -> Result<Vec<u64>>;
}

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Side effects requested by a transition. Transitions are pure; the
/// embedding driver executes these against the hosting platform, and
/// mutating failures there are fatal to the driver, not folded back into
/// the state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageApproved {
        stage: String,
        approved_by: Vec<String>,
        auto: bool,
    },
    /// Announce the now-active stage and who may approve it.
    StageReady {
        stage: String,
        approvers: Vec<String>,
    },
    /// Open a child tracking issue for the now-active stage.
    OpenChildIssue {
        stage: String,
        assignees: Vec<String>,
    },
    CreateTag {
        name: String,
    },
    StageDenied {
        stage: String,
        denied_by: Option<String>,
    },
    /// Close the still-open child issues after a denial.
    CloseChildIssues {
        stages: Vec<String>,
    },
    /// A child close was rejected by a guard; reopen it with this warning.
    ChildReopened {
        stage: String,
        issue: u64,
        warning: String,
    },
    Complete {
        version: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The stage state machine. Every transition takes the current `IssueState`
/// by value and returns the successor plus the side effects to run; the
/// caller persists the returned state wholesale.
pub struct Pipeline<'a> {
    config: &'a GateConfig,
    workflow: &'a WorkflowConfig,
    stages: &'a PipelineConfig,
    teams: &'a dyn TeamResolver,
}

impl<'a> std::fmt::Debug for Pipeline<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("workflow", &self.workflow)
            .field("stages", &self.stages)
            .field("teams", &"<dyn TeamResolver>")
            .finish()
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a GateConfig,
        workflow_name: &str,
        teams: &'a dyn TeamResolver,
    ) -> Result<Self> {
        let workflow = config.workflow(workflow_name)?;
        let stages = workflow
            .pipeline
            .as_ref()
            .ok_or_else(|| ShipgateError::InvalidWorkflow {
                workflow: workflow_name.to_string(),
                reason: "workflow has no pipeline".to_string(),
            })?;
        Ok(Self {
            config,
            workflow,
            stages,
            teams,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_terminal(&self, state: &IssueState) -> bool {
        state.complete || state.current_stage >= self.stages.stages.len()
    }

    pub fn active_stage(&self, state: &IssueState) -> Option<&StageConfig> {
        if state.complete {
            return None;
        }
        self.stages.stage(state.current_stage)
    }

    pub fn channel_for(&self, stage: &StageConfig) -> ApprovalChannel {
        stage.approval_channel.unwrap_or(self.workflow.approval_channel)
    }

    /// Teams-expanded approver set for a stage, requestor included.
    pub fn resolved_approvers(&self, stage: &StageConfig) -> Result<Vec<String>> {
        Evaluator::new(self.config, self.teams).eligible_approvers(&stage.requirement())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Advance through the auto-approve prefix at creation, before any human
    /// interaction, request one child tracking issue per remaining
    /// sub-issue-channel stage, and announce the first human stage.
    pub fn initialize(&self, state: IssueState) -> Result<(IssueState, Vec<PipelineEvent>)> {
        let mut state = state;
        let mut events = Vec::new();
        self.advance_auto(&mut state, &mut events)?;
        if !self.is_terminal(&state) {
            for stage in self.stages.stages.iter().skip(state.current_stage) {
                if !stage.auto_approve && self.channel_for(stage).uses_sub_issues() {
                    events.push(PipelineEvent::OpenChildIssue {
                        stage: stage.name.clone(),
                        assignees: self.resolved_approvers(stage)?,
                    });
                }
            }
            self.announce_active(&state, &mut events)?;
        }
        Ok((state, events))
    }

    /// Evaluate the active stage's gate against the comment history.
    pub fn evaluate_stage(
        &self,
        state: &IssueState,
        ctx: &RequestContext,
        comments: &[Comment],
    ) -> Result<ApprovalResult> {
        let stage = self.active_stage(state).ok_or_else(|| {
            ShipgateError::InvalidStage {
                stage: state.current_stage.to_string(),
                reason: "pipeline is already complete".to_string(),
            }
        })?;
        Evaluator::new(self.config, self.teams).evaluate_requirements(
            &[stage.requirement()],
            self.workflow.allow_self_approval,
            ctx,
            comments,
        )
    }

    /// Apply a stage evaluation outcome. Approved advances the cursor (and
    /// any auto-approve stages that follow); Denied leaves it unchanged;
    /// Pending is a no-op.
    pub fn apply(
        &self,
        state: IssueState,
        result: &ApprovalResult,
    ) -> Result<(IssueState, Vec<PipelineEvent>)> {
        let mut state = state;
        let mut events = Vec::new();
        let Some(stage) = self.active_stage(&state) else {
            return Ok((state, events));
        };
        let stage = stage.clone();

        match result.status {
            Status::Approved => {
                if self.channel_for(&stage).uses_sub_issues() {
                    state.set_child_status(&stage.name, ChildIssueStatus::Approved);
                }
                self.complete_stage(&mut state, &stage, result.approvers.clone(), false, &mut events)?;
                self.advance_auto(&mut state, &mut events)?;
                if !self.is_terminal(&state) {
                    self.announce_active(&state, &mut events)?;
                }
            }
            Status::Denied => {
                self.deny_stage(&mut state, &stage, result.denied_by.clone(), &mut events);
            }
            Status::Pending => {}
        }
        Ok((state, events))
    }

    /// Record a newly opened child tracking issue for a stage and link it to
    /// the parent request issue.
    pub fn register_child(
        &self,
        state: IssueState,
        relations: &dyn IssueRelations,
        parent_issue: u64,
        stage_name: &str,
        child_issue: u64,
        assignees: Vec<String>,
    ) -> Result<IssueState> {
        let mut state = state;
        relations.add_child(parent_issue, child_issue)?;
        state.record_child(stage_name, child_issue, assignees);
        Ok(state)
    }

    /// Handle the child tracking issue `child_issue` being closed by
    /// `closer`.
    ///
    /// A close of anything but the active stage's still-open child, or one
    /// rejected by the optional guards, is answered with a reopen request.
    /// When the guards pass, the decision is the closer's most recent
    /// classified comment; with no classifiable comment at all the close
    /// counts as an approval. Set `require_approval_comment` on the stage
    /// for the stricter stance.
    pub fn handle_child_close(
        &self,
        state: IssueState,
        child_issue: u64,
        closer: &str,
        child_comments: &[Comment],
    ) -> Result<(IssueState, Vec<PipelineEvent>)> {
        let mut state = state;
        let mut events = Vec::new();

        // Not one of ours, or already resolved: nothing to do.
        let Some(child) = state
            .children
            .iter()
            .find(|c| c.issue == child_issue && c.status == ChildIssueStatus::Open)
            .cloned()
        else {
            return Ok((state, events));
        };
        let Some(stage) = self
            .stages
            .stages
            .iter()
            .find(|s| s.name == child.stage)
            .cloned()
        else {
            return Ok((state, events));
        };

        let active = self.active_stage(&state).map(|s| s.name.clone());
        if active.as_deref() != Some(stage.name.as_str()) {
            self.reopen(
                &mut state,
                &stage.name,
                child.issue,
                format!("stage '{}' is not the active stage", stage.name),
                &mut events,
            );
            return Ok((state, events));
        }

        let issue = child.issue;
        let assignees = child.assignees.clone();

        if stage.only_assignee_can_close && !contains_login(&assignees, closer) {
            self.reopen(
                &mut state,
                &stage.name,
                issue,
                format!("@{closer} is not an approver for stage '{}'", stage.name),
                &mut events,
            );
            return Ok((state, events));
        }

        let verdict = child_comments
            .iter()
            .filter(|c| same_login(&c.author, closer))
            .map(|c| self.config.keywords.classify(&c.body))
            .filter(|v| *v != Verdict::Neither)
            .last();

        if stage.require_approval_comment && verdict.is_none() {
            self.reopen(
                &mut state,
                &stage.name,
                issue,
                format!(
                    "closing requires an approval or denial comment for stage '{}'",
                    stage.name
                ),
                &mut events,
            );
            return Ok((state, events));
        }

        match verdict.unwrap_or(Verdict::Approval) {
            Verdict::Denial => {
                state.set_child_status(&stage.name, ChildIssueStatus::Denied);
                self.deny_stage(&mut state, &stage, Some(closer.to_string()), &mut events);
            }
            _ => {
                state.set_child_status(&stage.name, ChildIssueStatus::Approved);
                self.complete_stage(
                    &mut state,
                    &stage,
                    vec![closer.to_string()],
                    false,
                    &mut events,
                )?;
                self.advance_auto(&mut state, &mut events)?;
                if !self.is_terminal(&state) {
                    self.announce_active(&state, &mut events)?;
                }
            }
        }
        Ok((state, events))
    }

    /// Undo the most recent stage completion after its approving child issue
    /// was reopened. This is the only path by which the cursor decreases.
    pub fn rollback_stage(
        &self,
        state: IssueState,
        stage_name: &str,
    ) -> Result<(IssueState, Vec<PipelineEvent>)> {
        let mut state = state;
        let mut events = Vec::new();
        match state.stages.last() {
            Some(record) if record.stage == stage_name && !record.auto => {}
            _ => {
                return Err(ShipgateError::InvalidStage {
                    stage: stage_name.to_string(),
                    reason: "only the most recently completed stage can be rolled back"
                        .to_string(),
                })
            }
        }
        state.stages.pop();
        state.current_stage -= 1;
        state.complete = false;
        state.set_child_status(stage_name, ChildIssueStatus::Open);
        self.announce_active(&state, &mut events)?;
        Ok((state, events))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn advance_auto(
        &self,
        state: &mut IssueState,
        events: &mut Vec<PipelineEvent>,
    ) -> Result<()> {
        while let Some(stage) = self.active_stage(state) {
            if !stage.auto_approve {
                break;
            }
            let stage = stage.clone();
            self.complete_stage(
                state,
                &stage,
                vec![AUTO_APPROVER.to_string()],
                true,
                events,
            )?;
        }
        Ok(())
    }

    fn complete_stage(
        &self,
        state: &mut IssueState,
        stage: &StageConfig,
        approved_by: Vec<String>,
        auto: bool,
        events: &mut Vec<PipelineEvent>,
    ) -> Result<()> {
        state.record_completion(&stage.name, approved_by.clone(), auto);
        events.push(PipelineEvent::StageApproved {
            stage: stage.name.clone(),
            approved_by,
            auto,
        });
        if stage.create_tag {
            events.push(PipelineEvent::CreateTag {
                name: self.tag_name(state),
            });
        }
        if stage.is_final || state.current_stage >= self.stages.stages.len() {
            state.mark_complete();
            events.push(PipelineEvent::Complete {
                version: state.version.clone(),
            });
        }
        Ok(())
    }

    fn deny_stage(
        &self,
        state: &mut IssueState,
        stage: &StageConfig,
        denied_by: Option<String>,
        events: &mut Vec<PipelineEvent>,
    ) {
        events.push(PipelineEvent::StageDenied {
            stage: stage.name.clone(),
            denied_by,
        });
        if self.channel_for(stage).uses_sub_issues() && self.workflow.close_children_on_deny {
            let open: Vec<String> = state
                .children
                .iter()
                .filter(|c| c.status == ChildIssueStatus::Open)
                .map(|c| c.stage.clone())
                .collect();
            if !open.is_empty() {
                events.push(PipelineEvent::CloseChildIssues { stages: open });
            }
        }
    }

    fn announce_active(
        &self,
        state: &IssueState,
        events: &mut Vec<PipelineEvent>,
    ) -> Result<()> {
        if let Some(stage) = self.active_stage(state) {
            let approvers = self.resolved_approvers(stage)?;
            events.push(PipelineEvent::StageReady {
                stage: stage.name.clone(),
                approvers: approvers.clone(),
            });
            // Child issues are normally requested up front at initialization;
            // only ask again if this stage still has none recorded.
            if self.channel_for(stage).uses_sub_issues()
                && state.child_for_stage(&stage.name).is_none()
            {
                events.push(PipelineEvent::OpenChildIssue {
                    stage: stage.name.clone(),
                    assignees: approvers,
                });
            }
        }
        Ok(())
    }

    fn reopen(
        &self,
        state: &mut IssueState,
        stage: &str,
        issue: u64,
        warning: String,
        events: &mut Vec<PipelineEvent>,
    ) {
        state.set_child_status(stage, ChildIssueStatus::Open);
        events.push(PipelineEvent::ChildReopened {
            stage: stage.to_string(),
            issue,
            warning,
        });
    }

    fn tag_name(&self, state: &IssueState) -> String {
        let pattern = match &self.workflow.release {
            Some(strategy @ ReleaseStrategyConfig::Tag { .. }) => strategy.pattern(),
            _ => "v{{version}}",
        };
        release::render_pattern(pattern, &state.version)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
