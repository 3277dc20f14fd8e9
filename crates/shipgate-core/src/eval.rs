use crate::classifier::Verdict;
use crate::comment::Comment;
use crate::context::RequestContext;
use crate::error::{Result, ShipgateError};
use crate::expr::ApprovalExpr;
use crate::policy::{ApproverSet, Policy, Threshold};
use crate::workflow::{GateConfig, RequirementConfig, WorkflowConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// TeamResolver
// ---------------------------------------------------------------------------

/// Collaborator expanding a team name into member logins.
///
/// An empty member list is a valid answer; an error aborts the enclosing
/// evaluation with no partial result.
pub trait TeamResolver {
    fn team_members(&self, name: &str) -> Result<Vec<String>>;
}

/// Resolver over the static team rosters in the configuration file.
pub struct ConfigTeams<'a>(pub &'a HashMap<String, Vec<String>>);

impl TeamResolver for ConfigTeams<'_> {
    fn team_members(&self, name: &str) -> Result<Vec<String>> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| ShipgateError::TeamResolution {
                team: name.to_string(),
                reason: "team is not defined in the configuration".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Approved,
    Denied,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Approved | Status::Denied)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Denied => "denied",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Result types (computed fresh per call, never persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub description: String,
    pub eligible: Vec<String>,
    pub approved_by: Vec<String>,
    pub satisfied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStatus {
    pub index: usize,
    pub description: String,
    /// Who may approve this group, after dedup and the self-approval filter.
    pub eligible: Vec<String>,
    pub approved_by: Vec<String>,
    pub satisfied: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub status: Status,
    /// Approvers of the first satisfied group.
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfied_group: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<String>,
    pub groups: Vec<GroupStatus>,
}

// ---------------------------------------------------------------------------
// Case-insensitive login handling
// ---------------------------------------------------------------------------

pub(crate) fn same_login(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

pub(crate) fn contains_login(haystack: &[String], needle: &str) -> bool {
    haystack.iter().any(|h| same_login(h, needle))
}

/// Append preserving the first-seen casing.
fn push_unique(list: &mut Vec<String>, login: &str) {
    if !contains_login(list, login) {
        list.push(login.trim().to_string());
    }
}

fn dedup_logins(logins: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    for login in logins {
        push_unique(&mut out, &login);
    }
    out
}

// ---------------------------------------------------------------------------
// Expanded groups (internal)
// ---------------------------------------------------------------------------

struct ExpandedSource {
    description: String,
    eligible: Vec<String>,
    threshold: Threshold,
}

struct ExpandedGroup {
    index: usize,
    description: String,
    /// Raw eligible union, requestor included. Denial eligibility checks use
    /// this set; approval counting applies the self-approval filter.
    eligible: Vec<String>,
    /// Simple policies evaluate one threshold over `eligible`.
    threshold: Option<Threshold>,
    /// Advanced policies evaluate per source, combined through `expr`.
    sources: Vec<ExpandedSource>,
    expr: Option<ApprovalExpr>,
}

fn countable(eligible: &[String], ctx: &RequestContext, allow_self_approval: bool) -> Vec<String> {
    eligible
        .iter()
        .filter(|login| allow_self_approval || !same_login(login.as_str(), &ctx.requestor))
        .cloned()
        .collect()
}

fn threshold_met(threshold: Threshold, eligible: usize, approved: usize) -> bool {
    match threshold {
        // An empty eligible set is never vacuously approved.
        Threshold::RequireAll => eligible > 0 && approved == eligible,
        Threshold::MinApprovals(k) => approved >= k as usize,
    }
}

impl ExpandedGroup {
    fn status(
        &self,
        approvals: &[String],
        ctx: &RequestContext,
        allow_self_approval: bool,
    ) -> GroupStatus {
        if let Some(threshold) = self.threshold {
            let eligible = countable(&self.eligible, ctx, allow_self_approval);
            let approved_by: Vec<String> = eligible
                .iter()
                .filter(|login| contains_login(approvals, login.as_str()))
                .cloned()
                .collect();
            let satisfied = threshold_met(threshold, eligible.len(), approved_by.len());
            GroupStatus {
                index: self.index,
                description: self.description.clone(),
                eligible,
                approved_by,
                satisfied,
                sources: Vec::new(),
            }
        } else {
            let mut sources = Vec::new();
            let mut flags = Vec::new();
            for source in &self.sources {
                let eligible = countable(&source.eligible, ctx, allow_self_approval);
                let approved_by: Vec<String> = eligible
                    .iter()
                    .filter(|login| contains_login(approvals, login.as_str()))
                    .cloned()
                    .collect();
                let satisfied = threshold_met(source.threshold, eligible.len(), approved_by.len());
                flags.push(satisfied);
                sources.push(SourceStatus {
                    description: source.description.clone(),
                    eligible,
                    approved_by,
                    satisfied,
                });
            }
            let satisfied = self
                .expr
                .as_ref()
                .map(|e| e.evaluate(&flags))
                .unwrap_or(false);
            let mut approved_by = Vec::new();
            for s in &sources {
                for login in &s.approved_by {
                    push_unique(&mut approved_by, login);
                }
            }
            let eligible = dedup_logins(sources.iter().flat_map(|s| s.eligible.iter().cloned()));
            GroupStatus {
                index: self.index,
                description: self.description.clone(),
                eligible,
                approved_by,
                satisfied,
                sources,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct Evaluator<'a> {
    config: &'a GateConfig,
    teams: &'a dyn TeamResolver,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a GateConfig, teams: &'a dyn TeamResolver) -> Self {
        Self { config, teams }
    }

    pub fn evaluate(
        &self,
        workflow: &WorkflowConfig,
        ctx: &RequestContext,
        comments: &[Comment],
    ) -> Result<ApprovalResult> {
        self.evaluate_requirements(
            &workflow.requirements,
            workflow.allow_self_approval,
            ctx,
            comments,
        )
    }

    /// Evaluate a set of OR-combined requirement groups against the full
    /// comment history.
    ///
    /// A denial from any user eligible for any group is terminal, and the
    /// self-approval rule does not apply to denials: a requestor may always
    /// withdraw their own request. Team resolution failures abort the whole
    /// evaluation.
    pub fn evaluate_requirements(
        &self,
        requirements: &[RequirementConfig],
        allow_self_approval: bool,
        ctx: &RequestContext,
        comments: &[Comment],
    ) -> Result<ApprovalResult> {
        let mut groups = Vec::with_capacity(requirements.len());
        for (index, req) in requirements.iter().enumerate() {
            groups.push(self.expand(index, req)?);
        }

        let mut approvals: Vec<String> = Vec::new();
        let mut denied_by: Option<String> = None;
        for comment in comments {
            match self.config.keywords.classify(&comment.body) {
                Verdict::Approval => push_unique(&mut approvals, &comment.author),
                Verdict::Denial => {
                    let eligible_somewhere = groups
                        .iter()
                        .any(|g| contains_login(&g.eligible, &comment.author));
                    if denied_by.is_none() && eligible_somewhere {
                        denied_by = Some(comment.author.clone());
                    }
                }
                Verdict::Neither => {}
            }
        }

        let group_statuses: Vec<GroupStatus> = groups
            .iter()
            .map(|g| g.status(&approvals, ctx, allow_self_approval))
            .collect();

        if let Some(denied_by) = denied_by {
            return Ok(ApprovalResult {
                status: Status::Denied,
                approvers: Vec::new(),
                satisfied_group: None,
                denied_by: Some(denied_by),
                groups: group_statuses,
            });
        }

        let satisfied_group = group_statuses.iter().position(|g| g.satisfied);
        match satisfied_group {
            Some(index) => Ok(ApprovalResult {
                status: Status::Approved,
                approvers: group_statuses[index].approved_by.clone(),
                satisfied_group: Some(index),
                denied_by: None,
                groups: group_statuses,
            }),
            None => Ok(ApprovalResult {
                status: Status::Pending,
                approvers: Vec::new(),
                satisfied_group: None,
                denied_by: None,
                groups: group_statuses,
            }),
        }
    }

    /// Raw eligible approvers for one requirement (teams expanded, deduped,
    /// requestor included) — used for stage announcements and child-issue
    /// assignees.
    pub fn eligible_approvers(&self, req: &RequirementConfig) -> Result<Vec<String>> {
        Ok(self.expand(0, req)?.eligible)
    }

    fn expand(&self, index: usize, req: &RequirementConfig) -> Result<ExpandedGroup> {
        let description = req.describe();
        match self.config.resolve_requirement(req)? {
            Policy::Simple {
                approvers,
                threshold,
            } => Ok(ExpandedGroup {
                index,
                description,
                eligible: dedup_logins(approvers),
                threshold: Some(threshold),
                sources: Vec::new(),
                expr: None,
            }),
            Policy::Advanced { sources, expr } => {
                let mut expanded = Vec::new();
                let mut union = Vec::new();
                for source in &sources {
                    let members = self.members_of(&source.set)?;
                    let eligible = dedup_logins(members);
                    for login in &eligible {
                        push_unique(&mut union, login);
                    }
                    expanded.push(ExpandedSource {
                        description: source.set.describe(),
                        eligible,
                        threshold: source.threshold,
                    });
                }
                Ok(ExpandedGroup {
                    index,
                    description,
                    eligible: union,
                    threshold: None,
                    sources: expanded,
                    expr: Some(expr),
                })
            }
        }
    }

    fn members_of(&self, set: &ApproverSet) -> Result<Vec<String>> {
        match set {
            ApproverSet::Team(name) => self.teams.team_members(name),
            ApproverSet::User(login) => Ok(vec![login.clone()]),
            ApproverSet::Users(logins) => Ok(logins.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
