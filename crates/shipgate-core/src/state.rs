use crate::error::{Result, ShipgateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot markers
// ---------------------------------------------------------------------------

/// The snapshot is embedded verbatim between these markers inside the
/// human-readable issue body. Everything outside them is preserved exactly
/// on update.
pub const MARKER_START: &str = "<!-- shipgate:state:start -->";
pub const MARKER_END: &str = "<!-- shipgate:state:end -->";

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Sentinel approver recorded for stages advanced without human interaction.
pub const AUTO_APPROVER: &str = "[auto]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub approved_by: Vec<String>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub auto: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildIssueStatus {
    Open,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildIssueRef {
    pub stage: String,
    pub issue: u64,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub status: ChildIssueStatus,
}

// ---------------------------------------------------------------------------
// IssueState
// ---------------------------------------------------------------------------

/// The sole persisted snapshot of one in-flight release request.
///
/// Created at request time, mutated only through explicit pipeline
/// transitions, and round-tripped wholesale through the issue body. New
/// fields must be `#[serde(default)]` so older snapshots keep parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueState {
    #[serde(default = "default_schema")]
    pub schema: u32,
    pub workflow: String,
    pub version: String,
    pub requestor: String,
    #[serde(default)]
    pub current_stage: usize,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub auto_approved: Vec<String>,
    #[serde(default)]
    pub children: Vec<ChildIssueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_ref: Option<String>,
    #[serde(default)]
    pub complete: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_schema() -> u32 {
    1
}

impl IssueState {
    pub fn new(
        workflow: impl Into<String>,
        version: impl Into<String>,
        requestor: impl Into<String>,
    ) -> Self {
        Self {
            schema: 1,
            workflow: workflow.into(),
            version: version.into(),
            requestor: requestor.into(),
            current_stage: 0,
            stages: Vec::new(),
            auto_approved: Vec::new(),
            children: Vec::new(),
            previous_ref: None,
            complete: false,
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot codec
    // -----------------------------------------------------------------------

    /// Extract the embedded snapshot from an issue body.
    ///
    /// A body without the marker block is not one of ours
    /// (`MissingSnapshot`); a marker block with unparseable JSON is
    /// `CorruptSnapshot`.
    pub fn parse(body: &str) -> Result<Self> {
        let (start, end) = find_markers(body).ok_or(ShipgateError::MissingSnapshot)?;
        let raw = &body[start..end];
        serde_json::from_str(raw.trim())
            .map_err(|e| ShipgateError::CorruptSnapshot(e.to_string()))
    }

    /// Rewrite the embedded snapshot, preserving all surrounding body
    /// content verbatim. A body with no marker block yet gets one appended.
    pub fn update(body: &str, state: &IssueState) -> Result<String> {
        let json = serde_json::to_string_pretty(state)?;
        match find_markers(body) {
            Some((start, end)) => {
                let mut updated = String::with_capacity(body.len() + json.len());
                updated.push_str(&body[..start]);
                updated.push('\n');
                updated.push_str(&json);
                updated.push('\n');
                updated.push_str(&body[end..]);
                Ok(updated)
            }
            None => {
                let sep = if body.is_empty() || body.ends_with('\n') {
                    "\n"
                } else {
                    "\n\n"
                };
                Ok(format!("{body}{sep}{MARKER_START}\n{json}\n{MARKER_END}\n"))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn child_for_stage(&self, stage: &str) -> Option<&ChildIssueRef> {
        self.children.iter().find(|c| c.stage == stage)
    }

    pub fn last_completed(&self) -> Option<&StageRecord> {
        self.stages.last()
    }

    // -----------------------------------------------------------------------
    // Mutations (pipeline transitions only)
    // -----------------------------------------------------------------------

    pub(crate) fn record_completion(&mut self, stage: &str, approved_by: Vec<String>, auto: bool) {
        self.stages.push(StageRecord {
            stage: stage.to_string(),
            approved_by,
            completed_at: Utc::now(),
            auto,
        });
        if auto {
            self.auto_approved.push(stage.to_string());
        }
        self.current_stage += 1;
        self.updated_at = Utc::now();
    }

    pub(crate) fn record_child(&mut self, stage: &str, issue: u64, assignees: Vec<String>) {
        self.children.retain(|c| c.stage != stage);
        self.children.push(ChildIssueRef {
            stage: stage.to_string(),
            issue,
            assignees,
            status: ChildIssueStatus::Open,
        });
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_child_status(&mut self, stage: &str, status: ChildIssueStatus) {
        if let Some(child) = self.children.iter_mut().find(|c| c.stage == stage) {
            child.status = status;
        }
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
        self.updated_at = Utc::now();
    }
}

/// Byte offsets of the content between the markers: (end of start marker,
/// start of end marker).
fn find_markers(body: &str) -> Option<(usize, usize)> {
    let start_pos = body.find(MARKER_START)?;
    let content_start = start_pos + MARKER_START.len();
    let end_offset = body[content_start..].find(MARKER_END)?;
    Some((content_start, content_start + end_offset))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> IssueState {
        let mut state = IssueState::new("deploy", "1.2.0", "alice");
        state.record_completion("dev", vec![AUTO_APPROVER.to_string()], true);
        state.record_child("staging", 421, vec!["bob".to_string()]);
        state.previous_ref = Some("v1.1.0".to_string());
        state
    }

    #[test]
    fn update_then_parse_roundtrips() {
        let state = sample_state();
        let body = "# Release 1.2.0\n\nRequested by @alice.\n";
        let updated = IssueState::update(body, &state).unwrap();

        let parsed = IssueState::parse(&updated).unwrap();
        assert_eq!(parsed, state);
        // Surrounding content preserved
        assert!(updated.starts_with("# Release 1.2.0\n\nRequested by @alice.\n"));
    }

    #[test]
    fn update_replaces_in_place() {
        let state = sample_state();
        let body = format!(
            "intro\n{MARKER_START}\n{{}}\n{MARKER_END}\nfooter text\n"
        );
        let updated = IssueState::update(&body, &state).unwrap();

        assert!(updated.starts_with("intro\n"));
        assert!(updated.ends_with("footer text\n"));
        assert_eq!(updated.matches(MARKER_START).count(), 1);
        assert_eq!(IssueState::parse(&updated).unwrap(), state);
    }

    #[test]
    fn repeated_updates_do_not_grow_the_body() {
        let mut state = sample_state();
        let mut body = IssueState::update("release notes", &state).unwrap();
        state.record_completion("staging", vec!["bob".to_string()], false);
        body = IssueState::update(&body, &state).unwrap();
        body = IssueState::update(&body, &state).unwrap();

        assert_eq!(body.matches(MARKER_START).count(), 1);
        assert_eq!(body.matches(MARKER_END).count(), 1);
        assert_eq!(IssueState::parse(&body).unwrap(), state);
    }

    #[test]
    fn parse_without_markers_is_missing_snapshot() {
        let err = IssueState::parse("just a regular issue body").unwrap_err();
        assert!(matches!(err, ShipgateError::MissingSnapshot));
    }

    #[test]
    fn parse_with_bad_json_is_corrupt() {
        let body = format!("{MARKER_START}\nnot json\n{MARKER_END}");
        let err = IssueState::parse(&body).unwrap_err();
        assert!(matches!(err, ShipgateError::CorruptSnapshot(_)));
    }

    #[test]
    fn unknown_fields_tolerated_for_forward_compat() {
        let state = sample_state();
        let mut value = serde_json::to_value(&state).unwrap();
        value["some_future_field"] = serde_json::json!({"nested": true});
        let body = format!("{MARKER_START}\n{value}\n{MARKER_END}");
        let parsed = IssueState::parse(&body).unwrap();
        assert_eq!(parsed.workflow, "deploy");
    }

    #[test]
    fn missing_optional_fields_default() {
        let body = format!(
            "{MARKER_START}\n{{\"workflow\":\"deploy\",\"version\":\"1.0.0\",\
             \"requestor\":\"alice\",\"updated_at\":\"2026-01-10T00:00:00Z\"}}\n{MARKER_END}"
        );
        let parsed = IssueState::parse(&body).unwrap();
        assert_eq!(parsed.schema, 1);
        assert_eq!(parsed.current_stage, 0);
        assert!(parsed.stages.is_empty());
        assert!(!parsed.complete);
    }

    #[test]
    fn record_completion_tracks_auto_stages() {
        let mut state = IssueState::new("deploy", "1.0.0", "alice");
        state.record_completion("dev", vec![AUTO_APPROVER.to_string()], true);
        state.record_completion("staging", vec!["bob".to_string()], false);

        assert_eq!(state.current_stage, 2);
        assert_eq!(state.auto_approved, vec!["dev"]);
        assert_eq!(state.stages[1].approved_by, vec!["bob"]);
        assert!(!state.stages[1].auto);
    }

    #[test]
    fn record_child_replaces_existing_stage_entry() {
        let mut state = IssueState::new("deploy", "1.0.0", "alice");
        state.record_child("staging", 1, vec![]);
        state.record_child("staging", 2, vec!["bob".to_string()]);

        assert_eq!(state.children.len(), 1);
        assert_eq!(state.children[0].issue, 2);
    }
}
