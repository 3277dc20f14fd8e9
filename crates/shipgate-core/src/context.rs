use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-request context passed explicitly into evaluation.
///
/// Carries everything the engine would otherwise have to read from the
/// process environment (requestor login, automation run id, repository URL),
/// so evaluations stay testable with synthetic contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub requestor: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
}

impl RequestContext {
    pub fn new(requestor: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            requestor: requestor.into(),
            run_id: run_id.into(),
            repo_url: None,
        }
    }

    pub fn with_repo_url(mut self, url: impl Into<String>) -> Self {
        self.repo_url = Some(url.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let ctx = RequestContext::new("alice", "run-7").with_repo_url("https://example.test/repo");
        assert_eq!(ctx.requestor, "alice");
        assert_eq!(ctx.run_id, "run-7");
        assert_eq!(ctx.repo_url.as_deref(), Some("https://example.test/repo"));
    }

    #[test]
    fn repo_url_omitted_from_serialization() {
        let ctx = RequestContext::new("alice", "run-7");
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(!json.contains("repo_url"));
    }
}
