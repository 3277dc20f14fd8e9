use crate::comment::Comment;
use crate::error::Result;
use crate::eval::ApprovalResult;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// PollConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// wait_for_decision
// ---------------------------------------------------------------------------

/// Re-evaluate on a fixed interval until a terminal status or the deadline.
///
/// `fetch_comments` is the injected I/O boundary (the helper itself performs
/// none); `evaluate` is typically a closure over an `Evaluator` and request
/// context. At the deadline the last (Pending) result is returned so callers
/// still get full group diagnostics.
pub fn wait_for_decision<F, E>(
    cfg: &PollConfig,
    mut fetch_comments: F,
    mut evaluate: E,
) -> Result<ApprovalResult>
where
    F: FnMut() -> Result<Vec<Comment>>,
    E: FnMut(&[Comment]) -> Result<ApprovalResult>,
{
    let deadline = Instant::now() + cfg.timeout;
    loop {
        let comments = fetch_comments()?;
        let result = evaluate(&comments)?;
        if result.status.is_terminal() {
            return Ok(result);
        }
        if Instant::now() + cfg.interval >= deadline {
            return Ok(result);
        }
        std::thread::sleep(cfg.interval);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::eval::{ConfigTeams, Evaluator, Status};
    use crate::workflow::GateConfig;
    use std::cell::Cell;

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    fn cfg() -> GateConfig {
        GateConfig::from_yaml(
            r#"
workflows:
  deploy:
    allow_self_approval: true
    requirements:
      - approvers: [alice]
"#,
        )
        .unwrap()
    }

    #[test]
    fn returns_once_terminal() {
        let cfg = cfg();
        let teams = ConfigTeams(&cfg.teams);
        let evaluator = Evaluator::new(&cfg, &teams);
        let ctx = RequestContext::new("zoe", "run-1");
        let workflow = cfg.workflow("deploy").unwrap();

        let calls = Cell::new(0u32);
        let result = wait_for_decision(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                // The approval arrives on the third poll.
                if calls.get() >= 3 {
                    Ok(vec![Comment::new("alice", "approve")])
                } else {
                    Ok(Vec::new())
                }
            },
            |comments| evaluator.evaluate(workflow, &ctx, comments),
        )
        .unwrap();

        assert_eq!(result.status, Status::Approved);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn deadline_returns_last_pending_result() {
        let cfg = cfg();
        let teams = ConfigTeams(&cfg.teams);
        let evaluator = Evaluator::new(&cfg, &teams);
        let ctx = RequestContext::new("zoe", "run-1");
        let workflow = cfg.workflow("deploy").unwrap();

        let result = wait_for_decision(
            &fast(),
            || Ok(Vec::new()),
            |comments| evaluator.evaluate(workflow, &ctx, comments),
        )
        .unwrap();

        assert_eq!(result.status, Status::Pending);
        assert_eq!(result.groups.len(), 1);
    }

    #[test]
    fn fetch_error_propagates() {
        let result = wait_for_decision(
            &fast(),
            || {
                Err(crate::error::ShipgateError::Collaborator {
                    operation: "fetching comments".to_string(),
                    reason: "network unreachable".to_string(),
                })
            },
            |_| unreachable!("evaluate must not run when fetch fails"),
        );
        assert!(result.is_err());
    }
}
