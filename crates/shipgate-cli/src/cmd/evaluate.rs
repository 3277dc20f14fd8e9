use crate::output::print_json;
use anyhow::Context;
use shipgate_core::comment::Comment;
use shipgate_core::context::RequestContext;
use shipgate_core::eval::{ConfigTeams, Evaluator, Status};
use shipgate_core::workflow::GateConfig;
use std::path::Path;

pub fn run(
    config: &Path,
    workflow_name: &str,
    requestor: &str,
    comments_path: &Path,
    run_id: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = GateConfig::load(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    let data = std::fs::read_to_string(comments_path)
        .with_context(|| format!("failed to read {}", comments_path.display()))?;
    let comments: Vec<Comment> =
        serde_json::from_str(&data).context("failed to parse comment transcript")?;

    let run_id = run_id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ctx = RequestContext::new(requestor, run_id);

    let workflow = cfg.workflow(workflow_name)?;
    let teams = ConfigTeams(&cfg.teams);
    let result = Evaluator::new(&cfg, &teams).evaluate(workflow, &ctx, &comments)?;

    if json {
        print_json(&result)?;
        return Ok(());
    }

    println!("status: {}", result.status);
    if let Some(denied_by) = &result.denied_by {
        println!("denied by: {denied_by}");
    }
    if !result.approvers.is_empty() {
        println!("approved by: {}", result.approvers.join(", "));
    }
    for group in &result.groups {
        let mark = if group.satisfied { "x" } else { " " };
        println!(
            "  [{mark}] {} ({}/{} approvals)",
            group.description,
            group.approved_by.len(),
            group.eligible.len()
        );
        for source in &group.sources {
            let mark = if source.satisfied { "x" } else { " " };
            println!(
                "      [{mark}] {} ({}/{})",
                source.description,
                source.approved_by.len(),
                source.eligible.len()
            );
        }
    }

    match result.status {
        Status::Approved => {
            if let Some(msg) = &workflow.on_approve {
                println!("{msg}");
            }
        }
        Status::Denied => {
            if let Some(msg) = &workflow.on_deny {
                println!("{msg}");
            }
            if workflow.close_on_deny {
                println!("close the request issue");
            }
        }
        Status::Pending => {}
    }
    Ok(())
}
