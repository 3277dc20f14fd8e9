use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use shipgate_core::comment::Comment;
use shipgate_core::context::RequestContext;
use shipgate_core::eval::ConfigTeams;
use shipgate_core::pipeline::{Pipeline, PipelineEvent};
use shipgate_core::state::IssueState;
use shipgate_core::workflow::GateConfig;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum PipelineSubcommand {
    /// Create a request: embed state and advance the auto-approve prefix
    Init {
        /// Issue body file (created if missing)
        body: PathBuf,

        /// Workflow driving this request
        #[arg(long)]
        workflow: String,

        /// Version being released
        #[arg(long)]
        release_version: String,

        /// Requesting user
        #[arg(long)]
        requestor: String,

        /// Previous release ref for strategies that diff against it
        #[arg(long)]
        previous_ref: Option<String>,
    },

    /// Show the pipeline cursor and stage history
    Status {
        /// Issue body file
        body: PathBuf,
    },

    /// Evaluate the active stage against a comment transcript and apply the
    /// outcome
    Eval {
        /// Issue body file
        body: PathBuf,

        /// JSON file holding the comment history
        #[arg(long)]
        comments: PathBuf,

        /// Run identifier (defaults to a fresh UUID)
        #[arg(long)]
        run_id: Option<String>,
    },
}

pub fn run(config: &Path, subcommand: PipelineSubcommand, json: bool) -> anyhow::Result<()> {
    let cfg = GateConfig::load(config)
        .with_context(|| format!("failed to load {}", config.display()))?;

    match subcommand {
        PipelineSubcommand::Init {
            body,
            workflow,
            release_version,
            requestor,
            previous_ref,
        } => {
            let teams = ConfigTeams(&cfg.teams);
            let pipeline = Pipeline::new(&cfg, &workflow, &teams)?;
            let mut state = IssueState::new(workflow, release_version, requestor);
            state.previous_ref = previous_ref;
            let (state, events) = pipeline.initialize(state)?;

            let text = if body.exists() {
                std::fs::read_to_string(&body)
                    .with_context(|| format!("failed to read {}", body.display()))?
            } else {
                String::new()
            };
            let updated = IssueState::update(&text, &state)?;
            std::fs::write(&body, updated)
                .with_context(|| format!("failed to write {}", body.display()))?;

            report(&state, &events, json)
        }
        PipelineSubcommand::Status { body } => {
            let text = std::fs::read_to_string(&body)
                .with_context(|| format!("failed to read {}", body.display()))?;
            let state = IssueState::parse(&text)?;
            if json {
                print_json(&state)?;
                return Ok(());
            }
            println!(
                "workflow {} — version {} — requested by {}",
                state.workflow, state.version, state.requestor
            );
            for record in &state.stages {
                let suffix = if record.auto { " (auto)" } else { "" };
                println!(
                    "  done: {} by {}{suffix}",
                    record.stage,
                    record.approved_by.join(", ")
                );
            }
            if state.complete {
                println!("complete");
            } else if let Some(wf) = cfg.workflows.get(&state.workflow) {
                if let Some(pipeline) = &wf.pipeline {
                    for stage in pipeline.stages.iter().skip(state.current_stage) {
                        match &stage.environment {
                            Some(env) => println!("  todo: {} ({env})", stage.name),
                            None => println!("  todo: {}", stage.name),
                        }
                    }
                }
            }
            Ok(())
        }
        PipelineSubcommand::Eval {
            body,
            comments,
            run_id,
        } => {
            let text = std::fs::read_to_string(&body)
                .with_context(|| format!("failed to read {}", body.display()))?;
            let state = IssueState::parse(&text)?;

            let data = std::fs::read_to_string(&comments)
                .with_context(|| format!("failed to read {}", comments.display()))?;
            let history: Vec<Comment> =
                serde_json::from_str(&data).context("failed to parse comment transcript")?;

            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let ctx = RequestContext::new(state.requestor.clone(), run_id);

            let workflow_name = state.workflow.clone();
            let teams = ConfigTeams(&cfg.teams);
            let pipeline = Pipeline::new(&cfg, &workflow_name, &teams)?;
            let result = pipeline.evaluate_stage(&state, &ctx, &history)?;
            let (state, events) = pipeline.apply(state, &result)?;

            let updated = IssueState::update(&text, &state)?;
            std::fs::write(&body, updated)
                .with_context(|| format!("failed to write {}", body.display()))?;

            if !json {
                println!("stage status: {}", result.status);
            }
            report(&state, &events, json)
        }
    }
}

fn report(state: &IssueState, events: &[PipelineEvent], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&serde_json::json!({ "state": state, "events": events }));
    }
    for event in events {
        match event {
            PipelineEvent::StageApproved {
                stage,
                approved_by,
                auto,
            } => {
                let suffix = if *auto { " (auto)" } else { "" };
                println!("stage '{stage}' approved by {}{suffix}", approved_by.join(", "));
            }
            PipelineEvent::StageReady { stage, approvers } => {
                println!(
                    "stage '{stage}' awaiting approval from {}",
                    approvers.join(", ")
                );
            }
            PipelineEvent::OpenChildIssue { stage, assignees } => {
                println!(
                    "open a child issue for stage '{stage}' (assignees: {})",
                    assignees.join(", ")
                );
            }
            PipelineEvent::CreateTag { name } => println!("create tag {name}"),
            PipelineEvent::StageDenied { stage, denied_by } => match denied_by {
                Some(user) => println!("stage '{stage}' denied by {user}"),
                None => println!("stage '{stage}' denied"),
            },
            PipelineEvent::CloseChildIssues { stages } => {
                println!("close child issues for stages: {}", stages.join(", "));
            }
            PipelineEvent::ChildReopened {
                stage,
                issue,
                warning,
            } => println!("reopen child issue #{issue} for stage '{stage}': {warning}"),
            PipelineEvent::Complete { version } => println!("pipeline complete for {version}"),
        }
    }
    Ok(())
}
