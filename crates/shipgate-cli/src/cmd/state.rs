use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use shipgate_core::state::IssueState;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum StateSubcommand {
    /// Print the embedded snapshot from an issue body file
    Show {
        /// Issue body file
        body: PathBuf,
    },

    /// Embed a fresh snapshot into an issue body file
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
    },
}

pub fn run(subcommand: StateSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        StateSubcommand::Show { body } => {
            let text = std::fs::read_to_string(&body)
                .with_context(|| format!("failed to read {}", body.display()))?;
            let state = IssueState::parse(&text)?;
            if json {
                print_json(&state)?;
            } else {
                println!("workflow: {}", state.workflow);
                println!("version: {}", state.version);
                println!("requestor: {}", state.requestor);
                println!("stage: {}", state.current_stage);
                println!("complete: {}", state.complete);
            }
            Ok(())
        }
        StateSubcommand::Init {
            body,
            workflow,
            release_version,
            requestor,
        } => {
            let text = if body.exists() {
                std::fs::read_to_string(&body)
                    .with_context(|| format!("failed to read {}", body.display()))?
            } else {
                String::new()
            };
            let state = IssueState::new(workflow, release_version, requestor);
            let updated = IssueState::update(&text, &state)?;
            std::fs::write(&body, updated)
                .with_context(|| format!("failed to write {}", body.display()))?;
            if json {
                print_json(&state)?;
            } else {
                println!("initialized state in {}", body.display());
            }
            Ok(())
        }
    }
}
