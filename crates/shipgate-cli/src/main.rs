mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{pipeline::PipelineSubcommand, state::StateSubcommand, version::VersionSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shipgate",
    about = "Release approval gates — evaluate approval policies and drive staged release pipelines",
    version,
    propagate_version = true
)]
struct Cli {
    /// Gate configuration file
    #[arg(
        long,
        global = true,
        env = "SHIPGATE_CONFIG",
        default_value = ".shipgate.yaml"
    )]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the gate configuration
    Validate,

    /// Classify a comment body as approval, denial, or neither
    Classify {
        /// The comment body
        body: String,
    },

    /// Evaluate a workflow's approval gates against a comment transcript
    Evaluate {
        /// Workflow name
        workflow: String,

        /// Requesting user
        #[arg(long)]
        requestor: String,

        /// JSON file holding the comment history
        #[arg(long)]
        comments: PathBuf,

        /// Run identifier (defaults to a fresh UUID)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Inspect or create embedded state snapshots
    State {
        #[command(subcommand)]
        subcommand: StateSubcommand,
    },

    /// Compute or check release versions
    Version {
        #[command(subcommand)]
        subcommand: VersionSubcommand,
    },

    /// Drive a staged release pipeline through an issue body file
    Pipeline {
        #[command(subcommand)]
        subcommand: PipelineSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Validate => cmd::validate::run(&cli.config, cli.json),
        Commands::Classify { body } => cmd::classify::run(&cli.config, &body, cli.json),
        Commands::Evaluate {
            workflow,
            requestor,
            comments,
            run_id,
        } => cmd::evaluate::run(
            &cli.config,
            &workflow,
            &requestor,
            &comments,
            run_id.as_deref(),
            cli.json,
        ),
        Commands::State { subcommand } => cmd::state::run(subcommand, cli.json),
        Commands::Version { subcommand } => cmd::version::run(subcommand, cli.json),
        Commands::Pipeline { subcommand } => cmd::pipeline::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
