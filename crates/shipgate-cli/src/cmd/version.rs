use crate::output::print_json;
use clap::Subcommand;
use shipgate_core::version::{IncrementKind, SemverIncrementer, VersionIncrementer};
use std::str::FromStr;

#[derive(Subcommand)]
pub enum VersionSubcommand {
    /// Compute the next version from the current one
    Next {
        /// Current version (e.g. 1.2.3 or v1.2.3)
        current: String,

        /// Increment kind: major, minor, or patch
        #[arg(long, default_value = "minor")]
        increment: String,
    },

    /// Check that a version is well-formed
    #[command(disable_version_flag = true)]
    Check {
        /// Version to check
        version: String,

        /// Accept -prerelease suffixes
        #[arg(long)]
        allow_prerelease: bool,
    },
}

pub fn run(subcommand: VersionSubcommand, json: bool) -> anyhow::Result<()> {
    let incrementer = SemverIncrementer;
    match subcommand {
        VersionSubcommand::Next { current, increment } => {
            let kind = IncrementKind::from_str(&increment)?;
            let next = incrementer.next_version(&current, kind)?;
            if json {
                print_json(&serde_json::json!({ "current": current, "next": next }))?;
            } else {
                println!("{next}");
            }
            Ok(())
        }
        VersionSubcommand::Check {
            version,
            allow_prerelease,
        } => {
            incrementer.validate(&version, allow_prerelease)?;
            if json {
                print_json(&serde_json::json!({ "version": version, "valid": true }))?;
            } else {
                println!("ok");
            }
            Ok(())
        }
    }
}
