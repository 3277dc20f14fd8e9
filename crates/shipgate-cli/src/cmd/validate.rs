use crate::output::{print_json, print_table};
use anyhow::Context;
use shipgate_core::workflow::{FindingLevel, GateConfig};
use std::path::Path;

pub fn run(config: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = GateConfig::load(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    let findings = cfg.validate();

    if json {
        print_json(&findings)?;
    } else if findings.is_empty() {
        println!(
            "ok: {} policies, {} workflows",
            cfg.policies.len(),
            cfg.workflows.len()
        );
    } else {
        print_table(
            &["LEVEL", "MESSAGE"],
            findings
                .iter()
                .map(|f| vec![f.level.to_string(), f.message.clone()])
                .collect(),
        );
    }

    let errors = findings
        .iter()
        .filter(|f| f.level == FindingLevel::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("{errors} configuration error(s)");
    }
    Ok(())
}
