use crate::output::print_json;
use shipgate_core::classifier::Classifier;
use shipgate_core::workflow::GateConfig;
use shipgate_core::ShipgateError;
use std::path::Path;

pub fn run(config: &Path, body: &str, json: bool) -> anyhow::Result<()> {
    // No config file means the default keyword sets.
    let keywords = match GateConfig::load(config) {
        Ok(cfg) => cfg.keywords,
        Err(ShipgateError::ConfigNotFound(_)) => Classifier::default(),
        Err(e) => return Err(e.into()),
    };

    let verdict = keywords.classify(body);
    if json {
        print_json(&serde_json::json!({ "verdict": verdict }))?;
    } else {
        println!("{verdict}");
    }
    Ok(())
}
