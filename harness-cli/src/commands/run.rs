//! Run scenarios.

use anyhow::Result;
use chaos_tests::{ScenarioDriver, ScenarioKind, ScenarioReport};
use std::path::Path;

use super::config;

/// Run the scenarios in order. Returns true if every scenario passed.
pub async fn run(config_path: &Path, scenarios: &[ScenarioKind], json: bool) -> Result<bool> {
    let config = config::load(config_path)?;
    let mut driver = ScenarioDriver::for_cluster(config);

    let mut reports = Vec::with_capacity(scenarios.len());
    for kind in scenarios {
        let report = driver.run(*kind).await;
        if !json {
            println!("{}", report);
        }
        reports.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("{}", summary(&reports));
    }
    Ok(reports.iter().all(|r| r.passed))
}

fn summary(reports: &[ScenarioReport]) -> String {
    let failed: Vec<String> = reports
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.kind.to_string())
        .collect();
    if failed.is_empty() {
        format!("{} scenario(s) passed", reports.len())
    } else {
        format!(
            "{}/{} scenario(s) failed: {}",
            failed.len(),
            reports.len(),
            failed.join(", ")
        )
    }
}
