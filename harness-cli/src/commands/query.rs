//! Query one pool.

use anyhow::{Context, Result};
use harness_client::{ControlPlane, DmgControlPlane};
use harness_types::PoolLabel;
use std::path::Path;

use super::config;

/// Run the pool-query command.
pub async fn run(config_path: &Path, pool: &str) -> Result<()> {
    let config = config::load(config_path)?;
    let control = DmgControlPlane::new(config.cluster.to_dmg_config());
    let label = PoolLabel::new(pool);

    let status = control
        .query_pool(&label)
        .await
        .with_context(|| format!("Failed to query pool {}", label))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
