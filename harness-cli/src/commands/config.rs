//! Print and load harness configuration.

use anyhow::{Context, Result};
use chaos_tests::HarnessConfig;
use std::path::Path;

/// The default config rendered as TOML.
pub fn default_toml() -> Result<String> {
    HarnessConfig::default()
        .to_toml()
        .context("Failed to render default config")
}

/// Load the config at `path`.
pub fn load(path: &Path) -> Result<HarnessConfig> {
    HarnessConfig::from_file(path)
        .with_context(|| format!("Failed to load harness config {}", path.display()))
}
