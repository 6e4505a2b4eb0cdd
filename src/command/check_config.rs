use std::path::Path;

use anyhow::Result;

use crate::config;

/// Parse and validate the config file, then print the effective settings.
pub fn check_config(config_path: &Path) -> Result<()> {
    let config = config::load(config_path)?;
    config.log_summary();
    log::info!("config OK: {}", config_path.display());
    Ok(())
}
