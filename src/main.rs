mod command;
mod config;
mod constants;
mod data_mgmt;
mod helpers;
mod readers;
mod scheduler;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use dotenv::dotenv;
use env_logger::Env;

use crate::constants::{defaults, envvars};

const CMD_RUN: &str = "run";
const CMD_CHECK_CONFIG: &str = "check-config";
const CMD_PUBLISH_ONCE: &str = "publish-once";

fn main() -> Result<()> {
    let _ = dotenv();
    env_logger::Builder::from_env(Env::default().filter_or(envvars::LOG_LEVEL, defaults::LOG_LEVEL))
        .init();

    let mut args = pico_args::Arguments::from_env();
    let subcommand = args.subcommand()?;
    let config_path = config_path(&mut args)?;

    match subcommand.as_deref() {
        Some(CMD_RUN) => command::run(&config_path),
        Some(CMD_CHECK_CONFIG) => command::check_config(&config_path),
        Some(CMD_PUBLISH_ONCE) => command::publish_once(&config_path),
        _ => Err(anyhow!(
            "Subcommand must be one of 'run', 'check-config', 'publish-once'"
        )),
    }
}

/// `--config` flag, `AIRNODE_CONFIG` env var, or the packaged default path.
fn config_path(args: &mut pico_args::Arguments) -> Result<PathBuf> {
    if let Some(path) = args.opt_value_from_str("--config")? {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(envvars::CONFIG_PATH) {
        return Ok(PathBuf::from(path));
    }
    Ok(PathBuf::from(defaults::CONFIG_PATH))
}
