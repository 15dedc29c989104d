//! CLI command implementations.
//!
//! Each submodule implements a podlaunch CLI command with formatting kept in
//! pure functions for testability.

pub mod check;
pub mod list;
pub mod port;
pub mod start;
pub mod status;
pub mod stop;
pub mod version;

use anyhow::{Context, Result};
use std::path::Path;

use podlaunch::config::Config;
use podlaunch::RuntimeClient;

/// Loads `--config` if given, otherwise discovers configuration from the
/// working directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)
        }
    }
}

/// Connects to `--endpoint` if given, otherwise to the configured endpoint.
pub async fn connect(config: &Config, endpoint: Option<&str>) -> Result<RuntimeClient> {
    let endpoint = endpoint.unwrap_or(&config.runtime.endpoint);
    RuntimeClient::connect_with(
        endpoint,
        config.connect_timeout(),
        &config.runtime.pause_image,
    )
    .await
    .with_context(|| format!("Failed to connect to runtime at {endpoint}"))
}

/// First 12 characters of a runtime id.
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
