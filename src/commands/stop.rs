use anyhow::{Context, Result};
use colored::Colorize;

use podlaunch::config::Config;

/// Stops and removes a sandbox started earlier, e.g. with `start --detach`.
pub async fn run(config: &Config, endpoint: Option<&str>, sandbox_id: &str) -> Result<()> {
    let client = super::connect(config, endpoint).await?;
    client
        .teardown_sandbox(sandbox_id)
        .await
        .with_context(|| format!("Failed to stop sandbox {sandbox_id}"))?;

    println!(
        "{} Sandbox {} stopped and removed.",
        "✓".green(),
        super::short_id(sandbox_id).cyan()
    );
    Ok(())
}
