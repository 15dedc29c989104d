use anyhow::Result;
use colored::Colorize;

use podlaunch::config::Config;
use podlaunch::runtime::VersionInfo;

pub async fn run(config: &Config, endpoint: Option<&str>) -> Result<()> {
    let client = super::connect(config, endpoint).await?;
    let version = client.version().await?;
    println!("{}", format_version(client.endpoint(), &version));
    Ok(())
}

fn format_version(endpoint: &str, version: &VersionInfo) -> String {
    format!(
        "{} {} {} (API {}) at {}",
        "Runtime:".bold(),
        version.runtime_name.cyan(),
        version.runtime_version.cyan(),
        version.runtime_api_version,
        endpoint
    )
}
