//! Start a workload and, unless detached, stop it on Ctrl+C.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fmt::Write;
use tracing::info;

use podlaunch::config::Config;
use podlaunch::{Orchestrator, PortAllocator, WorkloadConfig};

/// Command-line overrides applied on top of the `[workload]` section.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub image: Option<String>,
    pub server_type: Option<String>,
    pub host_port: Option<u32>,
    pub env: Vec<String>,
    pub command: Option<String>,
    pub uid: Option<String>,
    pub random_uid: bool,
    pub detach: bool,
}

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

pub async fn run(mut config: Config, endpoint: Option<&str>, options: StartOptions) -> Result<()> {
    apply_overrides(&mut config.workload, &options)?;
    config.validate()?;

    let client = super::connect(&config, endpoint).await?;
    let allocator = PortAllocator::new().with_bind_probe(config.ports.probe_local_bind);
    let orchestrator = Orchestrator::with_settings(client, config.orchestrator_settings())
        .with_port_allocator(allocator);

    let handle = orchestrator
        .start(Some(config.workload.clone()))
        .await
        .context("Failed to start workload")?;

    print!(
        "{}",
        format_started(
            handle.config(),
            handle.sandbox_id(),
            handle.container_id(),
            orchestrator.client().endpoint(),
        )
    );

    if options.detach {
        print!("{}", format_detached(handle.sandbox_id()));
        return Ok(());
    }

    println!("  Press {} to stop.\n", "Ctrl+C".yellow());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Interrupted, stopping workload");
    let sandbox_id = handle.sandbox_id().to_string();
    handle
        .stop()
        .await
        .with_context(|| format!("Failed to stop sandbox {sandbox_id}"))?;

    println!("\n{} Workload stopped.", "✓".green());
    Ok(())
}

// -----------------------------------------------------------------------------
// Helper functions
// -----------------------------------------------------------------------------

fn apply_overrides(workload: &mut WorkloadConfig, options: &StartOptions) -> Result<()> {
    if let Some(image) = &options.image {
        workload.image.clone_from(image);
    }
    if let Some(server_type) = &options.server_type {
        workload.server_type.clone_from(server_type);
    }
    if let Some(port) = options.host_port {
        workload.host_port = port;
    }
    if let Some(uid) = &options.uid {
        workload.uid.clone_from(uid);
    } else if options.random_uid {
        workload.uid = uuid::Uuid::new_v4().to_string();
    }
    for pair in &options.env {
        let (key, value) = parse_env_pair(pair)?;
        workload.extra_env.insert(key, value);
    }
    if let Some(command) = &options.command {
        workload.command = shell_words::split(command)
            .with_context(|| format!("Invalid --command: {command}"))?;
    }
    Ok(())
}

/// Splits `KEY=VALUE` on the first `=`.
fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Invalid --env '{pair}': expected KEY=VALUE"),
    }
}

fn format_started(
    config: &WorkloadConfig,
    sandbox_id: &str,
    container_id: &str,
    endpoint: &str,
) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🚀 Workload Running".green().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "  Runtime:    {}", endpoint.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Pod:        {}",
        format!("{}/{}", config.namespace, config.pod_name).cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Image:      {}", config.image.cyan()).unwrap();
    writeln!(&mut out, "  Sandbox:    {}", sandbox_id.cyan()).unwrap();
    writeln!(&mut out, "  Container:  {}", container_id.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Port:       {}",
        format!("{} -> {}", config.host_port, config.container_port).cyan()
    )
    .unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    out
}

fn format_detached(sandbox_id: &str) -> String {
    format!(
        "  Detached. Run {} to stop it.\n",
        format!("podlaunch stop {sandbox_id}").green()
    )
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("MEMORY=2G").unwrap(),
            ("MEMORY".to_string(), "2G".to_string())
        );
        assert_eq!(
            parse_env_pair("JVM_OPTS=-Dfoo=bar").unwrap(),
            ("JVM_OPTS".to_string(), "-Dfoo=bar".to_string())
        );
        assert_eq!(
            parse_env_pair("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_pair("NOVALUE").is_err());
        assert!(parse_env_pair("=value").is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut workload = WorkloadConfig::default();
        let options = StartOptions {
            image: Some("docker.io/itzg/minecraft-server:java21".to_string()),
            host_port: Some(0),
            env: vec!["MEMORY=2G".to_string(), "EULA=FALSE".to_string()],
            command: Some("/start --nogui 'level name'".to_string()),
            uid: Some("abc".to_string()),
            random_uid: true,
            ..Default::default()
        };

        apply_overrides(&mut workload, &options).unwrap();
        assert_eq!(workload.image, "docker.io/itzg/minecraft-server:java21");
        assert_eq!(workload.host_port, 0);
        assert_eq!(workload.uid, "abc");
        assert_eq!(workload.extra_env.len(), 2);
        assert_eq!(workload.command, vec!["/start", "--nogui", "level name"]);
    }

    #[test]
    fn test_random_uid() {
        let mut workload = WorkloadConfig::default();
        let options = StartOptions {
            random_uid: true,
            ..Default::default()
        };
        apply_overrides(&mut workload, &options).unwrap();
        assert_ne!(workload.uid, "minecraft-123");
        assert_eq!(workload.uid.len(), 36);
    }

    #[test]
    fn test_bad_command_rejected() {
        let mut workload = WorkloadConfig::default();
        let options = StartOptions {
            command: Some("/start 'unterminated".to_string()),
            ..Default::default()
        };
        assert!(apply_overrides(&mut workload, &options).is_err());
    }

    #[test]
    fn test_format_started() {
        let config = WorkloadConfig {
            host_port: 31337,
            ..Default::default()
        };
        let output = format_started(&config, "sandbox-1", "container-2", "mock");
        assert!(output.contains("default/minecraft-pod"));
        assert!(output.contains("sandbox-1"));
        assert!(output.contains("container-2"));
        assert!(output.contains("31337 -> 25565"));
    }

    #[test]
    fn test_format_detached() {
        assert!(format_detached("abc").contains("podlaunch stop abc"));
    }
}
