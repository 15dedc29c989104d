//! List sandboxes and their containers.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use podlaunch::config::Config;
use podlaunch::runtime::{Container, PodSandbox, SandboxState};

pub async fn run(config: &Config, endpoint: Option<&str>, json: bool) -> Result<()> {
    let client = super::connect(config, endpoint).await?;
    let sandboxes = client.list_pod_sandbox().await?;
    let containers = client.list_containers().await?;

    if json {
        let listing = serde_json::json!({
            "sandboxes": sandboxes,
            "containers": containers,
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print!("{}", format_listing(&sandboxes, &containers));
    }
    Ok(())
}

fn format_listing(sandboxes: &[PodSandbox], containers: &[Container]) -> String {
    let mut out = String::new();
    if sandboxes.is_empty() {
        writeln!(&mut out, "{} No sandboxes found.", "ℹ".blue()).unwrap();
        return out;
    }

    for sandbox in sandboxes {
        let state = match sandbox.state {
            SandboxState::Ready => "ready".green(),
            SandboxState::NotReady => "not ready".red(),
        };
        let handler = if sandbox.runtime_handler.is_empty() {
            "default"
        } else {
            sandbox.runtime_handler.as_str()
        };
        writeln!(
            &mut out,
            "{}  {}/{}  {}  {}",
            super::short_id(&sandbox.id).cyan(),
            sandbox.metadata.namespace,
            sandbox.metadata.name.bold(),
            state,
            format!("[{handler}]").dimmed()
        )
        .unwrap();

        for container in containers.iter().filter(|c| c.pod_sandbox_id == sandbox.id) {
            writeln!(
                &mut out,
                "  └─ {}  {}  {}  {}",
                super::short_id(&container.id).cyan(),
                container.metadata.name,
                container.image.dimmed(),
                container.state
            )
            .unwrap();
        }
    }
    out
}
