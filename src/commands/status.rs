use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use podlaunch::config::Config;
use podlaunch::runtime::{ContainerState, ContainerStatus};

pub async fn run(
    config: &Config,
    endpoint: Option<&str>,
    container_id: &str,
    json: bool,
) -> Result<()> {
    let client = super::connect(config, endpoint).await?;
    let status = client
        .container_status(container_id, true)
        .await
        .with_context(|| format!("Failed to query container {container_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(&status));
    }
    Ok(())
}

fn format_status(status: &ContainerStatus) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   📦 Container Status".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    let state = match status.state {
        ContainerState::Running => status.state.to_string().green().bold(),
        ContainerState::Exited => status.state.to_string().red(),
        _ => status.state.to_string().yellow(),
    };
    writeln!(&mut out, "  State:      {state}").unwrap();
    writeln!(&mut out, "  Name:       {}", status.metadata.name.cyan()).unwrap();
    writeln!(&mut out, "  Id:         {}", status.id.cyan()).unwrap();
    writeln!(&mut out, "  Image:      {}", status.image.cyan()).unwrap();

    if let Some(started) = status.started_at {
        writeln!(
            &mut out,
            "  Started:    {}",
            started.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
        )
        .unwrap();
    }
    if status.state == ContainerState::Exited {
        writeln!(
            &mut out,
            "  Exit code:  {}",
            status.exit_code.to_string().cyan()
        )
        .unwrap();
        if let Some(finished) = status.finished_at {
            writeln!(
                &mut out,
                "  Finished:   {}",
                finished.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
            )
            .unwrap();
        }
    }
    if !status.reason.is_empty() {
        writeln!(&mut out, "  Reason:     {}", status.reason.cyan()).unwrap();
    }
    if let Some(sandbox) = status.info.get("sandboxId") {
        writeln!(&mut out, "  Sandbox:    {}", sandbox.cyan()).unwrap();
    }

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    out
}
