//! Validate configuration, optionally confirming the runtime answers.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use podlaunch::config::Config;

pub async fn run(config: &Config, endpoint: Option<&str>, connect: bool) -> Result<()> {
    config.validate()?;
    print!("{}", format_summary(config, endpoint));

    if connect {
        let client = super::connect(config, endpoint).await?;
        let version = client.version().await?;
        println!(
            "{} Runtime reachable: {} {}",
            "✓".green(),
            version.runtime_name.cyan(),
            version.runtime_version.cyan()
        );
    }
    Ok(())
}

fn format_summary(config: &Config, endpoint: Option<&str>) -> String {
    let workload = &config.workload;
    let host_port = if workload.auto_host_port() {
        format!("auto ({}-{})", config.ports.min, config.ports.max)
    } else {
        workload.host_port.to_string()
    };

    let mut out = String::new();
    writeln!(&mut out, "{} Configuration OK", "✓".green()).unwrap();
    writeln!(
        &mut out,
        "  Endpoint:   {}",
        endpoint.unwrap_or(&config.runtime.endpoint).cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Handler:    {}", config.runtime.handler.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Pod:        {}",
        format!("{}/{}", workload.namespace, workload.pod_name).cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Image:      {}", workload.image.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Port:       {}",
        format!("{host_port} -> {}", workload.container_port).cyan()
    )
    .unwrap();
    out
}
