use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use podlaunch::port::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};

mod commands;

#[derive(Parser)]
#[command(name = "podlaunch")]
#[command(
    author,
    version,
    about = "Run a single-container workload inside an isolated pod sandbox"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime endpoint: socket path, unix://PATH, tcp://HOST:PORT or HOST:PORT
    #[arg(long, global = true, env = "PODLAUNCH_ENDPOINT")]
    endpoint: Option<String>,

    /// Configuration file (default: ./podlaunch.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a workload; stops it again on Ctrl+C unless --detach is given
    Start {
        /// Container image
        #[arg(long)]
        image: Option<String>,

        /// Server flavour passed as TYPE
        #[arg(long)]
        server_type: Option<String>,

        /// Host port (0 = pick a free one)
        #[arg(long)]
        host_port: Option<u32>,

        /// Extra environment variable, may be repeated
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Command replacing the image entrypoint, split like a shell would
        #[arg(long)]
        command: Option<String>,

        /// Sandbox UID
        #[arg(long)]
        uid: Option<String>,

        /// Generate a fresh sandbox UID
        #[arg(long, conflicts_with = "uid")]
        random_uid: bool,

        /// Leave the workload running and exit
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop and remove a sandbox
    Stop {
        /// Sandbox id printed by `start`
        sandbox_id: String,
    },

    /// Show a container's status
    Status {
        /// Container id printed by `start`
        container_id: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List sandboxes and their containers
    List {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the runtime name and version
    Version,

    /// Print a random candidate host port
    Port {
        #[arg(long, default_value_t = DEFAULT_MIN_PORT)]
        min: u16,

        #[arg(long, default_value_t = DEFAULT_MAX_PORT)]
        max: u16,

        /// Candidates drawn before giving up
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        attempts: u32,
    },

    /// Validate configuration
    Check {
        /// Also confirm the runtime answers
        #[arg(long)]
        connect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("podlaunch=debug")
    } else {
        EnvFilter::new("podlaunch=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let endpoint = cli.endpoint.as_deref();

    match cli.command {
        Commands::Port { min, max, attempts } => {
            commands::port::run(min, max, attempts)?;
        }
        Commands::Start {
            image,
            server_type,
            host_port,
            env,
            command,
            uid,
            random_uid,
            detach,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let options = commands::start::StartOptions {
                image,
                server_type,
                host_port,
                env,
                command,
                uid,
                random_uid,
                detach,
            };
            commands::start::run(config, endpoint, options).await?;
        }
        Commands::Stop { sandbox_id } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::stop::run(&config, endpoint, &sandbox_id).await?;
        }
        Commands::Status { container_id, json } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::status::run(&config, endpoint, &container_id, json).await?;
        }
        Commands::List { json } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::list::run(&config, endpoint, json).await?;
        }
        Commands::Version => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::version::run(&config, endpoint).await?;
        }
        Commands::Check { connect } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::check::run(&config, endpoint, connect).await?;
        }
    }

    Ok(())
}
