//! Launch a single-container workload inside an isolated pod sandbox.
//!
//! The [`Orchestrator`] validates a [`WorkloadConfig`], picks a host port,
//! pulls the image, creates a sandbox with the port mapping and runtime
//! handler, waits for it to become ready, then creates and starts the
//! container. Failures after the sandbox exists remove it before returning.
//!
//! ```no_run
//! use podlaunch::{Orchestrator, RuntimeClient, WorkloadConfig};
//!
//! # async fn demo() -> Result<(), podlaunch::WorkloadError> {
//! let client = RuntimeClient::connect("unix:///var/run/docker.sock").await?;
//! let orchestrator = Orchestrator::new(client);
//!
//! let config = WorkloadConfig {
//!     host_port: 0,
//!     ..Default::default()
//! };
//! let handle = orchestrator.start(Some(config)).await?;
//! println!("listening on {}", handle.host_port());
//!
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod port;
pub mod runtime;
pub mod workload;

pub use client::RuntimeClient;
pub use endpoint::Endpoint;
pub use error::{Rollback, StartStep, WorkloadError};
pub use port::{PortAllocator, PortError, PortLease, PortLeases};
pub use workload::{
    Orchestrator, OrchestratorSettings, ReadinessPolicy, ValidationError, WorkloadConfig,
    WorkloadHandle,
};
