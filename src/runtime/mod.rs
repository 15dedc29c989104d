//! Container runtime backends.
//!
//! [`RuntimeService`] is the narrow capability set the orchestrator needs
//! from a runtime: image pull, sandbox lifecycle, container lifecycle and
//! status queries. Backends:
//! - `docker`: Docker engine via bollard, sandbox modelled as an infra container
//! - `mock`: scripted in-memory runtime for tests

mod docker;
mod error;
mod mock;
mod types;

pub use docker::{DockerRuntime, DEFAULT_PAUSE_IMAGE};
pub use error::RuntimeError;
pub use mock::{MockCall, MockRuntime};
pub use types::{
    Container, ContainerConfig, ContainerMetadata, ContainerState, ContainerStatus, DnsConfig,
    KeyValue, Operation, PodSandbox, PodSandboxConfig, PodSandboxMetadata, PodSandboxStatus,
    PortMapping, Protocol, SandboxState, VersionInfo, RUNTIME_HANDLER_ANNOTATION,
};

use async_trait::async_trait;

/// Operations a container runtime must provide.
///
/// Implementations perform exactly one remote request per call and never retry.
#[async_trait]
pub trait RuntimeService: Send + Sync {
    /// Returns the backend name for display.
    fn name(&self) -> &'static str;

    /// Reports the runtime name and version.
    async fn version(&self) -> Result<VersionInfo, RuntimeError>;

    /// Pulls an image and returns its resolved reference.
    async fn pull_image(&self, image: &str) -> Result<String, RuntimeError>;

    /// Creates and starts a sandbox, returning its id.
    async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String, RuntimeError>;

    /// Reports whether a sandbox is ready.
    async fn pod_sandbox_status(&self, sandbox_id: &str) -> Result<PodSandboxStatus, RuntimeError>;

    /// Creates a container inside a sandbox, returning its id.
    async fn create_container(
        &self,
        sandbox_id: &str,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<String, RuntimeError>;

    /// Starts a created container.
    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Stops a sandbox and every container in it.
    async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<(), RuntimeError>;

    /// Removes a sandbox and every container in it, stopping them if needed.
    async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<(), RuntimeError>;

    /// Lists sandboxes managed by this runtime.
    async fn list_pod_sandbox(&self) -> Result<Vec<PodSandbox>, RuntimeError>;

    /// Lists containers managed by this runtime.
    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError>;

    /// Reports a container's status; `verbose` adds backend detail to `info`.
    async fn container_status(
        &self,
        container_id: &str,
        verbose: bool,
    ) -> Result<ContainerStatus, RuntimeError>;
}
