//! Client facade over a runtime backend.
//!
//! [`RuntimeClient`] owns one connection and exposes each runtime operation
//! with failures wrapped as [`WorkloadError::RemoteCall`]. Clones share the
//! connection; it closes when the last clone is dropped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::WorkloadError;
use crate::runtime::{
    Container, ContainerConfig, ContainerStatus, DockerRuntime, Operation, PodSandbox,
    PodSandboxConfig, PodSandboxStatus, RuntimeService, VersionInfo, DEFAULT_PAUSE_IMAGE,
};

/// How long connecting may take before giving up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection to a container runtime.
#[derive(Clone)]
pub struct RuntimeClient {
    runtime: Arc<dyn RuntimeService>,
    endpoint: String,
}

impl std::fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("backend", &self.runtime.name())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RuntimeClient {
    /// Wraps an existing backend.
    pub fn new(runtime: Arc<dyn RuntimeService>) -> Self {
        let endpoint = runtime.name().to_string();
        Self { runtime, endpoint }
    }

    /// Connects to the runtime at `endpoint` with the default timeout.
    ///
    /// Accepts a socket path, `unix://PATH`, `tcp://HOST:PORT` or `HOST:PORT`.
    pub async fn connect(endpoint: &str) -> Result<Self, WorkloadError> {
        Self::connect_with(endpoint, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PAUSE_IMAGE).await
    }

    /// Connects to the runtime at `endpoint`, failing if it does not answer
    /// within `timeout`.
    pub async fn connect_with(
        endpoint: &str,
        timeout: Duration,
        pause_image: &str,
    ) -> Result<Self, WorkloadError> {
        let parsed: Endpoint = endpoint.parse()?;
        let display_endpoint = parsed.to_string();
        debug!("Connecting to {}", display_endpoint);

        let runtime = DockerRuntime::connect(&parsed)
            .map_err(|source| WorkloadError::Connection {
                endpoint: display_endpoint.clone(),
                source,
            })?
            .with_pause_image(pause_image);

        match tokio::time::timeout(timeout, runtime.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(WorkloadError::Connection {
                    endpoint: display_endpoint,
                    source,
                })
            }
            Err(_) => {
                return Err(WorkloadError::ConnectTimeout {
                    endpoint: display_endpoint,
                    timeout_secs: timeout.as_secs(),
                })
            }
        }

        info!("Connected to {}", display_endpoint);
        Ok(Self {
            runtime: Arc::new(runtime),
            endpoint: display_endpoint,
        })
    }

    /// The endpoint this client talks to, or the backend name for in-process backends.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Reports the runtime name and version.
    pub async fn version(&self) -> Result<VersionInfo, WorkloadError> {
        self.runtime
            .version()
            .await
            .map_err(|e| WorkloadError::remote(Operation::Version, "", e))
    }

    /// Pulls an image, returning its resolved reference.
    pub async fn pull_image(&self, image: &str) -> Result<String, WorkloadError> {
        debug!("Pulling image {}", image);
        self.runtime
            .pull_image(image)
            .await
            .map_err(|e| WorkloadError::remote(Operation::PullImage, image, e))
    }

    /// Creates and starts a sandbox, returning its id.
    pub async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String, WorkloadError> {
        debug!(
            "Creating sandbox {} (handler: {})",
            config.metadata.name, runtime_handler
        );
        self.runtime
            .run_pod_sandbox(config, runtime_handler)
            .await
            .map_err(|e| WorkloadError::remote(Operation::RunPodSandbox, &config.metadata.name, e))
    }

    /// Reports whether a sandbox is ready.
    pub async fn pod_sandbox_status(
        &self,
        sandbox_id: &str,
    ) -> Result<PodSandboxStatus, WorkloadError> {
        self.runtime
            .pod_sandbox_status(sandbox_id)
            .await
            .map_err(|e| WorkloadError::remote(Operation::PodSandboxStatus, sandbox_id, e))
    }

    /// Creates a container inside a sandbox, returning its id.
    pub async fn create_container(
        &self,
        sandbox_id: &str,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<String, WorkloadError> {
        debug!(
            "Creating container {} in sandbox {}",
            config.metadata.name, sandbox_id
        );
        self.runtime
            .create_container(sandbox_id, config, sandbox_config)
            .await
            .map_err(|e| WorkloadError::remote(Operation::CreateContainer, sandbox_id, e))
    }

    /// Starts a created container.
    pub async fn start_container(&self, container_id: &str) -> Result<(), WorkloadError> {
        debug!("Starting container {}", container_id);
        self.runtime
            .start_container(container_id)
            .await
            .map_err(|e| WorkloadError::remote(Operation::StartContainer, container_id, e))
    }

    /// Stops a sandbox and its containers.
    pub async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<(), WorkloadError> {
        debug!("Stopping sandbox {}", sandbox_id);
        self.runtime
            .stop_pod_sandbox(sandbox_id)
            .await
            .map_err(|e| WorkloadError::remote(Operation::StopPodSandbox, sandbox_id, e))
    }

    /// Removes a sandbox and its containers.
    pub async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<(), WorkloadError> {
        debug!("Removing sandbox {}", sandbox_id);
        self.runtime
            .remove_pod_sandbox(sandbox_id)
            .await
            .map_err(|e| WorkloadError::remote(Operation::RemovePodSandbox, sandbox_id, e))
    }

    /// Stops a sandbox, then removes it. Removal is skipped if stopping fails.
    pub async fn teardown_sandbox(&self, sandbox_id: &str) -> Result<(), WorkloadError> {
        self.stop_pod_sandbox(sandbox_id).await?;
        self.remove_pod_sandbox(sandbox_id).await
    }

    /// Lists sandboxes.
    pub async fn list_pod_sandbox(&self) -> Result<Vec<PodSandbox>, WorkloadError> {
        self.runtime
            .list_pod_sandbox()
            .await
            .map_err(|e| WorkloadError::remote(Operation::ListPodSandbox, "", e))
    }

    /// Lists containers.
    pub async fn list_containers(&self) -> Result<Vec<Container>, WorkloadError> {
        self.runtime
            .list_containers()
            .await
            .map_err(|e| WorkloadError::remote(Operation::ListContainers, "", e))
    }

    /// Reports a container's status.
    pub async fn container_status(
        &self,
        container_id: &str,
        verbose: bool,
    ) -> Result<ContainerStatus, WorkloadError> {
        self.runtime
            .container_status(container_id, verbose)
            .await
            .map_err(|e| WorkloadError::remote(Operation::ContainerStatus, container_id, e))
    }
}
