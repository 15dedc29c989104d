//! Handle to a running workload.

use tracing::{info, warn};

use crate::client::RuntimeClient;
use crate::error::WorkloadError;
use crate::port::PortLease;
use crate::runtime::ContainerStatus;

use super::WorkloadConfig;

/// A started workload: one sandbox holding one running container.
///
/// Stopping consumes the handle, so a stopped workload cannot be used again.
/// The host port lease is released when the handle is dropped, or kept in
/// the error when stopping fails.
#[derive(Debug)]
pub struct WorkloadHandle {
    client: RuntimeClient,
    sandbox_id: String,
    container_id: String,
    config: WorkloadConfig,
    host_port: u16,
    lease: Option<PortLease>,
}

impl WorkloadHandle {
    pub(crate) fn new(
        client: RuntimeClient,
        sandbox_id: String,
        container_id: String,
        config: WorkloadConfig,
        host_port: u16,
        lease: Option<PortLease>,
    ) -> Self {
        Self {
            client,
            sandbox_id,
            container_id,
            config,
            host_port,
            lease,
        }
    }

    /// Id of the sandbox holding the workload.
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Id of the workload container.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// The effective configuration, with the host port actually bound.
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// The host port the workload is published on.
    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    /// Queries the container's current status.
    ///
    /// # Errors
    ///
    /// Returns a `RemoteCall` error if the runtime query fails.
    pub async fn status(&self) -> Result<ContainerStatus, WorkloadError> {
        self.client.container_status(&self.container_id, true).await
    }

    /// Stops the sandbox, then removes it.
    ///
    /// If stopping fails, removal is not attempted. The returned error names
    /// the sandbox for a retry and keeps the host port reserved until it is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Stop`] wrapping the first failing runtime call.
    pub async fn stop(self) -> Result<(), WorkloadError> {
        info!("Stopping workload in sandbox {}", self.sandbox_id);
        if let Err(err) = self.client.teardown_sandbox(&self.sandbox_id).await {
            warn!(
                "Teardown of sandbox {} failed, keeping host port {} reserved: {}",
                self.sandbox_id, self.host_port, err
            );
            return Err(WorkloadError::Stop {
                sandbox_id: self.sandbox_id,
                source: Box::new(err),
                lease: self.lease,
            });
        }
        info!("Workload stopped, host port {} released", self.host_port);
        Ok(())
    }
}
