//! Workload start sequence with rollback.
//!
//! Starting a workload runs these steps in order:
//! 1. Validate the configuration
//! 2. Lease a host port (random when the config asks for port 0)
//! 3. Pull the image
//! 4. Create the sandbox with the port mapping, DNS and runtime handler
//! 5. Wait for the sandbox to report ready
//! 6. Create and start the container
//!
//! Steps 1-4 leave nothing behind on failure. Once the sandbox exists, any
//! failure removes it exactly once before the error is returned. If the
//! start future is dropped while the sandbox exists, removal is spawned on
//! the runtime and the host port stays leased until it finishes.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::RuntimeClient;
use crate::error::{Rollback, StartStep, WorkloadError};
use crate::port::{
    PortAllocator, PortLease, PortLeases, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PORT,
    DEFAULT_MIN_PORT,
};
use crate::runtime::{
    ContainerConfig, ContainerMetadata, DnsConfig, PodSandboxConfig, PodSandboxMetadata,
    PortMapping, Protocol, SandboxState, RUNTIME_HANDLER_ANNOTATION,
};

use super::env::compose_env;
use super::{WorkloadConfig, WorkloadHandle};

/// Bounded polling of sandbox readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Delay after the first not-ready answer.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between polls.
    pub max_backoff: Duration,
    /// Give up once this much time has passed.
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Knobs applied to every workload an orchestrator starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Lowest automatically assigned host port.
    pub min_port: u16,
    /// Highest automatically assigned host port.
    pub max_port: u16,
    /// Candidates drawn before port assignment fails.
    pub max_port_attempts: u32,
    /// Isolation technology requested for sandboxes, e.g. `kata`.
    pub runtime_handler: String,
    /// Nameservers handed to every sandbox.
    pub dns_servers: Vec<String>,
    /// How long to wait for a new sandbox.
    pub readiness: ReadinessPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
            max_port_attempts: DEFAULT_MAX_ATTEMPTS,
            runtime_handler: "kata".to_string(),
            dns_servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            readiness: ReadinessPolicy::default(),
        }
    }
}

/// Starts workloads on a runtime.
///
/// Safe to share between tasks; port selection is serialized internally and
/// leased ports are never handed out twice while their handle lives.
#[derive(Debug)]
pub struct Orchestrator {
    client: RuntimeClient,
    settings: OrchestratorSettings,
    ports: Mutex<PortAllocator>,
}

impl Orchestrator {
    /// Creates an orchestrator with default settings.
    pub fn new(client: RuntimeClient) -> Self {
        Self::with_settings(client, OrchestratorSettings::default())
    }

    /// Creates an orchestrator with explicit settings.
    pub fn with_settings(client: RuntimeClient, settings: OrchestratorSettings) -> Self {
        Self {
            client,
            settings,
            ports: Mutex::new(PortAllocator::new()),
        }
    }

    /// Replaces the port allocator.
    #[must_use]
    pub fn with_port_allocator(mut self, allocator: PortAllocator) -> Self {
        self.ports = Mutex::new(allocator);
        self
    }

    /// The runtime this orchestrator drives.
    pub fn client(&self) -> &RuntimeClient {
        &self.client
    }

    /// Settings applied to every start.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// The registry of host ports held by live handles.
    pub fn port_leases(&self) -> PortLeases {
        self.lock_ports().leases().clone()
    }

    /// Starts a workload, using the default configuration when `config` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a validation or port error before any runtime call, a
    /// `RemoteCall` error if the pull or sandbox creation fails, and a
    /// `Start` error carrying the rollback outcome for later failures.
    pub async fn start(
        &self,
        config: Option<WorkloadConfig>,
    ) -> Result<WorkloadHandle, WorkloadError> {
        let mut config = config.unwrap_or_default();
        config.validate()?;
        let (container_port, requested_port) = config.ports()?;

        let lease = self.reserve_host_port(requested_port)?;
        let host_port = lease.port();
        config.host_port = u32::from(host_port);
        info!(
            "Starting {} ({}) on host port {}",
            config.pod_name, config.image, host_port
        );

        self.client.pull_image(&config.image).await?;

        let sandbox_config = self.sandbox_config(&config, container_port, host_port);
        let sandbox_id = self
            .client
            .run_pod_sandbox(&sandbox_config, &self.settings.runtime_handler)
            .await?;
        info!("Sandbox {} created", sandbox_id);
        let guard = SandboxGuard::new(self.client.clone(), sandbox_id, lease);

        match self
            .launch(&config, guard.sandbox_id(), &sandbox_config)
            .await
        {
            Ok(container_id) => {
                let sandbox_id = guard.sandbox_id().to_string();
                let lease = guard.disarm();
                info!(
                    "Workload running: sandbox {}, container {}",
                    sandbox_id, container_id
                );
                Ok(WorkloadHandle::new(
                    self.client.clone(),
                    sandbox_id,
                    container_id,
                    config,
                    host_port,
                    lease,
                ))
            }
            Err((step, source)) => {
                warn!("{} failed: {}", step, source);
                let rollback = self.rollback(guard.sandbox_id()).await;
                drop(guard.disarm());
                Err(WorkloadError::Start {
                    step,
                    source: Box::new(source),
                    rollback,
                })
            }
        }
    }

    fn lock_ports(&self) -> std::sync::MutexGuard<'_, PortAllocator> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve_host_port(&self, requested: Option<u16>) -> Result<PortLease, WorkloadError> {
        let mut ports = self.lock_ports();
        let lease = match requested {
            Some(port) => ports.lease_exact(port)?,
            None => {
                let lease = ports.lease_with_retry(
                    self.settings.min_port,
                    self.settings.max_port,
                    self.settings.max_port_attempts,
                )?;
                debug!("Auto-assigned host port {}", lease.port());
                lease
            }
        };
        Ok(lease)
    }

    fn sandbox_config(
        &self,
        config: &WorkloadConfig,
        container_port: u16,
        host_port: u16,
    ) -> PodSandboxConfig {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            RUNTIME_HANDLER_ANNOTATION.to_string(),
            self.settings.runtime_handler.clone(),
        );

        PodSandboxConfig {
            metadata: PodSandboxMetadata {
                name: config.pod_name.clone(),
                namespace: config.namespace.clone(),
                uid: config.uid.clone(),
                attempt: 0,
            },
            annotations,
            port_mappings: vec![PortMapping {
                protocol: Protocol::Tcp,
                container_port,
                host_port,
                host_ip: String::new(),
            }],
            dns_config: Some(DnsConfig {
                servers: self.settings.dns_servers.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Runs the steps that need rollback on failure.
    async fn launch(
        &self,
        config: &WorkloadConfig,
        sandbox_id: &str,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<String, (StartStep, WorkloadError)> {
        self.wait_until_ready(sandbox_id)
            .await
            .map_err(|e| (StartStep::AwaitSandbox, e))?;

        let container_config = ContainerConfig {
            metadata: ContainerMetadata {
                name: config.container_name.clone(),
                attempt: 0,
            },
            image: config.image.clone(),
            command: config.command.clone(),
            envs: compose_env(config).into_vec(),
            ..Default::default()
        };

        let container_id = self
            .client
            .create_container(sandbox_id, &container_config, sandbox_config)
            .await
            .map_err(|e| (StartStep::CreateContainer, e))?;

        self.client
            .start_container(&container_id)
            .await
            .map_err(|e| (StartStep::StartContainer, e))?;

        Ok(container_id)
    }

    async fn wait_until_ready(&self, sandbox_id: &str) -> Result<(), WorkloadError> {
        let policy = self.settings.readiness;
        let started = Instant::now();
        let mut backoff = policy.initial_backoff;

        loop {
            let status = self.client.pod_sandbox_status(sandbox_id).await?;
            if status.state == SandboxState::Ready {
                debug!(
                    "Sandbox {} ready after {:?}",
                    sandbox_id,
                    started.elapsed()
                );
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                return Err(WorkloadError::SandboxNotReady {
                    sandbox_id: sandbox_id.to_string(),
                    waited,
                });
            }

            debug!("Sandbox {} not ready, retrying in {:?}", sandbox_id, backoff);
            tokio::time::sleep(backoff.min(policy.timeout - waited)).await;
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }

    /// Removes the sandbox once. Removal force-stops anything still running.
    async fn rollback(&self, sandbox_id: &str) -> Rollback {
        warn!("Rolling back sandbox {}", sandbox_id);
        match self.client.remove_pod_sandbox(sandbox_id).await {
            Ok(()) => Rollback::Removed,
            Err(err) => {
                warn!("Rollback of sandbox {} failed: {}", sandbox_id, err);
                Rollback::Failed(Box::new(err))
            }
        }
    }
}

/// Removes a sandbox whose start was abandoned mid-flight.
///
/// Holds the host port lease until removal has finished, so the port is not
/// handed out while the sandbox may still publish it.
struct SandboxGuard {
    client: RuntimeClient,
    sandbox_id: String,
    lease: Option<PortLease>,
    armed: bool,
}

impl SandboxGuard {
    fn new(client: RuntimeClient, sandbox_id: String, lease: PortLease) -> Self {
        Self {
            client,
            sandbox_id,
            lease: Some(lease),
            armed: true,
        }
    }

    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Hands the lease back; dropping the guard afterwards does nothing.
    fn disarm(mut self) -> Option<PortLease> {
        self.armed = false;
        self.lease.take()
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let lease = self.lease.take();
        let client = self.client.clone();
        let sandbox_id = std::mem::take(&mut self.sandbox_id);
        warn!("Start abandoned, removing sandbox {}", sandbox_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = client.remove_pod_sandbox(&sandbox_id).await {
                        warn!("Removal of abandoned sandbox {} failed: {}", sandbox_id, err);
                    }
                    drop(lease);
                });
            }
            Err(_) => {
                warn!(
                    "No async runtime to remove sandbox {}; remove it manually",
                    sandbox_id
                );
            }
        }
    }
}
