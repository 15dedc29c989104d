//! Request and response shapes exchanged with a runtime backend.
//!
//! These mirror the container-runtime interface: a pod sandbox is the
//! isolation boundary, a container is one workload placed inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sandbox annotation selecting the isolation technology that backs it.
pub const RUNTIME_HANDLER_ANNOTATION: &str = "io.containerd.cri.runtime-handler";

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
    /// SCTP
    Sctp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Sctp => write!(f, "sctp"),
        }
    }
}

/// A container port published on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Port inside the sandbox.
    pub container_port: u16,
    /// Port published on the host.
    pub host_port: u16,
    /// Empty means all interfaces.
    #[serde(default)]
    pub host_ip: String,
}

/// DNS settings of a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Nameserver addresses.
    pub servers: Vec<String>,
    /// Search domains.
    #[serde(default)]
    pub searches: Vec<String>,
    /// Resolver options.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Identity of a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxMetadata {
    /// Human-readable name.
    pub name: String,
    /// Grouping namespace.
    pub namespace: String,
    /// Unique id chosen by the caller.
    pub uid: String,
    /// Restart attempt counter.
    #[serde(default)]
    pub attempt: u32,
}

/// Everything the runtime needs to create a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxConfig {
    /// Identity.
    pub metadata: PodSandboxMetadata,
    /// Hostname inside the sandbox.
    #[serde(default)]
    pub hostname: String,
    /// Labels used for selection.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Ports published on the host.
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Resolver settings; the runtime default when absent.
    #[serde(default)]
    pub dns_config: Option<DnsConfig>,
}

impl PodSandboxConfig {
    /// The runtime handler selected by annotation, if any.
    pub fn runtime_handler(&self) -> Option<&str> {
        self.annotations
            .get(RUNTIME_HANDLER_ANNOTATION)
            .map(String::as_str)
    }
}

/// One environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
}

impl KeyValue {
    /// Creates a pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Identity of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Human-readable name.
    pub name: String,
    /// Restart attempt counter.
    #[serde(default)]
    pub attempt: u32,
}

/// Everything the runtime needs to create a container inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Identity.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Entrypoint override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Arguments to the entrypoint.
    #[serde(default)]
    pub args: Vec<String>,
    /// Ordered; later entries do not override earlier ones at this level.
    #[serde(default)]
    pub envs: Vec<KeyValue>,
    /// Labels used for selection.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Working directory override.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Keep stdin open.
    #[serde(default)]
    pub stdin: bool,
    /// Allocate a terminal.
    #[serde(default)]
    pub tty: bool,
}

/// Readiness of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxState {
    /// Sandbox is running and can host containers.
    Ready,
    /// Sandbox exists but cannot host containers.
    NotReady,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "SANDBOX_READY"),
            Self::NotReady => write!(f, "SANDBOX_NOTREADY"),
        }
    }
}

/// Current status of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxStatus {
    /// Runtime-assigned id.
    pub id: String,
    /// Identity.
    pub metadata: PodSandboxMetadata,
    /// Current state.
    pub state: SandboxState,
    /// Creation time, if reported.
    pub created_at: Option<DateTime<Utc>>,
    /// Sandbox IP address, if any.
    pub ip: Option<String>,
}

/// A sandbox as returned by listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandbox {
    /// Runtime-assigned id.
    pub id: String,
    /// Identity.
    pub metadata: PodSandboxMetadata,
    /// Current state.
    pub state: SandboxState,
    /// Creation time, if reported.
    pub created_at: Option<DateTime<Utc>>,
    /// Labels used for selection.
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations.
    pub annotations: BTreeMap<String, String>,
    /// Isolation technology backing the sandbox.
    pub runtime_handler: String,
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    /// Created but never started.
    Created,
    /// Running.
    Running,
    /// Process has exited.
    Exited,
    /// Runtime reported something else.
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CONTAINER_CREATED"),
            Self::Running => write!(f, "CONTAINER_RUNNING"),
            Self::Exited => write!(f, "CONTAINER_EXITED"),
            Self::Unknown => write!(f, "CONTAINER_UNKNOWN"),
        }
    }
}

/// A container as returned by listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned id.
    pub id: String,
    /// Sandbox the container belongs to.
    pub pod_sandbox_id: String,
    /// Identity.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Resolved image digest.
    pub image_ref: String,
    /// Current state.
    pub state: ContainerState,
    /// Creation time, if reported.
    pub created_at: Option<DateTime<Utc>>,
    /// Labels used for selection.
    pub labels: BTreeMap<String, String>,
}

/// Detailed status of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Runtime-assigned id.
    pub id: String,
    /// Identity.
    pub metadata: ContainerMetadata,
    /// Current state.
    pub state: ContainerState,
    /// Creation time, if reported.
    pub created_at: Option<DateTime<Utc>>,
    /// Start time, if started.
    pub started_at: Option<DateTime<Utc>>,
    /// Exit time, if exited.
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code; only meaningful once exited.
    pub exit_code: i32,
    /// Image reference.
    pub image: String,
    /// Resolved image digest.
    pub image_ref: String,
    /// Short machine-readable reason for the state.
    pub reason: String,
    /// Human-readable detail for the state.
    pub message: String,
    /// Labels used for selection.
    pub labels: BTreeMap<String, String>,
    /// Backend-specific detail, only filled for verbose queries.
    pub info: BTreeMap<String, String>,
}

impl ContainerStatus {
    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Runtime identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version of the runtime interface.
    pub version: String,
    /// Name of the runtime.
    pub runtime_name: String,
    /// Version of the runtime.
    pub runtime_version: String,
    /// API version the runtime speaks.
    pub runtime_api_version: String,
}

/// A runtime operation, used to label calls in errors, logs and test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Query runtime identification.
    Version,
    /// Pull an image.
    PullImage,
    /// Create and start a sandbox.
    RunPodSandbox,
    /// Query sandbox status.
    PodSandboxStatus,
    /// Create a container in a sandbox.
    CreateContainer,
    /// Start a created container.
    StartContainer,
    /// Stop a sandbox and its containers.
    StopPodSandbox,
    /// Remove a sandbox and its containers.
    RemovePodSandbox,
    /// List sandboxes.
    ListPodSandbox,
    /// List containers.
    ListContainers,
    /// Query container status.
    ContainerStatus,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Version => "version",
            Self::PullImage => "pull image",
            Self::RunPodSandbox => "run pod sandbox",
            Self::PodSandboxStatus => "pod sandbox status",
            Self::CreateContainer => "create container",
            Self::StartContainer => "start container",
            Self::StopPodSandbox => "stop pod sandbox",
            Self::RemovePodSandbox => "remove pod sandbox",
            Self::ListPodSandbox => "list pod sandbox",
            Self::ListContainers => "list containers",
            Self::ContainerStatus => "container status",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_handler_annotation() {
        let mut config = PodSandboxConfig::default();
        assert_eq!(config.runtime_handler(), None);

        config
            .annotations
            .insert(RUNTIME_HANDLER_ANNOTATION.to_string(), "kata".to_string());
        assert_eq!(config.runtime_handler(), Some("kata"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ContainerState::Running.to_string(), "CONTAINER_RUNNING");
        assert_eq!(SandboxState::NotReady.to_string(), "SANDBOX_NOTREADY");
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Operation::CreateContainer.to_string(), "create container");
    }

    #[test]
    fn test_key_value_display() {
        assert_eq!(KeyValue::new("EULA", "TRUE").to_string(), "EULA=TRUE");
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&ContainerState::Exited).unwrap();
        assert_eq!(json, "\"EXITED\"");
    }
}
