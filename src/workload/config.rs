//! Workload configuration and its validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Validation failures, reported before any runtime call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `pod_name` is empty.
    #[error("pod name cannot be empty")]
    EmptyPodName,

    /// `namespace` is empty.
    #[error("namespace cannot be empty")]
    EmptyNamespace,

    /// `uid` is empty.
    #[error("UID cannot be empty")]
    EmptyUid,

    /// `container_name` is empty.
    #[error("container name cannot be empty")]
    EmptyContainerName,

    /// `image` is empty.
    #[error("image cannot be empty")]
    EmptyImage,

    /// `container_port` is outside 1-65535.
    #[error("server port must be between 1 and 65535, got {0}")]
    ContainerPortOutOfRange(u32),

    /// `host_port` is above 65535.
    #[error("host port must be between 1 and 65535, got {0}")]
    HostPortOutOfRange(u32),
}

/// Describes one sandboxed game-server workload.
///
/// Missing fields take their default when deserialized, so a config file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Sandbox name.
    pub pod_name: String,
    /// Sandbox namespace.
    pub namespace: String,
    /// Unique sandbox id chosen by the caller.
    pub uid: String,
    /// Name of the workload container.
    pub container_name: String,
    /// Image to pull and run.
    pub image: String,
    /// Server flavour, passed to the container as `TYPE`.
    pub server_type: String,
    /// Passed to the container as `EULA=TRUE` or `EULA=FALSE`.
    pub accept_eula: bool,
    /// Port the server listens on inside the sandbox.
    pub container_port: u32,
    /// 0 picks a free port automatically.
    pub host_port: u32,
    /// Merged over the base environment; wins on key collision.
    pub extra_env: BTreeMap<String, String>,
    /// Replaces the image entrypoint when non-empty.
    pub command: Vec<String>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            pod_name: "minecraft-pod".to_string(),
            namespace: "default".to_string(),
            uid: "minecraft-123".to_string(),
            container_name: "minecraft-server".to_string(),
            image: "docker.io/itzg/minecraft-server:latest".to_string(),
            server_type: "PAPER".to_string(),
            accept_eula: true,
            container_port: 25565,
            host_port: 25565,
            extra_env: BTreeMap::new(),
            command: Vec::new(),
        }
    }
}

impl WorkloadConfig {
    /// Checks required fields and port ranges, reporting the first problem.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, in field order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            (&self.pod_name, ValidationError::EmptyPodName),
            (&self.namespace, ValidationError::EmptyNamespace),
            (&self.uid, ValidationError::EmptyUid),
            (&self.container_name, ValidationError::EmptyContainerName),
            (&self.image, ValidationError::EmptyImage),
        ];
        for (value, err) in required {
            if value.is_empty() {
                return Err(err);
            }
        }

        self.ports().map(|_| ())
    }

    /// Returns true if the host port should be picked automatically.
    pub fn auto_host_port(&self) -> bool {
        self.host_port == 0
    }

    /// The container port and the explicit host port, narrowed to `u16`.
    pub(crate) fn ports(&self) -> Result<(u16, Option<u16>), ValidationError> {
        let container = u16::try_from(self.container_port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(ValidationError::ContainerPortOutOfRange(self.container_port))?;

        let host = match self.host_port {
            0 => None,
            port => Some(
                u16::try_from(port).map_err(|_| ValidationError::HostPortOutOfRange(port))?,
            ),
        };

        Ok((container, host))
    }
}
