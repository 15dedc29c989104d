//! `podlaunch.toml` configuration.
//!
//! Every section and key is optional; missing values fall back to defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::port::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};
use crate::runtime::DEFAULT_PAUSE_IMAGE;
use crate::workload::{OrchestratorSettings, ReadinessPolicy, WorkloadConfig};

const CONFIG_FILE: &str = "podlaunch.toml";

/// Contents of `podlaunch.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Runtime endpoint and connection settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Host port selection.
    #[serde(default)]
    pub ports: PortConfig,
    /// Sandbox readiness polling.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Sandbox isolation and DNS.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Default workload for `podlaunch start`.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// Runtime connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime endpoint
    /// - Socket: "/var/run/docker.sock" or "unix:///var/run/docker.sock"
    /// - Remote: "tcp://192.168.121.232:2375" or "192.168.121.232:2375"
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Give up connecting after this many seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Runtime handler requested for sandboxes (e.g. "kata", "runc")
    #[serde(default = "default_handler")]
    pub handler: String,

    /// Image backing each sandbox's infrastructure container
    #[serde(default = "default_pause_image")]
    pub pause_image: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout(),
            handler: default_handler(),
            pause_image: default_pause_image(),
        }
    }
}

fn default_endpoint() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_handler() -> String {
    "kata".to_string()
}

fn default_pause_image() -> String {
    DEFAULT_PAUSE_IMAGE.to_string()
}

/// Host port selection for workloads with `host_port = 0`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Lowest port drawn
    #[serde(default = "default_min_port")]
    pub min: u16,

    /// Highest port drawn
    #[serde(default = "default_max_port")]
    pub max: u16,

    /// Candidates drawn before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Skip candidates that cannot be bound on this machine.
    /// Only meaningful when the runtime runs locally.
    #[serde(default)]
    pub probe_local_bind: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            min: default_min_port(),
            max: default_max_port(),
            max_attempts: default_max_attempts(),
            probe_local_bind: false,
        }
    }
}

fn default_min_port() -> u16 {
    DEFAULT_MIN_PORT
}

fn default_max_port() -> u16 {
    DEFAULT_MAX_PORT
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// How long to wait for a new sandbox to become ready
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// First delay between status polls
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on the delay between polls
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Give up after this long
    #[serde(default = "default_readiness_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            timeout_secs: default_readiness_timeout(),
        }
    }
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    2000
}

fn default_readiness_timeout() -> u64 {
    30
}

/// Settings applied to every sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// DNS servers handed to every sandbox
    #[serde(default = "default_dns")]
    pub dns_servers: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            dns_servers: default_dns(),
        }
    }
}

fn default_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
}

impl Config {
    /// Load configuration from `podlaunch.toml` in `dir`, then the user
    /// config directory, using defaults if neither exists
    pub fn load(dir: &Path) -> Result<Self> {
        let local = dir.join(CONFIG_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }

        match user_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if self.ports.min == 0 || self.ports.min >= self.ports.max {
            bail!(
                "Invalid port range {}-{}: min must be at least 1 and below max",
                self.ports.min,
                self.ports.max
            );
        }
        if self.ports.max_attempts == 0 {
            bail!("ports.max_attempts must be at least 1");
        }
        if self.runtime.connect_timeout_secs == 0 {
            bail!("runtime.connect_timeout_secs must be at least 1");
        }
        if self.readiness.timeout_secs == 0 {
            bail!("readiness.timeout_secs must be at least 1");
        }
        if self.readiness.initial_backoff_ms == 0
            || self.readiness.initial_backoff_ms > self.readiness.max_backoff_ms
        {
            bail!(
                "readiness.initial_backoff_ms must be between 1 and max_backoff_ms ({})",
                self.readiness.max_backoff_ms
            );
        }
        self.workload
            .validate()
            .context("Invalid [workload] section")?;
        Ok(())
    }

    /// Bound on connecting to the runtime.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.connect_timeout_secs)
    }

    /// Orchestrator knobs derived from this configuration
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            min_port: self.ports.min,
            max_port: self.ports.max,
            max_port_attempts: self.ports.max_attempts,
            runtime_handler: self.runtime.handler.clone(),
            dns_servers: self.sandbox.dns_servers.clone(),
            readiness: ReadinessPolicy {
                initial_backoff: Duration::from_millis(self.readiness.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.readiness.max_backoff_ms),
                timeout: Duration::from_secs(self.readiness.timeout_secs),
            },
        }
    }
}

/// `<config dir>/podlaunch/config.toml`, e.g. `~/.config/podlaunch/config.toml`
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("podlaunch").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.endpoint, "unix:///var/run/docker.sock");
        assert_eq!(config.runtime.handler, "kata");
        assert_eq!(config.ports.min, 1024);
        assert_eq!(config.ports.max, 49151);
        assert_eq!(config.sandbox.dns_servers, vec!["8.8.8.8", "8.8.4.4"]);
        assert_eq!(config.workload.pod_name, "minecraft-pod");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
endpoint = "tcp://192.168.121.232:2375"
handler = "runc"

[ports]
min = 30000
max = 31000
probe_local_bind = true

[readiness]
timeout_secs = 5

[workload]
image = "docker.io/itzg/minecraft-server:java21"
host_port = 0
command = ["/start"]

[workload.extra_env]
MEMORY = "4G"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.endpoint, "tcp://192.168.121.232:2375");
        assert_eq!(config.runtime.connect_timeout_secs, 10);
        assert!(config.ports.probe_local_bind);
        assert_eq!(config.readiness.max_backoff_ms, 2000);
        assert_eq!(config.workload.command, vec!["/start"]);
        assert_eq!(config.workload.namespace, "default");

        let settings = config.orchestrator_settings();
        assert_eq!(settings.runtime_handler, "runc");
        assert_eq!((settings.min_port, settings.max_port), (30000, 31000));
        assert_eq!(settings.readiness.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_port_range() {
        let mut config = Config::default();
        config.ports.min = 5000;
        config.ports.max = 5000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid port range 5000-5000"));
    }

    #[test]
    fn test_validate_rejects_bad_workload() {
        let mut config = Config::default();
        config.workload.image.clear();
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("image cannot be empty"));
    }

    #[test]
    fn test_validate_rejects_backoff_above_max() {
        let mut config = Config::default();
        config.readiness.initial_backoff_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[runtime]\nendpoint = \"/run/custom.sock\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.runtime.endpoint, "/run/custom.sock");
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_from_invalid_toml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[ports\nmin = 1").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
