//! Docker engine backend.
//!
//! Docker has no pod concept, so a sandbox is an infrastructure ("pause")
//! container that owns the network namespace, published ports and DNS
//! settings. Workload containers join it with `network_mode: container:<id>`
//! and carry the sandbox id as a label, which is how stop and remove find them.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, HostConfig, PortBinding,
    PortMap,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use super::{
    Container, ContainerConfig, ContainerMetadata, ContainerState, ContainerStatus, PodSandbox,
    PodSandboxConfig, PodSandboxMetadata, PodSandboxStatus, RuntimeError, RuntimeService,
    SandboxState, VersionInfo,
};
use crate::endpoint::Endpoint;

/// Image used for sandbox infrastructure containers.
pub const DEFAULT_PAUSE_IMAGE: &str = "registry.k8s.io/pause:3.9";

/// Per-request ceiling handed to bollard; image pulls must fit inside it.
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Seconds a container gets between SIGTERM and SIGKILL on stop.
const STOP_GRACE_SECS: i64 = 10;

const LABEL_KIND: &str = "podlaunch.kind";
const LABEL_SANDBOX_ID: &str = "podlaunch.sandbox-id";
const LABEL_RUNTIME_HANDLER: &str = "podlaunch.runtime-handler";
const LABEL_POD_NAME: &str = "io.kubernetes.pod.name";
const LABEL_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";
const LABEL_POD_UID: &str = "io.kubernetes.pod.uid";
const LABEL_CONTAINER_NAME: &str = "io.kubernetes.container.name";
const LABEL_ATTEMPT: &str = "podlaunch.attempt";
const ANNOTATION_PREFIX: &str = "annotation.";

const KIND_SANDBOX: &str = "sandbox";
const KIND_CONTAINER: &str = "container";

/// Runs sandboxes and containers on a Docker engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    pause_image: String,
}

impl DockerRuntime {
    /// Builds a client for `endpoint`. No request is sent until the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if bollard rejects the address.
    pub fn connect(endpoint: &Endpoint) -> Result<Self, RuntimeError> {
        let docker = match endpoint {
            Endpoint::Unix(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                REQUEST_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            )?,
            Endpoint::Tcp(address) => Docker::connect_with_http(
                &format!("http://{address}"),
                REQUEST_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            )?,
        };

        Ok(Self {
            docker,
            pause_image: DEFAULT_PAUSE_IMAGE.to_string(),
        })
    }

    /// Uses `image` for sandbox infrastructure containers.
    #[must_use]
    pub fn with_pause_image(mut self, image: impl Into<String>) -> Self {
        self.pause_image = image.into();
        self
    }

    /// Checks that the engine answers.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the engine is unreachable.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Pulls `image` unless it is already present.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        self.pull(image).await
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(chunk) = stream.next().await {
            let output = chunk?;
            if let Some(error) = output.error {
                return Err(RuntimeError::rejected(error));
            }
            if let Some(status) = output.status {
                debug!("pull {}: {}", image, status.trim());
            }
        }
        Ok(())
    }

    /// Ids of every workload container attached to `sandbox_id`.
    async fn sandbox_members(&self, sandbox_id: &str) -> Result<Vec<String>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{LABEL_SANDBOX_ID}={sandbox_id}")],
        );

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn list_kind(&self, kind: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{LABEL_KIND}={kind}")]);

        Ok(self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        Ok(self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?)
    }

    /// Stops a container; already stopped counts as success.
    async fn stop_one(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = RuntimeError::from(err);
                if err.is_not_modified() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Force-removes a container; already gone counts as success.
    async fn remove_one(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = RuntimeError::from(err);
                if err.is_not_found() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[async_trait]
impl RuntimeService for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn version(&self) -> Result<VersionInfo, RuntimeError> {
        let version = self.docker.version().await?;
        Ok(VersionInfo {
            version: "v1".to_string(),
            runtime_name: "docker".to_string(),
            runtime_version: version.version.unwrap_or_default(),
            runtime_api_version: version.api_version.unwrap_or_default(),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<String, RuntimeError> {
        info!("Pulling image {}", image);
        self.pull(image).await?;
        let inspected = self.docker.inspect_image(image).await?;
        Ok(inspected.id.unwrap_or_else(|| image.to_string()))
    }

    async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String, RuntimeError> {
        self.ensure_image(&self.pause_image).await?;

        let mut labels = base_labels(KIND_SANDBOX, &config.labels, &config.annotations);
        labels.extend(pod_labels(&config.metadata));
        labels.insert(LABEL_RUNTIME_HANDLER.to_string(), runtime_handler.to_string());

        let (exposed_ports, port_bindings) = publish_ports(config);
        let dns = config.dns_config.clone().unwrap_or_default();

        let body = Config {
            image: Some(self.pause_image.clone()),
            hostname: (!config.hostname.is_empty()).then(|| config.hostname.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                dns: Some(dns.servers),
                dns_search: Some(dns.searches),
                dns_options: Some(dns.options),
                runtime: docker_runtime(runtime_handler),
                ..Default::default()
            }),
            ..Default::default()
        };

        let name = sandbox_container_name(&config.metadata);
        debug!("Creating sandbox container {}", name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                body,
            )
            .await?;

        if let Err(err) = self.docker.start_container::<String>(&created.id, None).await {
            if let Err(cleanup) = self.remove_one(&created.id).await {
                warn!(
                    "Removal of unstarted sandbox {} failed: {}",
                    created.id, cleanup
                );
            }
            return Err(err.into());
        }

        info!("Sandbox {} running as {}", name, created.id);
        Ok(created.id)
    }

    async fn pod_sandbox_status(&self, sandbox_id: &str) -> Result<PodSandboxStatus, RuntimeError> {
        let inspected = self.inspect(sandbox_id).await?;
        let labels = inspected
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();
        if labels.get(LABEL_KIND).map(String::as_str) != Some(KIND_SANDBOX) {
            return Err(RuntimeError::not_found("sandbox", sandbox_id));
        }

        let running = inspected
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        Ok(PodSandboxStatus {
            id: inspected.id.unwrap_or_else(|| sandbox_id.to_string()),
            metadata: sandbox_metadata(&labels),
            state: if running {
                SandboxState::Ready
            } else {
                SandboxState::NotReady
            },
            created_at: inspected.created.as_deref().and_then(parse_timestamp),
            ip: inspected
                .network_settings
                .and_then(|n| n.ip_address)
                .filter(|ip| !ip.is_empty()),
        })
    }

    async fn create_container(
        &self,
        sandbox_id: &str,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<String, RuntimeError> {
        let sandbox = self.inspect(sandbox_id).await?;
        let runtime = sandbox.host_config.and_then(|h| h.runtime);

        let mut labels = base_labels(KIND_CONTAINER, &config.labels, &config.annotations);
        labels.extend(pod_labels(&sandbox_config.metadata));
        labels.insert(LABEL_SANDBOX_ID.to_string(), sandbox_id.to_string());
        labels.insert(
            LABEL_CONTAINER_NAME.to_string(),
            config.metadata.name.clone(),
        );
        labels.insert(LABEL_ATTEMPT.to_string(), config.metadata.attempt.to_string());

        let body = Config {
            image: Some(config.image.clone()),
            entrypoint: (!config.command.is_empty()).then(|| config.command.clone()),
            cmd: (!config.args.is_empty()).then(|| config.args.clone()),
            env: Some(config.envs.iter().map(ToString::to_string).collect()),
            labels: Some(labels),
            working_dir: config.working_dir.clone(),
            tty: Some(config.tty),
            open_stdin: Some(config.stdin),
            host_config: Some(HostConfig {
                network_mode: Some(format!("container:{sandbox_id}")),
                runtime,
                ..Default::default()
            }),
            ..Default::default()
        };

        let name = workload_container_name(&config.metadata, &sandbox_config.metadata);
        debug!("Creating container {} in sandbox {}", name, sandbox_id);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name,
                    platform: None,
                }),
                body,
            )
            .await?;

        Ok(created.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await?;
        Ok(())
    }

    async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<(), RuntimeError> {
        for id in self.sandbox_members(sandbox_id).await? {
            debug!("Stopping container {} of sandbox {}", id, sandbox_id);
            self.stop_one(&id).await?;
        }
        self.stop_one(sandbox_id).await
    }

    async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<(), RuntimeError> {
        for id in self.sandbox_members(sandbox_id).await? {
            debug!("Removing container {} of sandbox {}", id, sandbox_id);
            self.remove_one(&id).await?;
        }
        self.remove_one(sandbox_id).await
    }

    async fn list_pod_sandbox(&self) -> Result<Vec<PodSandbox>, RuntimeError> {
        Ok(self
            .list_kind(KIND_SANDBOX)
            .await?
            .into_iter()
            .filter_map(|summary| {
                let labels = summary.labels.unwrap_or_default();
                Some(PodSandbox {
                    id: summary.id?,
                    metadata: sandbox_metadata(&labels),
                    state: if summary.state.as_deref() == Some("running") {
                        SandboxState::Ready
                    } else {
                        SandboxState::NotReady
                    },
                    created_at: summary
                        .created
                        .and_then(|secs| DateTime::from_timestamp(secs, 0)),
                    runtime_handler: labels
                        .get(LABEL_RUNTIME_HANDLER)
                        .cloned()
                        .unwrap_or_default(),
                    annotations: annotations_from(&labels),
                    labels: user_labels(&labels),
                })
            })
            .collect())
    }

    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError> {
        Ok(self
            .list_kind(KIND_CONTAINER)
            .await?
            .into_iter()
            .filter_map(|summary| {
                let labels = summary.labels.unwrap_or_default();
                Some(Container {
                    id: summary.id?,
                    pod_sandbox_id: labels.get(LABEL_SANDBOX_ID).cloned().unwrap_or_default(),
                    metadata: container_metadata(&labels),
                    image: summary.image.unwrap_or_default(),
                    image_ref: summary.image_id.unwrap_or_default(),
                    state: summary
                        .state
                        .as_deref()
                        .map_or(ContainerState::Unknown, state_from_summary),
                    created_at: summary
                        .created
                        .and_then(|secs| DateTime::from_timestamp(secs, 0)),
                    labels: user_labels(&labels),
                })
            })
            .collect())
    }

    async fn container_status(
        &self,
        container_id: &str,
        verbose: bool,
    ) -> Result<ContainerStatus, RuntimeError> {
        let inspected = self.inspect(container_id).await?;

        let raw = if verbose {
            Some(
                serde_json::to_string(&inspected)
                    .map_err(|e| RuntimeError::unexpected(format!("inspect document: {e}")))?,
            )
        } else {
            None
        };

        let config = inspected.config.unwrap_or_default();
        let labels = config.labels.unwrap_or_default();
        let info = raw.map(|raw| verbose_info(&labels, raw)).unwrap_or_default();
        let state = inspected.state.unwrap_or_default();

        Ok(ContainerStatus {
            id: inspected.id.unwrap_or_else(|| container_id.to_string()),
            metadata: container_metadata(&labels),
            state: state.status.map_or(ContainerState::Unknown, state_from_docker),
            created_at: inspected.created.as_deref().and_then(parse_timestamp),
            started_at: state.started_at.as_deref().and_then(parse_timestamp),
            finished_at: state.finished_at.as_deref().and_then(parse_timestamp),
            exit_code: state
                .exit_code
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            image_ref: inspected.image.unwrap_or_default(),
            reason: state.error.unwrap_or_default(),
            message: String::new(),
            labels: user_labels(&labels),
            info,
        })
    }
}

/// Maps a runtime handler onto Docker's `runtime` field; empty means the engine default.
fn docker_runtime(handler: &str) -> Option<String> {
    (!handler.is_empty()).then(|| handler.to_string())
}

fn sandbox_container_name(metadata: &PodSandboxMetadata) -> String {
    format!(
        "k8s_POD_{}_{}_{}_{}",
        metadata.name, metadata.namespace, metadata.uid, metadata.attempt
    )
}

fn workload_container_name(container: &ContainerMetadata, pod: &PodSandboxMetadata) -> String {
    format!(
        "k8s_{}_{}_{}_{}_{}",
        container.name, pod.name, pod.namespace, pod.uid, container.attempt
    )
}

fn base_labels(
    kind: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = labels.clone().into_iter().collect();
    for (key, value) in annotations {
        out.insert(format!("{ANNOTATION_PREFIX}{key}"), value.clone());
    }
    out.insert(LABEL_KIND.to_string(), kind.to_string());
    out
}

fn pod_labels(metadata: &PodSandboxMetadata) -> [(String, String); 3] {
    [
        (LABEL_POD_NAME.to_string(), metadata.name.clone()),
        (LABEL_POD_NAMESPACE.to_string(), metadata.namespace.clone()),
        (LABEL_POD_UID.to_string(), metadata.uid.clone()),
    ]
}

fn publish_ports(config: &PodSandboxConfig) -> (HashMap<String, HashMap<(), ()>>, PortMap) {
    let mut exposed = HashMap::new();
    let mut bindings = PortMap::new();

    for mapping in &config.port_mappings {
        let key = format!("{}/{}", mapping.container_port, mapping.protocol);
        exposed.insert(key.clone(), HashMap::new());
        bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: (!mapping.host_ip.is_empty()).then(|| mapping.host_ip.clone()),
                host_port: Some(mapping.host_port.to_string()),
            }]),
        );
    }

    (exposed, bindings)
}

fn label(labels: &HashMap<String, String>, key: &str) -> String {
    labels.get(key).cloned().unwrap_or_default()
}

fn attempt(labels: &HashMap<String, String>) -> u32 {
    labels
        .get(LABEL_ATTEMPT)
        .and_then(|a| a.parse().ok())
        .unwrap_or_default()
}

fn sandbox_metadata(labels: &HashMap<String, String>) -> PodSandboxMetadata {
    PodSandboxMetadata {
        name: label(labels, LABEL_POD_NAME),
        namespace: label(labels, LABEL_POD_NAMESPACE),
        uid: label(labels, LABEL_POD_UID),
        attempt: attempt(labels),
    }
}

fn container_metadata(labels: &HashMap<String, String>) -> ContainerMetadata {
    ContainerMetadata {
        name: label(labels, LABEL_CONTAINER_NAME),
        attempt: attempt(labels),
    }
}

fn is_internal_label(key: &str) -> bool {
    key.starts_with("podlaunch.")
        || key.starts_with("io.kubernetes.")
        || key.starts_with(ANNOTATION_PREFIX)
}

/// Verbose status detail: the owning sandbox and the raw inspect document.
fn verbose_info(labels: &HashMap<String, String>, raw: String) -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    if let Some(sandbox_id) = labels.get(LABEL_SANDBOX_ID) {
        info.insert("sandboxId".to_string(), sandbox_id.clone());
    }
    info.insert("info".to_string(), raw);
    info
}

fn user_labels(labels: &HashMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| !is_internal_label(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn annotations_from(labels: &HashMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(ANNOTATION_PREFIX)
                .map(|k| (k.to_string(), value.clone()))
        })
        .collect()
}

fn state_from_docker(status: ContainerStateStatusEnum) -> ContainerState {
    match status {
        ContainerStateStatusEnum::CREATED => ContainerState::Created,
        ContainerStateStatusEnum::RUNNING
        | ContainerStateStatusEnum::PAUSED
        | ContainerStateStatusEnum::RESTARTING => ContainerState::Running,
        ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD => ContainerState::Exited,
        _ => ContainerState::Unknown,
    }
}

fn state_from_summary(state: &str) -> ContainerState {
    match state {
        "created" => ContainerState::Created,
        "running" | "paused" | "restarting" => ContainerState::Running,
        "exited" | "dead" => ContainerState::Exited,
        _ => ContainerState::Unknown,
    }
}

/// Parses an engine timestamp; the zero time Docker uses for "never" maps to `None`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.timestamp() > 0)
}
