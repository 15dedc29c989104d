//! In-memory runtime for tests.
//!
//! Keeps sandboxes and containers in maps, records every call, and can be
//! scripted to fail a given operation or to report a sandbox as not ready
//! for a number of status polls.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Container, ContainerConfig, ContainerState, ContainerStatus, Operation, PodSandbox,
    PodSandboxConfig, PodSandboxStatus, RuntimeError, RuntimeService, SandboxState, VersionInfo,
};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Which operation was invoked.
    pub operation: Operation,
    /// The id or name it targeted; empty for list and version calls.
    pub target: String,
}

#[derive(Debug)]
struct MockSandbox {
    config: PodSandboxConfig,
    runtime_handler: String,
    ready: bool,
}

#[derive(Debug)]
struct MockContainer {
    sandbox_id: String,
    config: ContainerConfig,
    state: ContainerState,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    failures: HashMap<Operation, String>,
    not_ready_polls: u32,
    next_id: u32,
    sandboxes: BTreeMap<String, MockSandbox>,
    containers: BTreeMap<String, MockContainer>,
}

/// A scripted runtime that never leaves the process.
///
/// Clones share state, so a test can keep one clone for assertions while the
/// client owns another.
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    /// Creates a runtime where every operation succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future call of `operation` fail with `message`.
    #[must_use]
    pub fn fail_on(self, operation: Operation, message: &str) -> Self {
        self.set_failure(operation, message);
        self
    }

    /// Reports freshly created sandboxes as not ready for `polls` status queries.
    #[must_use]
    pub fn with_not_ready_polls(self, polls: u32) -> Self {
        self.lock().not_ready_polls = polls;
        self
    }

    /// Makes every future call of `operation` fail with `message`.
    pub fn set_failure(&self, operation: Operation, message: &str) {
        self.lock().failures.insert(operation, message.to_string());
    }

    /// Lets `operation` succeed again.
    pub fn clear_failure(&self, operation: Operation) {
        self.lock().failures.remove(&operation);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// The operations invoked so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(|c| c.operation).collect()
    }

    /// How many times `operation` was invoked.
    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Ids of sandboxes that currently exist.
    pub fn sandbox_ids(&self) -> Vec<String> {
        self.lock().sandboxes.keys().cloned().collect()
    }

    /// Ids of containers that currently exist.
    pub fn container_ids(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    /// The config a sandbox was created with.
    pub fn sandbox_config(&self, sandbox_id: &str) -> Option<PodSandboxConfig> {
        self.lock()
            .sandboxes
            .get(sandbox_id)
            .map(|s| s.config.clone())
    }

    /// The runtime handler a sandbox was created with.
    pub fn sandbox_handler(&self, sandbox_id: &str) -> Option<String> {
        self.lock()
            .sandboxes
            .get(sandbox_id)
            .map(|s| s.runtime_handler.clone())
    }

    /// The config a container was created with.
    pub fn container_config(&self, container_id: &str) -> Option<ContainerConfig> {
        self.lock()
            .containers
            .get(container_id)
            .map(|c| c.config.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and returns the scripted failure, if any.
    fn enter(
        &self,
        operation: Operation,
        target: &str,
    ) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(MockCall {
            operation,
            target: target.to_string(),
        });
        match state.failures.get(&operation) {
            Some(message) => Err(RuntimeError::rejected(message.clone())),
            None => Ok(state),
        }
    }
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[async_trait]
impl RuntimeService for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn version(&self) -> Result<VersionInfo, RuntimeError> {
        let _state = self.enter(Operation::Version, "")?;
        Ok(VersionInfo {
            version: "v1".to_string(),
            runtime_name: "mock".to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            runtime_api_version: "v1".to_string(),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<String, RuntimeError> {
        let _state = self.enter(Operation::PullImage, image)?;
        Ok(format!("sha256:{}", image.len()))
    }

    async fn run_pod_sandbox(
        &self,
        config: &PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String, RuntimeError> {
        let mut state = self.enter(Operation::RunPodSandbox, &config.metadata.name)?;
        let id = state.next_id("sandbox");
        let ready = state.not_ready_polls == 0;
        state.sandboxes.insert(
            id.clone(),
            MockSandbox {
                config: config.clone(),
                runtime_handler: runtime_handler.to_string(),
                ready,
            },
        );
        Ok(id)
    }

    async fn pod_sandbox_status(&self, sandbox_id: &str) -> Result<PodSandboxStatus, RuntimeError> {
        let mut state = self.enter(Operation::PodSandboxStatus, sandbox_id)?;
        if state.not_ready_polls > 0 {
            state.not_ready_polls -= 1;
        } else if let Some(sandbox) = state.sandboxes.get_mut(sandbox_id) {
            sandbox.ready = true;
        }

        let sandbox = state
            .sandboxes
            .get(sandbox_id)
            .ok_or_else(|| RuntimeError::not_found("sandbox", sandbox_id))?;
        Ok(PodSandboxStatus {
            id: sandbox_id.to_string(),
            metadata: sandbox.config.metadata.clone(),
            state: if sandbox.ready {
                SandboxState::Ready
            } else {
                SandboxState::NotReady
            },
            created_at: None,
            ip: None,
        })
    }

    async fn create_container(
        &self,
        sandbox_id: &str,
        config: &ContainerConfig,
        _sandbox_config: &PodSandboxConfig,
    ) -> Result<String, RuntimeError> {
        let mut state = self.enter(Operation::CreateContainer, sandbox_id)?;
        if !state.sandboxes.contains_key(sandbox_id) {
            return Err(RuntimeError::not_found("sandbox", sandbox_id));
        }
        let id = state.next_id("container");
        state.containers.insert(
            id.clone(),
            MockContainer {
                sandbox_id: sandbox_id.to_string(),
                config: config.clone(),
                state: ContainerState::Created,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(Operation::StartContainer, container_id)?;
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::not_found("container", container_id))?;
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_pod_sandbox(&self, sandbox_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(Operation::StopPodSandbox, sandbox_id)?;
        let Some(sandbox) = state.sandboxes.get_mut(sandbox_id) else {
            return Err(RuntimeError::not_found("sandbox", sandbox_id));
        };
        sandbox.ready = false;
        for container in state.containers.values_mut() {
            if container.sandbox_id == sandbox_id {
                container.state = ContainerState::Exited;
            }
        }
        Ok(())
    }

    async fn remove_pod_sandbox(&self, sandbox_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(Operation::RemovePodSandbox, sandbox_id)?;
        state.sandboxes.remove(sandbox_id);
        state.containers.retain(|_, c| c.sandbox_id != sandbox_id);
        Ok(())
    }

    async fn list_pod_sandbox(&self) -> Result<Vec<PodSandbox>, RuntimeError> {
        let state = self.enter(Operation::ListPodSandbox, "")?;
        Ok(state
            .sandboxes
            .iter()
            .map(|(id, s)| PodSandbox {
                id: id.clone(),
                metadata: s.config.metadata.clone(),
                state: if s.ready {
                    SandboxState::Ready
                } else {
                    SandboxState::NotReady
                },
                created_at: None,
                labels: s.config.labels.clone(),
                annotations: s.config.annotations.clone(),
                runtime_handler: s.runtime_handler.clone(),
            })
            .collect())
    }

    async fn list_containers(&self) -> Result<Vec<Container>, RuntimeError> {
        let state = self.enter(Operation::ListContainers, "")?;
        Ok(state
            .containers
            .iter()
            .map(|(id, c)| Container {
                id: id.clone(),
                pod_sandbox_id: c.sandbox_id.clone(),
                metadata: c.config.metadata.clone(),
                image: c.config.image.clone(),
                image_ref: c.config.image.clone(),
                state: c.state,
                created_at: None,
                labels: c.config.labels.clone(),
            })
            .collect())
    }

    async fn container_status(
        &self,
        container_id: &str,
        verbose: bool,
    ) -> Result<ContainerStatus, RuntimeError> {
        let state = self.enter(Operation::ContainerStatus, container_id)?;
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| RuntimeError::not_found("container", container_id))?;

        let mut info = BTreeMap::new();
        if verbose {
            info.insert("sandboxId".to_string(), container.sandbox_id.clone());
        }

        Ok(ContainerStatus {
            id: container_id.to_string(),
            metadata: container.config.metadata.clone(),
            state: container.state,
            created_at: None,
            started_at: None,
            finished_at: None,
            exit_code: 0,
            image: container.config.image.clone(),
            image_ref: container.config.image.clone(),
            reason: String::new(),
            message: String::new(),
            labels: container.config.labels.clone(),
            info,
        })
    }
}
