//! End-to-end orchestration tests against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;

use podlaunch::port::{PortAllocator, PortLeases, PortSource};
use podlaunch::runtime::{
    ContainerState, MockRuntime, Operation, Protocol, RUNTIME_HANDLER_ANNOTATION,
};
use podlaunch::{
    Orchestrator, OrchestratorSettings, ReadinessPolicy, RuntimeClient, StartStep,
    WorkloadConfig, WorkloadError,
};

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Replays fixed candidates, repeating the last one.
struct Sequence(Vec<u16>);

impl PortSource for Sequence {
    fn candidate(&mut self, _min: u16, _max: u16) -> u16 {
        if self.0.len() > 1 {
            self.0.remove(0)
        } else {
            self.0[0]
        }
    }
}

fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        min_port: 30000,
        max_port: 30100,
        readiness: ReadinessPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            timeout: Duration::from_millis(500),
        },
        ..Default::default()
    }
}

fn orchestrator(runtime: &MockRuntime) -> Orchestrator {
    Orchestrator::with_settings(
        RuntimeClient::new(Arc::new(runtime.clone())),
        fast_settings(),
    )
}

fn auto_port() -> WorkloadConfig {
    WorkloadConfig {
        host_port: 0,
        ..Default::default()
    }
}

// -----------------------------------------------------------------------------
// Happy path
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_start_auto_port_runs_container() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let handle = orch.start(Some(auto_port())).await.unwrap();

    let port = handle.host_port();
    assert!((30000..=30100).contains(&port));
    assert_eq!(handle.config().host_port, u32::from(port));

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, ContainerState::Running);
    assert_eq!(
        status.info.get("sandboxId").map(String::as_str),
        Some(handle.sandbox_id())
    );

    assert_eq!(
        runtime.operations(),
        vec![
            Operation::PullImage,
            Operation::RunPodSandbox,
            Operation::PodSandboxStatus,
            Operation::CreateContainer,
            Operation::StartContainer,
            Operation::ContainerStatus,
        ]
    );
}

#[tokio::test]
async fn test_start_with_defaults() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let handle = orch.start(None).await.unwrap();
    assert_eq!(handle.host_port(), 25565);

    let sandbox = runtime.sandbox_config(handle.sandbox_id()).unwrap();
    assert_eq!(sandbox.metadata.name, "minecraft-pod");
    assert_eq!(sandbox.metadata.namespace, "default");
    assert_eq!(sandbox.metadata.uid, "minecraft-123");

    let calls = runtime.calls();
    assert_eq!(calls[0].target, "docker.io/itzg/minecraft-server:latest");
}

#[tokio::test]
async fn test_sandbox_carries_handler_ports_and_dns() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let handle = orch.start(Some(auto_port())).await.unwrap();
    let sandbox = runtime.sandbox_config(handle.sandbox_id()).unwrap();

    assert_eq!(
        sandbox.annotations.get(RUNTIME_HANDLER_ANNOTATION).map(String::as_str),
        Some("kata")
    );
    assert_eq!(
        runtime.sandbox_handler(handle.sandbox_id()).as_deref(),
        Some("kata")
    );

    let mapping = &sandbox.port_mappings[0];
    assert_eq!(mapping.protocol, Protocol::Tcp);
    assert_eq!(mapping.container_port, 25565);
    assert_eq!(mapping.host_port, handle.host_port());

    let dns = sandbox.dns_config.unwrap();
    assert_eq!(dns.servers, vec!["8.8.8.8", "8.8.4.4"]);
}

#[tokio::test]
async fn test_container_env_and_command() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let mut config = auto_port();
    config.accept_eula = false;
    config.command = vec!["/start".to_string(), "--nogui".to_string()];
    config
        .extra_env
        .insert("EULA".to_string(), "TRUE".to_string());
    config
        .extra_env
        .insert("MEMORY".to_string(), "2G".to_string());

    let handle = orch.start(Some(config)).await.unwrap();
    let container = runtime.container_config(handle.container_id()).unwrap();

    let eula: Vec<_> = container.envs.iter().filter(|kv| kv.key == "EULA").collect();
    assert_eq!(eula.len(), 1);
    assert_eq!(eula[0].value, "TRUE");
    assert!(container
        .envs
        .iter()
        .any(|kv| kv.key == "MEMORY" && kv.value == "2G"));
    assert!(container
        .envs
        .iter()
        .any(|kv| kv.key == "TYPE" && kv.value == "PAPER"));
    assert_eq!(container.command, vec!["/start", "--nogui"]);
    assert_eq!(container.metadata.name, "minecraft-server");
}

#[tokio::test]
async fn test_waits_for_sandbox_ready() {
    let runtime = MockRuntime::new().with_not_ready_polls(3);
    let orch = orchestrator(&runtime);

    let handle = orch.start(Some(auto_port())).await.unwrap();
    assert_eq!(runtime.count(Operation::PodSandboxStatus), 4);
    assert!(handle.status().await.unwrap().is_running());
}

// -----------------------------------------------------------------------------
// Failures before the sandbox exists
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_config_makes_no_calls() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let config = WorkloadConfig {
        image: String::new(),
        ..Default::default()
    };
    let err = orch.start(Some(config)).await.unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("image cannot be empty"));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_port_exhaustion_makes_no_calls() {
    let runtime = MockRuntime::new();
    let leases = PortLeases::new();
    let _taken = leases.try_acquire(30050).unwrap();
    let orch = orchestrator(&runtime).with_port_allocator(
        PortAllocator::with_source(Sequence(vec![30050])).with_leases(leases.clone()),
    );

    let err = orch.start(Some(auto_port())).await.unwrap_err();
    assert!(err.is_port_allocation());
    assert!(err.to_string().contains("after 10 attempts"));
    assert!(runtime.calls().is_empty());
    assert_eq!(leases.len(), 1);
}

#[tokio::test]
async fn test_pull_failure_has_no_rollback() {
    let runtime = MockRuntime::new().fail_on(Operation::PullImage, "manifest unknown");
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.operation(), Some(Operation::PullImage));
    assert!(err.rollback().is_none());
    assert_eq!(runtime.count(Operation::RunPodSandbox), 0);
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 0);
    assert!(orch.port_leases().is_empty());
}

#[tokio::test]
async fn test_sandbox_failure_has_no_rollback() {
    let runtime = MockRuntime::new().fail_on(Operation::RunPodSandbox, "handler kata not found");
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.operation(), Some(Operation::RunPodSandbox));
    assert!(err.failed_step().is_none());
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 0);
}

// -----------------------------------------------------------------------------
// Failures after the sandbox exists
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_create_failure_rolls_back_once() {
    let runtime = MockRuntime::new().fail_on(Operation::CreateContainer, "no space left");
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.failed_step(), Some(StartStep::CreateContainer));
    assert_eq!(err.operation(), Some(Operation::CreateContainer));
    assert!(err.rollback().unwrap().succeeded());
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 1);
    assert_eq!(runtime.count(Operation::StopPodSandbox), 0);
    assert!(runtime.sandbox_ids().is_empty());
    assert!(orch.port_leases().is_empty());
}

#[tokio::test]
async fn test_start_failure_rolls_back_once() {
    let runtime = MockRuntime::new().fail_on(Operation::StartContainer, "exec format error");
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.failed_step(), Some(StartStep::StartContainer));
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 1);
    assert!(runtime.sandbox_ids().is_empty());
    assert!(runtime.container_ids().is_empty());
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let runtime = MockRuntime::new()
        .fail_on(Operation::CreateContainer, "no space left")
        .fail_on(Operation::RemovePodSandbox, "device busy");
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.failed_step(), Some(StartStep::CreateContainer));
    let rollback = err.rollback().unwrap();
    assert!(!rollback.succeeded());
    assert!(err.to_string().contains("sandbox removal also failed"));
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 1);
    assert_eq!(runtime.sandbox_ids().len(), 1);
}

#[tokio::test]
async fn test_readiness_timeout_rolls_back() {
    let runtime = MockRuntime::new().with_not_ready_polls(u32::MAX);
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.failed_step(), Some(StartStep::AwaitSandbox));
    match &err {
        WorkloadError::Start { source, .. } => {
            assert!(matches!(**source, WorkloadError::SandboxNotReady { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runtime.count(Operation::CreateContainer), 0);
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 1);
}

#[tokio::test]
async fn test_status_poll_failure_rolls_back() {
    let runtime = MockRuntime::new().fail_on(Operation::PodSandboxStatus, "sandbox vanished");
    let orch = orchestrator(&runtime);

    let err = orch.start(Some(auto_port())).await.unwrap_err();

    assert_eq!(err.failed_step(), Some(StartStep::AwaitSandbox));
    assert_eq!(err.operation(), Some(Operation::PodSandboxStatus));
    assert_eq!(runtime.count(Operation::PodSandboxStatus), 1);
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 1);
}

// -----------------------------------------------------------------------------
// Stop
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_then_remove() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);
    let handle = orch.start(Some(auto_port())).await.unwrap();
    let sandbox_id = handle.sandbox_id().to_string();

    handle.stop().await.unwrap();

    let ops = runtime.operations();
    assert_eq!(
        &ops[ops.len() - 2..],
        &[Operation::StopPodSandbox, Operation::RemovePodSandbox]
    );
    let calls = runtime.calls();
    assert!(calls[calls.len() - 2..].iter().all(|c| c.target == sandbox_id));
    assert!(runtime.sandbox_ids().is_empty());
    assert!(orch.port_leases().is_empty());
}

#[tokio::test]
async fn test_stop_failure_skips_remove() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);
    let handle = orch.start(Some(auto_port())).await.unwrap();

    let port = handle.host_port();
    let sandbox_id = handle.sandbox_id().to_string();

    runtime.set_failure(Operation::StopPodSandbox, "timed out");
    let err = handle.stop().await.unwrap_err();

    assert_eq!(err.operation(), Some(Operation::StopPodSandbox));
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 0);
    assert_eq!(runtime.sandbox_ids(), vec![sandbox_id.clone()]);
    assert!(matches!(&err, WorkloadError::Stop { sandbox_id: id, .. } if *id == sandbox_id));

    // The sandbox may still publish the port, so it stays reserved.
    assert_eq!(err.held_port(), Some(port));
    assert!(orch.port_leases().is_leased(port));

    drop(err);
    assert!(orch.port_leases().is_empty());
}

// -----------------------------------------------------------------------------
// Abandoned starts
// -----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cancelled_start_removes_sandbox_before_releasing_port() {
    let runtime = MockRuntime::new().with_not_ready_polls(u32::MAX);
    let settings = OrchestratorSettings {
        readiness: ReadinessPolicy {
            timeout: Duration::from_secs(60),
            ..fast_settings().readiness
        },
        ..fast_settings()
    };
    let orch = Orchestrator::with_settings(
        RuntimeClient::new(Arc::new(runtime.clone())),
        settings,
    );

    let outcome =
        tokio::time::timeout(Duration::from_secs(5), orch.start(Some(auto_port()))).await;
    assert!(outcome.is_err(), "start should still be waiting for readiness");
    assert_eq!(runtime.count(Operation::RunPodSandbox), 1);
    assert_eq!(orch.port_leases().len(), 1);

    for _ in 0..100 {
        if runtime.sandbox_ids().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert!(runtime.sandbox_ids().is_empty());
    assert_eq!(runtime.count(Operation::RemovePodSandbox), 1);
    assert!(orch.port_leases().is_empty());
}

#[tokio::test]
async fn test_completed_start_leaves_sandbox_running() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let handle = orch.start(Some(auto_port())).await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(runtime.count(Operation::RemovePodSandbox), 0);
    assert_eq!(runtime.sandbox_ids(), vec![handle.sandbox_id().to_string()]);
    assert!(orch.port_leases().is_leased(handle.host_port()));
}

// -----------------------------------------------------------------------------
// Port leasing across workloads
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_workloads_get_distinct_ports() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime).with_port_allocator(PortAllocator::with_source(Sequence(
        vec![30007, 30007, 30008],
    )));

    let first = orch.start(Some(auto_port())).await.unwrap();
    let second = orch.start(Some(auto_port())).await.unwrap();

    assert_eq!(first.host_port(), 30007);
    assert_eq!(second.host_port(), 30008);
    assert_eq!(orch.port_leases().len(), 2);

    first.stop().await.unwrap();
    assert_eq!(orch.port_leases().len(), 1);
    drop(second);
    assert!(orch.port_leases().is_empty());
}

#[tokio::test]
async fn test_explicit_port_in_use_is_rejected() {
    let runtime = MockRuntime::new();
    let orch = orchestrator(&runtime);

    let _first = orch.start(None).await.unwrap();
    let err = orch.start(None).await.unwrap_err();

    assert!(err.is_port_allocation());
    assert_eq!(runtime.count(Operation::PullImage), 1);
}
