//! Error types for workload orchestration.
//!
//! Every failure a caller sees is a single [`WorkloadError`] naming the step
//! that failed. Failures after the sandbox exists also carry the outcome of
//! the automatic cleanup, so a failed cleanup is never silently lost.

use std::time::Duration;

use crate::endpoint::EndpointError;
use crate::port::{PortError, PortLease};
use crate::runtime::{Operation, RuntimeError};
use crate::workload::ValidationError;

/// Errors returned by the client, orchestrator and workload handle.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// The endpoint string could not be parsed.
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),

    /// The runtime could not be reached.
    #[error("failed to connect to {endpoint}")]
    Connection {
        /// Normalized endpoint address.
        endpoint: String,
        /// Transport failure.
        #[source]
        source: RuntimeError,
    },

    /// The runtime did not answer within the connection bound.
    #[error("timed out connecting to {endpoint} after {timeout_secs} seconds")]
    ConnectTimeout {
        /// Normalized endpoint address.
        endpoint: String,
        /// The bound that was exceeded.
        timeout_secs: u64,
    },

    /// The workload configuration is invalid; nothing was sent to the runtime.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    /// No host port could be chosen; nothing was sent to the runtime.
    #[error("host port allocation failed: {0}")]
    PortAllocation(#[from] PortError),

    /// A runtime call failed.
    #[error("{operation} failed{}", for_target(.target))]
    RemoteCall {
        /// Which call failed.
        operation: Operation,
        /// Image, sandbox or container the call targeted; empty for lists.
        target: String,
        /// Backend failure.
        #[source]
        source: RuntimeError,
    },

    /// The sandbox never reported ready within the readiness ceiling.
    #[error("sandbox {sandbox_id} not ready after {waited:?}")]
    SandboxNotReady {
        /// Sandbox that never became ready.
        sandbox_id: String,
        /// Time spent polling.
        waited: Duration,
    },

    /// A step after sandbox creation failed and the sandbox was rolled back.
    #[error("{step} failed ({rollback})")]
    Start {
        /// Step that failed.
        step: StartStep,
        /// Primary cause.
        #[source]
        source: Box<WorkloadError>,
        /// Outcome of removing the sandbox.
        rollback: Rollback,
    },

    /// Tearing a workload down failed. The host port stays reserved for as
    /// long as this error is kept, since the sandbox may still publish it.
    #[error("failed to tear down sandbox {sandbox_id}")]
    Stop {
        /// Sandbox that may still exist.
        sandbox_id: String,
        /// The failing runtime call.
        #[source]
        source: Box<WorkloadError>,
        /// Reservation of the workload's host port.
        lease: Option<PortLease>,
    },
}

fn for_target(target: &str) -> String {
    if target.is_empty() {
        String::new()
    } else {
        format!(" for {target}")
    }
}

/// Orchestration steps that run while a sandbox exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    /// Waiting for the sandbox to report ready.
    AwaitSandbox,
    /// Creating the workload container.
    CreateContainer,
    /// Starting the workload container.
    StartContainer,
}

impl std::fmt::Display for StartStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitSandbox => write!(f, "waiting for sandbox"),
            Self::CreateContainer => write!(f, "create container"),
            Self::StartContainer => write!(f, "start container"),
        }
    }
}

/// Outcome of removing a sandbox after a failed start.
#[derive(Debug)]
pub enum Rollback {
    /// The sandbox was removed.
    Removed,
    /// Removal failed; the sandbox may still exist.
    Failed(Box<WorkloadError>),
}

impl Rollback {
    /// Returns true if the sandbox was removed.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl std::fmt::Display for Rollback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removed => write!(f, "sandbox removed"),
            Self::Failed(err) => write!(f, "sandbox removal also failed: {err}"),
        }
    }
}

impl WorkloadError {
    /// Creates a `RemoteCall` error.
    pub fn remote(operation: Operation, target: impl Into<String>, source: RuntimeError) -> Self {
        Self::RemoteCall {
            operation,
            target: target.into(),
            source,
        }
    }

    /// The step that failed, for errors raised after the sandbox existed.
    pub fn failed_step(&self) -> Option<StartStep> {
        match self {
            Self::Start { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The cleanup outcome, for errors raised after the sandbox existed.
    pub fn rollback(&self) -> Option<&Rollback> {
        match self {
            Self::Start { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// The runtime operation behind this error, looking through a failed start.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::RemoteCall { operation, .. } => Some(*operation),
            Self::Start { source, .. } | Self::Stop { source, .. } => source.operation(),
            _ => None,
        }
    }

    /// The host port still reserved by a failed teardown.
    pub fn held_port(&self) -> Option<u16> {
        match self {
            Self::Stop { lease, .. } => lease.as_ref().map(PortLease::port),
            _ => None,
        }
    }

    /// Returns true if the configuration was rejected.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if no host port could be chosen.
    pub fn is_port_allocation(&self) -> bool {
        matches!(self, Self::PortAllocation(_))
    }

    /// Returns true if the runtime could not be reached.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectTimeout { .. } | Self::InvalidEndpoint(_)
        )
    }
}
