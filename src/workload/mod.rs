//! Sandboxed workloads: configuration, start sequence and handles.

mod config;
mod env;
mod handle;
mod orchestrator;

pub use config::{ValidationError, WorkloadConfig};
pub use env::{compose_env, EnvVars};
pub use handle::WorkloadHandle;
pub use orchestrator::{Orchestrator, OrchestratorSettings, ReadinessPolicy};
