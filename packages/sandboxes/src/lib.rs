// ABOUTME: Sandbox lifecycle and stateful code execution for Crucible
// ABOUTME: Docker-backed sandboxes hosting per-environment interpreter kernels

pub mod engine;
pub mod environments;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use engine::ExecutionEngine;
pub use environments::EnvironmentRegistry;
pub use error::{Result, SandboxError};
pub use kernel::{ExecuteRequest, KernelLauncher, KernelSession, DEFAULT_EXECUTION_TIMEOUT_SECS};
pub use registry::{SandboxLocks, SandboxRegistry};
pub use runtime::{DockerRuntime, Runtime, StartedUnit, UnitEndpoint, UnitInfo, UnitSpec};
pub use service::{ControlPlane, ControlPlaneOptions};
pub use store::SandboxStore;
pub use types::{
    Cell, Endpoint, EnvironmentRecord, ExecutionOutcome, KernelState, SandboxRecord, SandboxStatus,
};
