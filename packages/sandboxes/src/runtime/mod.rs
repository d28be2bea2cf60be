// ABOUTME: Runtime trait and implementations for sandbox compute backends
// ABOUTME: Defines the abstract interface for compute unit lifecycle management

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::SandboxStatus;

pub mod docker;

pub use docker::DockerRuntime;

/// Label marking compute units owned by this control plane
pub const MANAGED_LABEL: &str = "crucible.managed";
/// Label carrying the owning sandbox ID, used to reconcile orphaned units
pub const SANDBOX_ID_LABEL: &str = "crucible.sandbox_id";

/// Specification for a new compute unit
#[derive(Debug, Clone)]
pub struct UnitSpec {
    /// Unit name, unique per sandbox
    pub name: String,
    /// Image the unit runs
    pub image: String,
    /// Container-side port to publish on an ephemeral host port
    pub service_port: u16,
    /// Environment variables injected at start (carries the credential)
    pub env_vars: HashMap<String, String>,
    /// Ownership labels applied to the unit
    pub labels: HashMap<String, String>,
}

/// Published network endpoint of a started unit
#[derive(Debug, Clone)]
pub struct UnitEndpoint {
    pub host: String,
    pub port: u16,
}

/// Result of starting a compute unit
#[derive(Debug, Clone)]
pub struct StartedUnit {
    /// Runtime-assigned unit ID
    pub unit_id: String,
    /// Unit name as requested
    pub name: String,
    /// Endpoint the published service port is reachable on
    pub endpoint: UnitEndpoint,
}

/// Summary of an existing compute unit
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub id: String,
    pub name: String,
    /// Owning sandbox ID read back from the unit's labels, if present
    pub sandbox_id: Option<String>,
    pub status: SandboxStatus,
}

/// Control-plane client for the compute backend hosting sandboxes.
///
/// One backing implementation exists today (Docker); the registry logic is
/// written against this trait so new backends slot in without touching it.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Verify the backend is reachable
    async fn ping(&self) -> Result<()>;

    /// Create and start a compute unit, returning its assigned endpoint
    async fn start_unit(&self, spec: &UnitSpec) -> Result<StartedUnit>;

    /// Inspect a unit by name
    async fn inspect_unit(&self, name: &str) -> Result<UnitInfo>;

    /// Force-remove a unit by name. A unit that is already gone is not an
    /// error; implementations log and return Ok.
    async fn remove_unit(&self, name: &str) -> Result<()>;

    /// List all units carrying this control plane's ownership label
    async fn list_owned_units(&self) -> Result<Vec<UnitInfo>>;
}
