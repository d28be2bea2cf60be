// ABOUTME: Core type definitions for sandboxes, environments, and executions
// ABOUTME: Defines the persisted record layout and the engine-facing result types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Last-observed lifecycle status of a sandbox's backing compute unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Unit was running when last observed
    Running,
    /// Unit has stopped
    Stopped,
    /// Unit state could not be determined
    Unknown,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

/// Connection info for reaching a sandbox's execution surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host the published port is reachable on
    pub host: String,
    /// Published host port
    pub port: u16,
    /// Access token injected into the unit at creation, unique per sandbox
    pub credential: String,
}

/// A named, independently stateful execution context within a sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// Unique within the owning sandbox
    pub env_id: String,
    /// Best-effort variable snapshot; authoritative state lives in the
    /// live interpreter, so this is only trustworthy right after a
    /// restart (known-empty) or an explicit clear
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
}

impl EnvironmentRecord {
    pub fn new(env_id: impl Into<String>) -> Self {
        Self {
            env_id: env_id.into(),
            variables: HashMap::new(),
        }
    }
}

/// Persisted record for one sandbox, addressed by sandbox ID in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRecord {
    /// Human-readable label, equal to the backing compute unit's name
    pub name: String,
    pub status: SandboxStatus,
    pub endpoint: Endpoint,
    /// Environments created and not yet deleted for this sandbox
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentRecord>,
}

/// State machine for one environment's interpreter session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelState {
    /// No interpreter process has been created yet
    Uninitialized,
    /// Interpreter process is being spawned
    Starting,
    /// Interpreter is alive and idle
    Ready,
    /// A cell is in flight
    Executing,
    /// Interpreter process terminated unexpectedly
    Dead,
}

/// One unit of submitted code plus its captured raw output events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub code: String,
    /// Raw interpreter output events, in emission order
    #[serde(default)]
    pub outputs: Vec<JsonValue>,
}

/// Formatted result of executing one cell
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// Index of the cell that ran (new or overwritten)
    pub cell_index: usize,
    /// Single formatted output unwrapped; multiple outputs as an ordered
    /// list. Callers rely on the scalar form for the common case.
    pub output: JsonValue,
}
