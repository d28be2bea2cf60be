// ABOUTME: Error types for sandbox and kernel operations
// ABOUTME: Covers provisioning, metadata, and interpreter lifecycle failures

use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Sandbox or environment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate creation where overwrite is not intended
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Backing compute unit or interpreter process failed to start or stop
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Interpreter process died; it has been restarted, but accumulated
    /// state is gone and the caller must resubmit
    #[error("Kernel crashed: {0}")]
    KernelCrashed(String),

    /// Code submission exceeded its time budget
    #[error("Execution timed out after {seconds} seconds")]
    ExecutionTimeout { seconds: u64 },

    /// Malformed submission rejected before it reached the interpreter
    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    /// Concurrent execution rejected for an environment that is in use
    #[error("Environment is busy: {0}")]
    Busy(String),

    /// Docker/runtime-related errors
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
