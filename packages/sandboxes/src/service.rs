// ABOUTME: Control plane facade constructed once at process start
// ABOUTME: Wires store, runtime, registries, and engine; owns cross-component cascades

use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::ExecutionEngine;
use crate::environments::EnvironmentRegistry;
use crate::error::Result;
use crate::kernel::KernelLauncher;
use crate::registry::{SandboxLocks, SandboxRegistry};
use crate::runtime::Runtime;
use crate::store::SandboxStore;

/// Construction options for the control plane
pub struct ControlPlaneOptions {
    /// Image backing every sandbox unit
    pub kernel_image: String,
    /// Root directory for per-environment working directories
    pub data_dir: PathBuf,
    /// Interpreter driver command
    pub launcher: KernelLauncher,
}

/// The one registry object handlers receive.
///
/// Built once at process start with an explicit init phase (store schema)
/// and an explicit teardown phase (terminate live interpreters). Operations
/// that span components — sandbox deletion, environment deletion — cascade
/// here so sessions never outlive their metadata.
pub struct ControlPlane {
    pub sandboxes: Arc<SandboxRegistry>,
    pub environments: EnvironmentRegistry,
    pub engine: Arc<ExecutionEngine>,
}

impl ControlPlane {
    pub async fn new(
        pool: SqlitePool,
        runtime: Arc<dyn Runtime>,
        options: ControlPlaneOptions,
    ) -> Result<Self> {
        let store = Arc::new(SandboxStore::new(pool));
        store.init().await?;

        let locks = Arc::new(SandboxLocks::new());
        let environments = EnvironmentRegistry::new(store.clone(), locks.clone());
        let engine = Arc::new(ExecutionEngine::new(
            options.launcher,
            options.data_dir,
            environments.clone(),
        ));
        let sandboxes = Arc::new(SandboxRegistry::new(
            store,
            runtime,
            locks,
            options.kernel_image,
        ));

        Ok(Self {
            sandboxes,
            environments,
            engine,
        })
    }

    /// Delete a sandbox, tearing down any attached kernel sessions first
    pub async fn delete_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        self.engine.teardown_sandbox(sandbox_id).await;
        self.sandboxes.delete_sandbox(sandbox_id).await
    }

    /// Delete an environment, tearing down its kernel session when the
    /// entry existed
    pub async fn delete_environment(&self, sandbox_id: &str, env_id: &str) -> Result<bool> {
        let removed = self
            .environments
            .delete_environment(sandbox_id, env_id)
            .await?;

        if removed {
            self.engine.teardown_environment(sandbox_id, env_id).await;
        }

        Ok(removed)
    }

    /// Terminate all live interpreters. Call before process exit.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
