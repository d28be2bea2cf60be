// ABOUTME: Environment registry managing named environments inside sandbox records
// ABOUTME: Create/list/get/delete/clear operations under per-sandbox write locks

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::registry::SandboxLocks;
use crate::store::SandboxStore;
use crate::types::EnvironmentRecord;

/// Registry for environments nested inside a sandbox's metadata record.
///
/// An environment exists independent of whether an interpreter process is
/// currently attached to it; session teardown on deletion is the execution
/// engine's job and is orchestrated by the control plane.
#[derive(Clone)]
pub struct EnvironmentRegistry {
    store: Arc<SandboxStore>,
    locks: Arc<SandboxLocks>,
}

impl EnvironmentRegistry {
    pub fn new(store: Arc<SandboxStore>, locks: Arc<SandboxLocks>) -> Self {
        Self { store, locks }
    }

    /// Insert a fresh environment into a sandbox's record.
    ///
    /// Returns false when the sandbox does not exist. Creating an env_id
    /// that already exists overwrites it; the overwrite is logged so
    /// callers relying on re-create-as-reset stay observable.
    pub async fn create_environment(&self, sandbox_id: &str, env_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(sandbox_id).await;

        let Some(mut record) = self.store.get(sandbox_id).await? else {
            return Ok(false);
        };

        if record.environments.contains_key(env_id) {
            warn!(
                "Environment {} already exists in sandbox {}, overwriting",
                env_id, sandbox_id
            );
        }

        record
            .environments
            .insert(env_id.to_string(), EnvironmentRecord::new(env_id));
        self.store.put(sandbox_id, &record).await?;

        info!("Created environment {} in sandbox {}", env_id, sandbox_id);
        Ok(true)
    }

    /// List environment IDs for a sandbox; None when the sandbox is absent
    pub async fn list_environments(&self, sandbox_id: &str) -> Result<Option<Vec<String>>> {
        let Some(record) = self.store.get(sandbox_id).await? else {
            return Ok(None);
        };

        Ok(Some(record.environments.keys().cloned().collect()))
    }

    pub async fn get_environment(
        &self,
        sandbox_id: &str,
        env_id: &str,
    ) -> Result<Option<EnvironmentRecord>> {
        let Some(record) = self.store.get(sandbox_id).await? else {
            return Ok(None);
        };

        Ok(record.environments.get(env_id).cloned())
    }

    /// Remove an environment entry; false when sandbox or environment is
    /// absent. Metadata only — the attached session, if any, is torn down
    /// by the control plane.
    pub async fn delete_environment(&self, sandbox_id: &str, env_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(sandbox_id).await;

        let Some(mut record) = self.store.get(sandbox_id).await? else {
            return Ok(false);
        };

        if record.environments.remove(env_id).is_none() {
            return Ok(false);
        }

        self.store.put(sandbox_id, &record).await?;
        info!("Deleted environment {} from sandbox {}", env_id, sandbox_id);
        Ok(true)
    }

    /// Reset the stored variable snapshot to empty.
    ///
    /// Used after a kernel restart so the metadata matches the freshly
    /// restarted interpreter. False when sandbox or environment is absent.
    pub async fn clear_environment_state(&self, sandbox_id: &str, env_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(sandbox_id).await;

        let Some(mut record) = self.store.get(sandbox_id).await? else {
            return Ok(false);
        };

        let Some(env) = record.environments.get_mut(env_id) else {
            return Ok(false);
        };

        env.variables.clear();
        self.store.put(sandbox_id, &record).await?;
        Ok(true)
    }
}
