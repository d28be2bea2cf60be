// ABOUTME: Sandbox registry orchestrating runtime units and durable records
// ABOUTME: Creates, looks up, and deletes sandboxes with per-sandbox write locks

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::error::{Result, SandboxError};
use crate::runtime::{Runtime, UnitSpec, MANAGED_LABEL, SANDBOX_ID_LABEL};
use crate::store::SandboxStore;
use crate::types::{Endpoint, SandboxRecord, SandboxStatus};

/// Container-side port the sandbox image serves its execution surface on
pub const SERVICE_PORT: u16 = 8888;

/// Environment variable carrying the sandbox credential into the unit
pub const CREDENTIAL_ENV_VAR: &str = "CRUCIBLE_ACCESS_TOKEN";

/// Default cleanup sweep interval in minutes
const DEFAULT_CLEANUP_INTERVAL_MINUTES: u64 = 5;

/// Per-sandbox async locks serializing read-modify-write on a record.
///
/// The store has no partial-document updates, so every mutation of a
/// sandbox record (including its environments map) must hold that
/// sandbox's lock for the whole read-modify-write cycle.
pub struct SandboxLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SandboxLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the write lock for one sandbox
    pub async fn acquire(&self, sandbox_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(sandbox_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for a deleted sandbox
    pub async fn forget(&self, sandbox_id: &str) {
        self.inner.lock().await.remove(sandbox_id);
    }
}

impl Default for SandboxLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry for sandbox lifecycle: provisioning, lookup, and deletion
pub struct SandboxRegistry {
    store: Arc<SandboxStore>,
    runtime: Arc<dyn Runtime>,
    locks: Arc<SandboxLocks>,
    image: String,
}

impl SandboxRegistry {
    pub fn new(
        store: Arc<SandboxStore>,
        runtime: Arc<dyn Runtime>,
        locks: Arc<SandboxLocks>,
        image: String,
    ) -> Self {
        Self {
            store,
            runtime,
            locks,
            image,
        }
    }

    /// Provision a new sandbox and persist its record.
    ///
    /// The backing unit is started first; if that fails, nothing is
    /// persisted. The generated credential is injected into the unit as an
    /// environment variable and stored only in this sandbox's record.
    pub async fn create_sandbox(&self) -> Result<String> {
        let sandbox_id = nanoid::nanoid!();
        let credential = nanoid::nanoid!(32);
        let name = format!("crucible-{}", sandbox_id);

        let mut env_vars = HashMap::new();
        env_vars.insert(CREDENTIAL_ENV_VAR.to_string(), credential.clone());

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(SANDBOX_ID_LABEL.to_string(), sandbox_id.clone());

        let spec = UnitSpec {
            name: name.clone(),
            image: self.image.clone(),
            service_port: SERVICE_PORT,
            env_vars,
            labels,
        };

        let unit = self.runtime.start_unit(&spec).await.map_err(|e| {
            error!("Error provisioning unit for sandbox {}: {}", sandbox_id, e);
            match e {
                SandboxError::Provisioning(_) => e,
                other => SandboxError::Provisioning(other.to_string()),
            }
        })?;

        let record = SandboxRecord {
            name,
            status: SandboxStatus::Running,
            endpoint: Endpoint {
                host: unit.endpoint.host,
                port: unit.endpoint.port,
                credential,
            },
            environments: HashMap::new(),
        };

        let guard = self.locks.acquire(&sandbox_id).await;
        if let Err(e) = self.store.put(&sandbox_id, &record).await {
            // Don't leave a unit running without a record; the sweep would
            // catch it eventually, but removing it now keeps state clean
            drop(guard);
            error!("Failed to persist sandbox {}: {}", sandbox_id, e);
            if let Err(remove_err) = self.runtime.remove_unit(&record.name).await {
                warn!(
                    "Failed to remove unit {} after persist failure: {}",
                    record.name, remove_err
                );
            }
            return Err(e);
        }

        info!("Created sandbox {}", sandbox_id);
        Ok(sandbox_id)
    }

    /// Look up a sandbox, refreshing its last-observed unit status.
    ///
    /// Status is observed here rather than polled continuously; a unit
    /// that can no longer be found reads as unknown. Observation failures
    /// fall back to the stored status.
    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<Option<SandboxRecord>> {
        let Some(record) = self.store.get(sandbox_id).await? else {
            return Ok(None);
        };

        let observed = match self.runtime.inspect_unit(&record.name).await {
            Ok(info) => info.status,
            Err(SandboxError::NotFound(_)) => SandboxStatus::Unknown,
            Err(e) => {
                warn!("Could not observe unit for sandbox {}: {}", sandbox_id, e);
                return Ok(Some(record));
            }
        };

        if observed == record.status {
            return Ok(Some(record));
        }

        let _guard = self.locks.acquire(sandbox_id).await;
        let Some(mut record) = self.store.get(sandbox_id).await? else {
            return Ok(None);
        };
        record.status = observed;
        self.store.put(sandbox_id, &record).await?;
        Ok(Some(record))
    }

    pub async fn list_sandboxes(&self) -> Result<HashMap<String, SandboxRecord>> {
        self.store.list_all().await
    }

    /// Delete a sandbox: force-remove the backing unit, then delete the
    /// record. Returns false when the sandbox does not exist. A unit that
    /// is already gone is tolerated; any other removal failure is logged
    /// and the record is still deleted so the metadata never points at an
    /// unreachable unit (the cleanup sweep retries the unit itself).
    pub async fn delete_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        let guard = self.locks.acquire(sandbox_id).await;

        let Some(record) = self.store.get(sandbox_id).await? else {
            return Ok(false);
        };

        if let Err(e) = self.runtime.remove_unit(&record.name).await {
            error!("Error removing unit for sandbox {}: {}", sandbox_id, e);
        }

        self.store.delete(sandbox_id).await?;
        drop(guard);
        self.locks.forget(sandbox_id).await;

        info!("Deleted sandbox {}", sandbox_id);
        Ok(true)
    }

    /// Remove owned units whose sandbox record no longer exists.
    ///
    /// Units are matched by ownership label; anything carrying our label
    /// without a corresponding record is an orphan left behind by a crash
    /// between unit removal and record deletion.
    pub async fn reconcile_orphans(&self) -> Result<Vec<String>> {
        let units = self.runtime.list_owned_units().await?;
        let known: HashSet<String> = self.store.list_ids().await?.into_iter().collect();

        let mut removed = Vec::new();
        for unit in units {
            let orphaned = match &unit.sandbox_id {
                Some(id) => !known.contains(id),
                None => true,
            };

            if orphaned {
                warn!("Removing orphaned unit {} ({})", unit.name, unit.id);
                match self.runtime.remove_unit(&unit.name).await {
                    Ok(_) => removed.push(unit.name),
                    Err(e) => {
                        warn!("Failed to remove orphaned unit {}: {}", unit.name, e);
                    }
                }
            }
        }

        if !removed.is_empty() {
            info!("Reconciled {} orphaned units", removed.len());
        }
        Ok(removed)
    }

    /// Start the periodic orphan reconciliation sweep.
    ///
    /// Interval is configurable via CRUCIBLE_CLEANUP_INTERVAL_MINUTES.
    /// Errors are logged but don't stop the sweep.
    pub fn start_cleanup_task(registry: Arc<SandboxRegistry>) {
        tokio::spawn(async move {
            let interval_minutes = std::env::var("CRUCIBLE_CLEANUP_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&v| (1..=60).contains(&v))
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_MINUTES);

            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_minutes * 60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                "Started sandbox cleanup task (interval: {} minutes)",
                interval_minutes
            );

            loop {
                interval.tick().await;

                if let Err(e) = registry.reconcile_orphans().await {
                    error!("Error during orphan reconciliation: {}", e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubRuntime;

    async fn create_test_registry(runtime: Arc<StubRuntime>) -> SandboxRegistry {
        let pool = sqlx::SqlitePool::connect(":memory:")
            .await
            .expect("Failed to create test database");
        let store = Arc::new(SandboxStore::new(pool));
        store.init().await.expect("Failed to init store");

        SandboxRegistry::new(
            store,
            runtime,
            Arc::new(SandboxLocks::new()),
            "crucible-node:latest".to_string(),
        )
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let runtime = Arc::new(StubRuntime::new());
        let registry = create_test_registry(runtime.clone()).await;

        let id = registry.create_sandbox().await.unwrap();
        let record = registry.get_sandbox(&id).await.unwrap().expect("record missing");

        assert_eq!(record.status, SandboxStatus::Running);
        assert_eq!(record.name, format!("crucible-{}", id));
        assert!(!record.endpoint.credential.is_empty());
        assert!(record.environments.is_empty());
        assert_eq!(runtime.started_count(), 1);
    }

    #[tokio::test]
    async fn test_credentials_are_unique_per_sandbox() {
        let runtime = Arc::new(StubRuntime::new());
        let registry = create_test_registry(runtime).await;

        let a = registry.create_sandbox().await.unwrap();
        let b = registry.create_sandbox().await.unwrap();

        let cred_a = registry.get_sandbox(&a).await.unwrap().unwrap().endpoint.credential;
        let cred_b = registry.get_sandbox(&b).await.unwrap().unwrap().endpoint.credential;

        assert_ne!(cred_a, cred_b);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let runtime = Arc::new(StubRuntime::new());
        let registry = create_test_registry(runtime.clone()).await;

        let id = registry.create_sandbox().await.unwrap();

        assert!(registry.delete_sandbox(&id).await.unwrap());
        assert!(!registry.delete_sandbox(&id).await.unwrap());
        assert!(registry.get_sandbox(&id).await.unwrap().is_none());
        assert_eq!(runtime.removed_count(), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_persists_nothing() {
        let runtime = Arc::new(StubRuntime::new());
        runtime.fail_next_start();
        let registry = create_test_registry(runtime).await;

        let err = registry.create_sandbox().await.unwrap_err();
        assert!(matches!(err, SandboxError::Provisioning(_)));
        assert!(registry.list_sandboxes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_unit() {
        let runtime = Arc::new(StubRuntime::new());
        let registry = create_test_registry(runtime.clone()).await;

        let id = registry.create_sandbox().await.unwrap();
        let name = registry.get_sandbox(&id).await.unwrap().unwrap().name;

        // Unit vanishes out from under us
        runtime.drop_unit(&name);

        assert!(registry.delete_sandbox(&id).await.unwrap());
        assert!(registry.get_sandbox(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_refreshes_observed_status() {
        let runtime = Arc::new(StubRuntime::new());
        let registry = create_test_registry(runtime.clone()).await;

        let id = registry.create_sandbox().await.unwrap();
        let name = registry.get_sandbox(&id).await.unwrap().unwrap().name;

        // Unit disappears behind our back; the next read observes that
        runtime.drop_unit(&name);
        let record = registry.get_sandbox(&id).await.unwrap().unwrap();
        assert_eq!(record.status, SandboxStatus::Unknown);
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphans() {
        let runtime = Arc::new(StubRuntime::new());
        let registry = create_test_registry(runtime.clone()).await;

        let kept = registry.create_sandbox().await.unwrap();
        runtime.inject_unit("crucible-orphan", Some("gone-sandbox"));

        let removed = registry.reconcile_orphans().await.unwrap();
        assert_eq!(removed, vec!["crucible-orphan".to_string()]);

        // The live sandbox's unit is untouched
        let name = registry.get_sandbox(&kept).await.unwrap().unwrap().name;
        assert!(runtime.has_unit(&name));
    }
}
