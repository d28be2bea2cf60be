// ABOUTME: Test doubles for exercising registries without a Docker daemon
// ABOUTME: In-memory Runtime implementation with injectable failures

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Result, SandboxError};
use crate::runtime::{Runtime, StartedUnit, UnitEndpoint, UnitInfo, UnitSpec, SANDBOX_ID_LABEL};
use crate::types::SandboxStatus;

/// In-memory runtime standing in for Docker in tests
pub struct StubRuntime {
    units: Mutex<HashMap<String, UnitInfo>>,
    next_port: AtomicU16,
    started: AtomicUsize,
    removed: AtomicUsize,
    fail_next_start: AtomicBool,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(49152),
            started: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            fail_next_start: AtomicBool::new(false),
        }
    }

    /// Make the next start_unit call fail with a provisioning error
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Simulate a unit disappearing behind the control plane's back
    pub fn drop_unit(&self, name: &str) {
        self.units.lock().unwrap().remove(name);
    }

    /// Register a unit directly, bypassing start_unit
    pub fn inject_unit(&self, name: &str, sandbox_id: Option<&str>) {
        self.units.lock().unwrap().insert(
            name.to_string(),
            UnitInfo {
                id: format!("unit-{}", name),
                name: name.to_string(),
                sandbox_id: sandbox_id.map(str::to_string),
                status: SandboxStatus::Running,
            },
        );
    }

    pub fn has_unit(&self, name: &str) -> bool {
        self.units.lock().unwrap().contains_key(name)
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn removed_count(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for StubRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn start_unit(&self, spec: &UnitSpec) -> Result<StartedUnit> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(SandboxError::Provisioning(
                "stub runtime refused to start unit".to_string(),
            ));
        }

        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let info = UnitInfo {
            id: format!("unit-{}", spec.name),
            name: spec.name.clone(),
            sandbox_id: spec.labels.get(SANDBOX_ID_LABEL).cloned(),
            status: SandboxStatus::Running,
        };

        self.units
            .lock()
            .unwrap()
            .insert(spec.name.clone(), info.clone());
        self.started.fetch_add(1, Ordering::SeqCst);

        Ok(StartedUnit {
            unit_id: info.id,
            name: spec.name.clone(),
            endpoint: UnitEndpoint {
                host: "127.0.0.1".to_string(),
                port,
            },
        })
    }

    async fn inspect_unit(&self, name: &str) -> Result<UnitInfo> {
        self.units
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(format!("Unit not found: {}", name)))
    }

    async fn remove_unit(&self, name: &str) -> Result<()> {
        // A unit that is already gone is tolerated, matching the Docker
        // implementation's 404 handling
        self.units.lock().unwrap().remove(name);
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_owned_units(&self) -> Result<Vec<UnitInfo>> {
        Ok(self.units.lock().unwrap().values().cloned().collect())
    }
}
