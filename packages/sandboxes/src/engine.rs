// ABOUTME: Execution engine owning interpreter sessions for all environments
// ABOUTME: Routes execute/interrupt/restart calls and tears sessions down on deletion

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::environments::EnvironmentRegistry;
use crate::error::{Result, SandboxError};
use crate::kernel::{ExecuteRequest, KernelLauncher, KernelSession};
use crate::types::ExecutionOutcome;

/// Owns the kernel sessions for every environment in the process.
///
/// Sessions are created lazily on first use and keyed by
/// (sandbox_id, env_id). Each session serializes its own submissions;
/// different environments execute independently.
pub struct ExecutionEngine {
    sessions: RwLock<HashMap<(String, String), Arc<KernelSession>>>,
    launcher: KernelLauncher,
    data_dir: PathBuf,
    environments: EnvironmentRegistry,
}

impl ExecutionEngine {
    pub fn new(
        launcher: KernelLauncher,
        data_dir: PathBuf,
        environments: EnvironmentRegistry,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            launcher,
            data_dir,
            environments,
        }
    }

    async fn require_environment(&self, sandbox_id: &str, env_id: &str) -> Result<()> {
        match self.environments.get_environment(sandbox_id, env_id).await? {
            Some(_) => Ok(()),
            None => Err(SandboxError::NotFound(format!(
                "Environment {} not found in sandbox {}",
                env_id, sandbox_id
            ))),
        }
    }

    /// Get or lazily create the session for an environment
    async fn session(&self, sandbox_id: &str, env_id: &str) -> Arc<KernelSession> {
        let key = (sandbox_id.to_string(), env_id.to_string());

        if let Some(session) = self.sessions.read().await.get(&key) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key)
            .or_insert_with(|| {
                let work_dir = self.data_dir.join(sandbox_id).join(env_id);
                Arc::new(KernelSession::new(
                    sandbox_id,
                    env_id,
                    work_dir,
                    self.launcher.clone(),
                ))
            })
            .clone()
    }

    /// Execute code in an environment's interpreter.
    ///
    /// On a kernel crash the session has already been restarted with a
    /// fresh interpreter, so the stored variable snapshot is cleared to
    /// stay consistent before the error is surfaced.
    pub async fn execute(
        &self,
        sandbox_id: &str,
        env_id: &str,
        request: ExecuteRequest,
    ) -> Result<ExecutionOutcome> {
        self.require_environment(sandbox_id, env_id).await?;

        let session = self.session(sandbox_id, env_id).await;
        match session.execute(request).await {
            Err(e @ SandboxError::KernelCrashed(_)) => {
                if let Err(clear_err) = self
                    .environments
                    .clear_environment_state(sandbox_id, env_id)
                    .await
                {
                    warn!(
                        "Failed to clear state snapshot for {}/{} after crash: {}",
                        sandbox_id, env_id, clear_err
                    );
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Interrupt the in-flight cell, if any. No session or idle session is
    /// a no-op success.
    pub async fn interrupt(&self, sandbox_id: &str, env_id: &str) -> Result<()> {
        self.require_environment(sandbox_id, env_id).await?;

        let key = (sandbox_id.to_string(), env_id.to_string());
        let session = self.sessions.read().await.get(&key).cloned();

        match session {
            Some(session) => session.interrupt().await,
            None => Ok(()),
        }
    }

    /// Unconditionally recreate the environment's interpreter and clear
    /// its variable snapshot
    pub async fn restart(&self, sandbox_id: &str, env_id: &str) -> Result<()> {
        self.require_environment(sandbox_id, env_id).await?;

        let session = self.session(sandbox_id, env_id).await;
        session.restart().await?;

        self.environments
            .clear_environment_state(sandbox_id, env_id)
            .await?;

        info!("Restarted kernel for {}/{}", sandbox_id, env_id);
        Ok(())
    }

    /// Tear down the session attached to one environment, if any
    pub async fn teardown_environment(&self, sandbox_id: &str, env_id: &str) {
        let key = (sandbox_id.to_string(), env_id.to_string());
        let session = self.sessions.write().await.remove(&key);

        if let Some(session) = session {
            debug!("Tearing down session for {}/{}", sandbox_id, env_id);
            session.shutdown().await;
        }
    }

    /// Tear down every session belonging to a sandbox
    pub async fn teardown_sandbox(&self, sandbox_id: &str) {
        let removed: Vec<Arc<KernelSession>> = {
            let mut sessions = self.sessions.write().await;
            let keys: Vec<(String, String)> = sessions
                .keys()
                .filter(|(sid, _)| sid == sandbox_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| sessions.remove(&key))
                .collect()
        };

        for session in removed {
            session.shutdown().await;
        }
    }

    /// Terminate every live interpreter. Part of process teardown.
    pub async fn shutdown(&self) {
        let removed: Vec<Arc<KernelSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        if !removed.is_empty() {
            info!("Shutting down {} kernel sessions", removed.len());
        }
        for session in removed {
            session.shutdown().await;
        }
    }
}
