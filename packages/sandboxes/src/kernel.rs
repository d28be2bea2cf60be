// ABOUTME: Interpreter kernel session bound to one environment
// ABOUTME: Manages the driver child process, cell log, crash recovery, and output formatting

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::error::{Result, SandboxError};
use crate::types::{Cell, ExecutionOutcome, KernelState};

/// Default time budget for one cell when the caller does not pass one
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;

/// How long to wait for a fresh interpreter to report ready
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for an interpreter to acknowledge an interrupt before it
/// is forced down
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// File name of the persisted cell log inside the working directory
const CELL_LOG_FILE: &str = "cells.json";

/// Locates and describes the interpreter driver command
#[derive(Debug, Clone)]
pub struct KernelLauncher {
    /// Interpreter binary, e.g. "python3"
    pub program: String,
    /// Driver script the interpreter runs
    pub script: PathBuf,
}

impl KernelLauncher {
    /// Find the kernel driver script.
    ///
    /// CRUCIBLE_KERNEL_DRIVER overrides the search; otherwise the usual
    /// in-repo locations are tried. The interpreter binary comes from
    /// CRUCIBLE_PYTHON_BIN, defaulting to python3.
    pub fn locate() -> Result<Self> {
        let program =
            std::env::var("CRUCIBLE_PYTHON_BIN").unwrap_or_else(|_| "python3".to_string());

        if let Ok(path) = std::env::var("CRUCIBLE_KERNEL_DRIVER") {
            let script = PathBuf::from(path);
            if script.exists() {
                return Ok(Self { program, script });
            }
            return Err(SandboxError::Provisioning(format!(
                "CRUCIBLE_KERNEL_DRIVER points at a missing file: {}",
                script.display()
            )));
        }

        let candidates = [
            PathBuf::from("packages/sandboxes/driver/kernel_driver.py"),
            PathBuf::from("../sandboxes/driver/kernel_driver.py"),
            PathBuf::from("./driver/kernel_driver.py"),
        ];

        for script in candidates {
            if script.exists() {
                debug!("Found kernel driver at: {}", script.display());
                return Ok(Self { program, script });
            }
        }

        Err(SandboxError::Provisioning(
            "Could not find kernel driver script. Tried: packages/sandboxes/driver/kernel_driver.py"
                .to_string(),
        ))
    }

    /// Build a launcher from an explicit command, used by tests and
    /// deployments with a relocated driver
    pub fn with_command(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }
}

/// Parameters for one code submission
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub code: String,
    /// Overwrite this cell in place instead of appending, when it exists
    pub cell_index: Option<usize>,
    /// Time budget in seconds; engine default applies when absent
    pub timeout: Option<u64>,
    /// Recreate the interpreter before running, discarding its state
    pub reset: bool,
}

impl ExecuteRequest {
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            cell_index: None,
            timeout: None,
            reset: false,
        }
    }
}

/// Request frame sent to the driver, one JSON object per line
#[derive(Serialize)]
struct DriverRequest<'a> {
    code: &'a str,
}

/// Reply frames received from the driver
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverReply {
    Ready,
    Result { outputs: Vec<JsonValue> },
}

struct SessionInner {
    state: KernelState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    replies: Option<mpsc::UnboundedReceiver<DriverReply>>,
    cells: Vec<Cell>,
}

/// The live interpreter session backing one environment.
///
/// The session exclusively owns its interpreter process handle; on crash,
/// ownership transfers atomically to a freshly spawned process. All
/// submissions run under the inner mutex, which queues waiters fairly, so
/// two requests against the same environment can never interleave.
pub struct KernelSession {
    sandbox_id: String,
    env_id: String,
    work_dir: PathBuf,
    launcher: KernelLauncher,
    inner: Mutex<SessionInner>,
    // Interrupt delivery happens while the inner mutex is held by the
    // in-flight execution, so the pid and the executing flag live outside
    pid: StdMutex<Option<i32>>,
    executing: AtomicBool,
}

impl KernelSession {
    pub fn new(
        sandbox_id: impl Into<String>,
        env_id: impl Into<String>,
        work_dir: PathBuf,
        launcher: KernelLauncher,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            env_id: env_id.into(),
            work_dir,
            launcher,
            inner: Mutex::new(SessionInner {
                state: KernelState::Uninitialized,
                child: None,
                stdin: None,
                replies: None,
                cells: Vec::new(),
            }),
            pid: StdMutex::new(None),
            executing: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> KernelState {
        self.inner.lock().await.state
    }

    pub async fn cell_count(&self) -> usize {
        self.inner.lock().await.cells.len()
    }

    /// Execute one cell against the interpreter.
    ///
    /// Starts the interpreter first when it is not alive or reset was
    /// requested. A code-level error comes back as a structured error
    /// output and leaves the session ready; process death surfaces
    /// KernelCrashed after an automatic restart.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionOutcome> {
        let timeout = Duration::from_secs(
            request.timeout.unwrap_or(DEFAULT_EXECUTION_TIMEOUT_SECS),
        );

        let mut inner = self.inner.lock().await;

        if request.reset || !Self::kernel_alive(&mut inner) {
            self.start_kernel(&mut inner).await?;
        }

        let cell_index = match request.cell_index {
            Some(index) if index < inner.cells.len() => {
                inner.cells[index] = Cell {
                    code: request.code,
                    outputs: Vec::new(),
                };
                index
            }
            _ => {
                inner.cells.push(Cell {
                    code: request.code,
                    outputs: Vec::new(),
                });
                inner.cells.len() - 1
            }
        };

        inner.state = KernelState::Executing;
        self.executing.store(true, Ordering::SeqCst);
        let result = self.run_cell(&mut inner, cell_index, timeout).await;
        self.executing.store(false, Ordering::SeqCst);

        result
    }

    async fn run_cell(
        &self,
        inner: &mut SessionInner,
        cell_index: usize,
        timeout: Duration,
    ) -> Result<ExecutionOutcome> {
        let frame = serde_json::to_string(&DriverRequest {
            code: &inner.cells[cell_index].code,
        })?;

        let write_ok = match inner.stdin.as_mut() {
            Some(stdin) => writeln!(stdin, "{}", frame)
                .and_then(|_| stdin.flush())
                .is_ok(),
            None => {
                return Err(SandboxError::Provisioning(
                    "Interpreter is not attached".to_string(),
                ))
            }
        };

        if !write_ok {
            return self.handle_crash(inner, "interpreter stdin closed").await;
        }

        let reply = match inner.replies.as_mut() {
            Some(replies) => tokio::time::timeout(timeout, replies.recv()).await,
            None => {
                return Err(SandboxError::Provisioning(
                    "Interpreter is not attached".to_string(),
                ))
            }
        };

        match reply {
            Ok(Some(DriverReply::Result { outputs })) => {
                inner.cells[cell_index].outputs = outputs.clone();
                inner.state = KernelState::Ready;
                self.persist_cells(&inner.cells).await;
                Ok(format_outputs(&outputs, cell_index))
            }
            Ok(Some(other)) => {
                let why = format!("unexpected reply from interpreter: {:?}", other);
                self.handle_crash(inner, &why).await
            }
            Ok(None) => {
                self.handle_crash(inner, "interpreter exited during execution")
                    .await
            }
            Err(_) => self.handle_timeout(inner, timeout).await,
        }
    }

    /// Crash path: the process died under us. Restart immediately so the
    /// environment stays usable, and surface the loss to the caller —
    /// retrying the same code against fresh state could produce different
    /// results, so that decision belongs to the caller.
    async fn handle_crash(
        &self,
        inner: &mut SessionInner,
        why: &str,
    ) -> Result<ExecutionOutcome> {
        warn!(
            "Kernel for {}/{} died: {}",
            self.sandbox_id, self.env_id, why
        );
        inner.state = KernelState::Dead;
        self.stop_kernel(inner);

        if let Err(e) = self.start_kernel(inner).await {
            error!(
                "Failed to restart kernel for {}/{}: {}",
                self.sandbox_id, self.env_id, e
            );
        }

        Err(SandboxError::KernelCrashed(format!(
            "Kernel died and was restarted ({})",
            why
        )))
    }

    /// Timeout path: interrupt the in-flight cell. If the interpreter
    /// acknowledges within the grace period the session stays alive;
    /// otherwise it is forced down and recreated.
    async fn handle_timeout(
        &self,
        inner: &mut SessionInner,
        timeout: Duration,
    ) -> Result<ExecutionOutcome> {
        warn!(
            "Execution in {}/{} exceeded {}s, interrupting",
            self.sandbox_id,
            self.env_id,
            timeout.as_secs()
        );
        self.signal(libc::SIGINT);

        let acknowledged = match inner.replies.as_mut() {
            Some(replies) => matches!(
                tokio::time::timeout(INTERRUPT_GRACE, replies.recv()).await,
                Ok(Some(DriverReply::Result { .. }))
            ),
            None => false,
        };

        if acknowledged {
            inner.state = KernelState::Ready;
        } else {
            warn!(
                "Kernel for {}/{} ignored interrupt, forcing restart",
                self.sandbox_id, self.env_id
            );
            inner.state = KernelState::Dead;
            self.stop_kernel(inner);
            if let Err(e) = self.start_kernel(inner).await {
                error!(
                    "Failed to restart kernel for {}/{}: {}",
                    self.sandbox_id, self.env_id, e
                );
            }
        }

        Err(SandboxError::ExecutionTimeout {
            seconds: timeout.as_secs(),
        })
    }

    /// Request cancellation of the currently executing cell without
    /// destroying accumulated variable state. A no-op success when nothing
    /// is in flight. If the interpreter ignores the signal past the grace
    /// period it is forced down; the in-flight call then observes the
    /// death and runs crash recovery.
    pub async fn interrupt(&self) -> Result<()> {
        if !self.executing.load(Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Interrupting kernel for {}/{}", self.sandbox_id, self.env_id);
        self.signal(libc::SIGINT);

        let deadline = tokio::time::Instant::now() + INTERRUPT_GRACE;
        while tokio::time::Instant::now() < deadline {
            if !self.executing.load(Ordering::SeqCst) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        warn!(
            "Kernel for {}/{} did not respond to interrupt, killing it",
            self.sandbox_id, self.env_id
        );
        self.signal(libc::SIGKILL);
        Ok(())
    }

    /// Unconditional teardown and fresh interpreter, discarding all
    /// variable state. The cell log survives restarts.
    pub async fn restart(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.start_kernel(&mut inner).await
    }

    /// Tear down the interpreter without restarting
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_kernel(&mut inner);
        inner.state = KernelState::Uninitialized;
    }

    fn kernel_alive(inner: &mut SessionInner) -> bool {
        match inner.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn start_kernel(&self, inner: &mut SessionInner) -> Result<()> {
        self.stop_kernel(inner);
        inner.state = KernelState::Starting;

        std::fs::create_dir_all(&self.work_dir)?;

        let mut child = Command::new(&self.launcher.program)
            .arg(&self.launcher.script)
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                inner.state = KernelState::Uninitialized;
                SandboxError::Provisioning(format!("Failed to start interpreter: {}", e))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SandboxError::Provisioning("Failed to capture interpreter stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SandboxError::Provisioning("Failed to capture interpreter stdout".to_string())
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            Self::read_replies(stdout, tx);
        });

        *self.pid.lock().unwrap() = Some(child.id() as i32);

        match tokio::time::timeout(STARTUP_TIMEOUT, rx.recv()).await {
            Ok(Some(DriverReply::Ready)) => {}
            Ok(_) => {
                let _ = child.kill();
                let _ = child.wait();
                *self.pid.lock().unwrap() = None;
                inner.state = KernelState::Uninitialized;
                return Err(SandboxError::Provisioning(
                    "Interpreter did not report ready".to_string(),
                ));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                *self.pid.lock().unwrap() = None;
                inner.state = KernelState::Uninitialized;
                return Err(SandboxError::Provisioning(
                    "Timed out waiting for interpreter to become ready".to_string(),
                ));
            }
        }

        inner.child = Some(child);
        inner.stdin = Some(stdin);
        inner.replies = Some(rx);
        inner.state = KernelState::Ready;

        debug!("Kernel ready for {}/{}", self.sandbox_id, self.env_id);
        Ok(())
    }

    fn stop_kernel(&self, inner: &mut SessionInner) {
        inner.stdin = None;
        inner.replies = None;
        *self.pid.lock().unwrap() = None;

        if let Some(mut child) = inner.child.take() {
            if let Err(e) = child.kill() {
                warn!(
                    "Failed to kill interpreter for {}/{}: {}",
                    self.sandbox_id, self.env_id, e
                );
            }
            let _ = child.wait();
        }
    }

    fn signal(&self, signal: i32) {
        if let Some(pid) = *self.pid.lock().unwrap() {
            unsafe {
                libc::kill(pid, signal);
            }
        }
    }

    /// Read reply frames from driver stdout (runs on a blocking thread)
    fn read_replies(stdout: ChildStdout, tx: mpsc::UnboundedSender<DriverReply>) {
        let reader = BufReader::new(stdout);

        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<DriverReply>(&line) {
                        Ok(reply) => {
                            if tx.send(reply).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to parse driver reply: {} - Line: {}", e, line);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to read from driver stdout: {}", e);
                    break;
                }
            }
        }

        debug!("Driver stdout reader ended");
    }

    /// Write the cell log artifact next to the environment's files.
    /// Best effort; a failed write never fails the execution.
    async fn persist_cells(&self, cells: &[Cell]) {
        let artifact = serde_json::json!({
            "env_id": self.env_id,
            "updated_at": chrono::Utc::now().to_rfc3339(),
            "cells": cells,
        });

        let path = self.work_dir.join(CELL_LOG_FILE);
        match serde_json::to_vec_pretty(&artifact) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    warn!("Failed to write cell log {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("Failed to serialize cell log: {}", e),
        }
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        // Synchronous cleanup - just kill the process
        if let Some(mut child) = self.inner.get_mut().child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Collapse raw interpreter output events into the single logical result
/// callers receive. One event comes back unwrapped; several come back as
/// an ordered list. Callers depend on the scalar form for the common case.
pub(crate) fn format_outputs(outputs: &[JsonValue], cell_index: usize) -> ExecutionOutcome {
    if outputs.is_empty() {
        return ExecutionOutcome {
            cell_index,
            output: JsonValue::String(String::new()),
        };
    }

    let mut formatted: Vec<JsonValue> = outputs.iter().map(format_single_output).collect();
    let output = if formatted.len() > 1 {
        JsonValue::Array(formatted)
    } else {
        formatted.remove(0)
    };

    ExecutionOutcome { cell_index, output }
}

fn format_single_output(output: &JsonValue) -> JsonValue {
    match output.get("output_type").and_then(JsonValue::as_str) {
        Some("stream") => output
            .get("text")
            .cloned()
            .unwrap_or_else(|| JsonValue::String(String::new())),
        Some("execute_result") | Some("display_data") => {
            let data = output
                .get("data")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            match data.get("text/plain") {
                Some(text) => text.clone(),
                None => data,
            }
        }
        Some("error") => serde_json::json!({
            "type": "error",
            "traceback": output
                .get("traceback")
                .cloned()
                .unwrap_or_else(|| JsonValue::Array(Vec::new())),
        }),
        _ => output.clone(),
    }
}
