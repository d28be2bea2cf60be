// ABOUTME: End-to-end kernel tests against the real Python driver
// ABOUTME: Verifies statefulness, error recovery, and restart semantics

use std::path::PathBuf;

use crucible_sandboxes::{ExecuteRequest, KernelLauncher, KernelSession};
use serde_json::json;

fn python_launcher() -> KernelLauncher {
    let script = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("driver/kernel_driver.py");
    KernelLauncher::with_command("python3", script)
}

fn python_session(dir: &tempfile::TempDir) -> KernelSession {
    KernelSession::new("sbx", "env", dir.path().join("work"), python_launcher())
}

#[tokio::test]
#[ignore] // Requires python3
async fn test_state_persists_across_cells() {
    let dir = tempfile::tempdir().unwrap();
    let session = python_session(&dir);

    session.execute(ExecuteRequest::code("x = 10")).await.unwrap();
    let outcome = session.execute(ExecuteRequest::code("x * 2")).await.unwrap();

    assert_eq!(outcome.output, json!("20"));

    session.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires python3
async fn test_stdout_is_captured_as_stream_output() {
    let dir = tempfile::tempdir().unwrap();
    let session = python_session(&dir);

    let outcome = session
        .execute(ExecuteRequest::code("print('hello')"))
        .await
        .unwrap();

    assert_eq!(outcome.output, json!("hello\n"));

    session.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires python3
async fn test_code_error_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let session = python_session(&dir);

    session.execute(ExecuteRequest::code("x = 5")).await.unwrap();

    // A code-level error comes back as a structured output, not an Err
    let outcome = session.execute(ExecuteRequest::code("1 / 0")).await.unwrap();
    assert_eq!(outcome.output["type"], json!("error"));
    assert!(outcome.output["traceback"]
        .as_array()
        .unwrap()
        .iter()
        .any(|line| line.as_str().unwrap().contains("ZeroDivisionError")));

    // The session kept its state
    let outcome = session.execute(ExecuteRequest::code("x")).await.unwrap();
    assert_eq!(outcome.output, json!("5"));

    session.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires python3
async fn test_restart_clears_variables() {
    let dir = tempfile::tempdir().unwrap();
    let session = python_session(&dir);

    session.execute(ExecuteRequest::code("y = 1")).await.unwrap();
    session.restart().await.unwrap();

    let outcome = session.execute(ExecuteRequest::code("y")).await.unwrap();
    assert_eq!(outcome.output["type"], json!("error"));
    assert!(outcome.output["traceback"]
        .as_array()
        .unwrap()
        .iter()
        .any(|line| line.as_str().unwrap().contains("NameError")));

    session.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires python3
async fn test_crash_loses_state_but_keeps_environment_usable() {
    let dir = tempfile::tempdir().unwrap();
    let session = python_session(&dir);

    session.execute(ExecuteRequest::code("z = 42")).await.unwrap();

    // Kill the interpreter from inside; the call must surface the crash
    let err = session
        .execute(ExecuteRequest::code("import os; os._exit(1)"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crucible_sandboxes::SandboxError::KernelCrashed(_)
    ));

    // The restarted interpreter no longer knows z
    let outcome = session.execute(ExecuteRequest::code("z")).await.unwrap();
    assert_eq!(outcome.output["type"], json!("error"));

    session.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires python3
async fn test_expression_cell_returns_execute_result() {
    let dir = tempfile::tempdir().unwrap();
    let session = python_session(&dir);

    // Statements plus a trailing expression: stdout stream and the
    // expression value come back as an ordered list
    let outcome = session
        .execute(ExecuteRequest::code("print('side')\n2 + 3"))
        .await
        .unwrap();
    assert_eq!(outcome.output, json!(["side\n", "5"]));

    session.shutdown().await;
}
