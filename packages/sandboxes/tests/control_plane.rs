// ABOUTME: Integration tests for the control plane facade and its cascades
// ABOUTME: Uses the stub runtime and a stub driver; no Docker or Python needed

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crucible_sandboxes::test_utils::StubRuntime;
use crucible_sandboxes::{
    ControlPlane, ControlPlaneOptions, ExecuteRequest, KernelLauncher, SandboxError,
};

fn stub_driver(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("stub_driver.sh");
    let mut file = std::fs::File::create(&path).expect("create stub driver");
    writeln!(
        file,
        r#"#!/bin/sh
printf '{{"type":"ready"}}\n'
while IFS= read -r line; do
  printf '{{"type":"result","outputs":[{{"output_type":"stream","name":"stdout","text":"ok"}}]}}\n'
done"#
    )
    .unwrap();
    path
}

async fn setup(dir: &tempfile::TempDir) -> (ControlPlane, Arc<StubRuntime>) {
    let pool = sqlx::SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create in-memory database");

    let runtime = Arc::new(StubRuntime::new());
    let options = ControlPlaneOptions {
        kernel_image: "crucible-node:latest".to_string(),
        data_dir: dir.path().join("data"),
        launcher: KernelLauncher::with_command("sh", stub_driver(dir)),
    };

    let control = ControlPlane::new(pool, runtime.clone(), options)
        .await
        .expect("Failed to build control plane");

    (control, runtime)
}

#[tokio::test]
async fn test_execute_against_unknown_environment_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (control, _runtime) = setup(&dir).await;

    let sandbox_id = control.sandboxes.create_sandbox().await.unwrap();

    let err = control
        .engine
        .execute(&sandbox_id, "ghost", ExecuteRequest::code("x = 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::NotFound(_)));

    let err = control
        .engine
        .execute("ghost-sandbox", "env", ExecuteRequest::code("x = 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::NotFound(_)));
}

#[tokio::test]
async fn test_execute_and_restart_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (control, _runtime) = setup(&dir).await;

    let sandbox_id = control.sandboxes.create_sandbox().await.unwrap();
    assert!(control
        .environments
        .create_environment(&sandbox_id, "env1")
        .await
        .unwrap());

    let outcome = control
        .engine
        .execute(&sandbox_id, "env1", ExecuteRequest::code("x = 1"))
        .await
        .unwrap();
    assert_eq!(outcome.cell_index, 0);

    control.engine.restart(&sandbox_id, "env1").await.unwrap();

    // The environment record survives the restart with an empty snapshot
    let env = control
        .environments
        .get_environment(&sandbox_id, "env1")
        .await
        .unwrap()
        .unwrap();
    assert!(env.variables.is_empty());

    control.shutdown().await;
}

#[tokio::test]
async fn test_interrupt_idle_environment_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (control, _runtime) = setup(&dir).await;

    let sandbox_id = control.sandboxes.create_sandbox().await.unwrap();
    control
        .environments
        .create_environment(&sandbox_id, "env1")
        .await
        .unwrap();

    // No session attached yet
    control.engine.interrupt(&sandbox_id, "env1").await.unwrap();

    let err = control
        .engine
        .interrupt(&sandbox_id, "ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_environment_tears_down_session() {
    let dir = tempfile::tempdir().unwrap();
    let (control, _runtime) = setup(&dir).await;

    let sandbox_id = control.sandboxes.create_sandbox().await.unwrap();
    control
        .environments
        .create_environment(&sandbox_id, "env1")
        .await
        .unwrap();

    control
        .engine
        .execute(&sandbox_id, "env1", ExecuteRequest::code("x = 1"))
        .await
        .unwrap();

    assert!(control.delete_environment(&sandbox_id, "env1").await.unwrap());
    assert!(!control.delete_environment(&sandbox_id, "env1").await.unwrap());

    // The environment is gone, so execution reports not-found
    let err = control
        .engine
        .execute(&sandbox_id, "env1", ExecuteRequest::code("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_sandbox_cascades_over_environments() {
    let dir = tempfile::tempdir().unwrap();
    let (control, runtime) = setup(&dir).await;

    let sandbox_id = control.sandboxes.create_sandbox().await.unwrap();
    control
        .environments
        .create_environment(&sandbox_id, "a")
        .await
        .unwrap();
    control
        .environments
        .create_environment(&sandbox_id, "b")
        .await
        .unwrap();

    control
        .engine
        .execute(&sandbox_id, "a", ExecuteRequest::code("x = 1"))
        .await
        .unwrap();

    assert!(control.delete_sandbox(&sandbox_id).await.unwrap());
    assert!(!control.delete_sandbox(&sandbox_id).await.unwrap());

    assert!(control
        .sandboxes
        .get_sandbox(&sandbox_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(runtime.removed_count(), 1);
}

#[tokio::test]
async fn test_environments_in_one_sandbox_execute_independently() {
    let dir = tempfile::tempdir().unwrap();
    let (control, _runtime) = setup(&dir).await;

    let sandbox_id = control.sandboxes.create_sandbox().await.unwrap();
    control
        .environments
        .create_environment(&sandbox_id, "a")
        .await
        .unwrap();
    control
        .environments
        .create_environment(&sandbox_id, "b")
        .await
        .unwrap();

    let control = Arc::new(control);
    let sid_a = sandbox_id.clone();
    let sid_b = sandbox_id.clone();

    let control_a = control.clone();
    let control_b = control.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            control_a
                .engine
                .execute(&sid_a, "a", ExecuteRequest::code("x = 1"))
                .await
        }),
        tokio::spawn(async move {
            control_b
                .engine
                .execute(&sid_b, "b", ExecuteRequest::code("x = 2"))
                .await
        }),
    );

    // Each environment got its own cell index 0: independent sessions
    assert_eq!(a.unwrap().unwrap().cell_index, 0);
    assert_eq!(b.unwrap().unwrap().cell_index, 0);

    control.shutdown().await;
}
