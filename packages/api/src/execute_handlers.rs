// ABOUTME: HTTP request handlers for code execution against environment kernels
// ABOUTME: Execute, restart, and interrupt operations on stateful interpreters

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use crucible_sandboxes::ExecuteRequest;

use super::response::ApiResult;
use super::state::AppState;

#[derive(Deserialize)]
pub struct ExecuteCellRequest {
    pub code: String,
    /// Time budget in seconds; the engine default applies when absent
    pub timeout: Option<u64>,
    /// Overwrite this cell in place instead of appending
    pub cell_index: Option<usize>,
    /// Recreate the interpreter before running, discarding its state
    #[serde(default)]
    pub reset: bool,
}

#[derive(Serialize)]
pub struct ExecuteCellResponse {
    pub env_id: String,
    pub cell_index: usize,
    pub output: JsonValue,
}

#[derive(Serialize)]
pub struct EnvActionResponse {
    pub env_id: String,
    pub status: &'static str,
}

/// Execute a cell against an environment's interpreter
///
/// POST /containers/:id/envs/:env_id/execute
pub async fn execute_cell(
    State(state): State<AppState>,
    Path((container_id, env_id)): Path<(String, String)>,
    Json(body): Json<ExecuteCellRequest>,
) -> ApiResult<Json<ExecuteCellResponse>> {
    info!("Executing code in env {} (sandbox {})", env_id, container_id);

    let request = ExecuteRequest {
        code: body.code,
        cell_index: body.cell_index,
        timeout: body.timeout,
        reset: body.reset,
    };

    let outcome = state
        .control
        .engine
        .execute(&container_id, &env_id, request)
        .await?;

    Ok(Json(ExecuteCellResponse {
        env_id,
        cell_index: outcome.cell_index,
        output: outcome.output,
    }))
}

/// Restart an environment's interpreter, discarding all variable state
///
/// POST /containers/:id/envs/:env_id/restart
pub async fn restart_env(
    State(state): State<AppState>,
    Path((container_id, env_id)): Path<(String, String)>,
) -> ApiResult<Json<EnvActionResponse>> {
    info!("Restarting env {} in sandbox {}", env_id, container_id);

    state.control.engine.restart(&container_id, &env_id).await?;

    Ok(Json(EnvActionResponse {
        env_id,
        status: "restarted",
    }))
}

/// Interrupt the currently executing cell without destroying state
///
/// POST /containers/:id/envs/:env_id/interrupt
pub async fn interrupt_env(
    State(state): State<AppState>,
    Path((container_id, env_id)): Path<(String, String)>,
) -> ApiResult<Json<EnvActionResponse>> {
    info!("Interrupting env {} in sandbox {}", env_id, container_id);

    state
        .control
        .engine
        .interrupt(&container_id, &env_id)
        .await?;

    Ok(Json(EnvActionResponse {
        env_id,
        status: "interrupted",
    }))
}
