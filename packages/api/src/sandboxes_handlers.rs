// ABOUTME: HTTP request handlers for sandbox lifecycle operations
// ABOUTME: Create, inspect, list, and delete Docker-backed sandboxes

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crucible_sandboxes::{SandboxRecord, SandboxStatus};

use super::response::{not_found, ApiResult};
use super::state::AppState;

#[derive(Serialize)]
pub struct CreateSandboxResponse {
    pub container_id: String,
}

#[derive(Serialize)]
pub struct SandboxStatusResponse {
    pub container_id: String,
    pub status: SandboxStatus,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
}

/// Create a new sandbox
///
/// POST /containers
pub async fn create_sandbox(
    State(state): State<AppState>,
) -> ApiResult<Json<CreateSandboxResponse>> {
    info!("Request received to create a new sandbox");

    let container_id = state.control.sandboxes.create_sandbox().await?;

    info!("Sandbox created with ID: {}", container_id);
    Ok(Json(CreateSandboxResponse { container_id }))
}

/// Get a sandbox's last-observed status
///
/// GET /containers/:id
pub async fn get_sandbox(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> ApiResult<Json<SandboxStatusResponse>> {
    let record = state
        .control
        .sandboxes
        .get_sandbox(&container_id)
        .await?
        .ok_or_else(|| not_found("Container not found"))?;

    Ok(Json(SandboxStatusResponse {
        container_id,
        status: record.status,
    }))
}

/// List all sandboxes with their records
///
/// GET /containers
pub async fn list_sandboxes(
    State(state): State<AppState>,
) -> ApiResult<Json<HashMap<String, SandboxRecord>>> {
    let sandboxes = state.control.sandboxes.list_sandboxes().await?;
    Ok(Json(sandboxes))
}

/// Delete a sandbox, its backing unit, and any attached kernel sessions
///
/// DELETE /containers/:id
pub async fn delete_sandbox(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    info!("Request received to delete sandbox: {}", container_id);

    let deleted = state.control.delete_sandbox(&container_id).await?;
    if !deleted {
        warn!("Delete failed. Sandbox not found: {}", container_id);
        return Err(not_found("Container not found"));
    }

    info!("Sandbox deleted successfully: {}", container_id);
    Ok(Json(DeleteResponse { status: "deleted" }))
}
