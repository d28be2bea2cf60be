// ABOUTME: HTTP request handlers for environment management inside sandboxes
// ABOUTME: Create, list, and delete named execution environments

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::response::{not_found, ApiResult};
use super::state::AppState;

#[derive(Deserialize)]
pub struct CreateEnvRequest {
    pub env_id: String,
}

#[derive(Serialize)]
pub struct EnvStatusResponse {
    pub env_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListEnvsResponse {
    pub envs: Vec<String>,
}

#[derive(Serialize)]
pub struct DeleteEnvResponse {
    pub status: &'static str,
}

/// Create an environment inside a sandbox
///
/// POST /containers/:id/envs
pub async fn create_env(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Json(body): Json<CreateEnvRequest>,
) -> ApiResult<Json<EnvStatusResponse>> {
    info!("Creating env {} for sandbox {}", body.env_id, container_id);

    let created = state
        .control
        .environments
        .create_environment(&container_id, &body.env_id)
        .await?;
    if !created {
        warn!("Failed to create env. Sandbox not found: {}", container_id);
        return Err(not_found("Container not found"));
    }

    info!("Environment {} created successfully", body.env_id);
    Ok(Json(EnvStatusResponse {
        env_id: body.env_id,
        status: "created",
    }))
}

/// List environment IDs for a sandbox
///
/// GET /containers/:id/envs
pub async fn list_envs(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> ApiResult<Json<ListEnvsResponse>> {
    let envs = state
        .control
        .environments
        .list_environments(&container_id)
        .await?
        .ok_or_else(|| not_found("Container not found"))?;

    Ok(Json(ListEnvsResponse { envs }))
}

/// Delete an environment and tear down its kernel session
///
/// DELETE /containers/:id/envs/:env_id
pub async fn delete_env(
    State(state): State<AppState>,
    Path((container_id, env_id)): Path<(String, String)>,
) -> ApiResult<Json<DeleteEnvResponse>> {
    info!("Deleting env {} from sandbox {}", env_id, container_id);

    let deleted = state
        .control
        .delete_environment(&container_id, &env_id)
        .await?;
    if !deleted {
        warn!("Delete env failed. Environment not found: {}", env_id);
        return Err(not_found("Environment not found"));
    }

    Ok(Json(DeleteEnvResponse { status: "deleted" }))
}
