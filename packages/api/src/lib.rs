// ABOUTME: HTTP API layer for Crucible providing REST endpoints and routing
// ABOUTME: Wires sandbox, environment, and execution handlers into one router

use axum::{
    routing::{delete, get, post},
    Json, Router,
};

pub mod envs_handlers;
pub mod execute_handlers;
pub mod response;
pub mod sandboxes_handlers;
pub mod state;

pub use state::AppState;

/// Creates the containers API router
pub fn create_containers_router() -> Router<AppState> {
    Router::new()
        .route("/containers", get(sandboxes_handlers::list_sandboxes))
        .route("/containers", post(sandboxes_handlers::create_sandbox))
        .route("/containers/{id}", get(sandboxes_handlers::get_sandbox))
        .route("/containers/{id}", delete(sandboxes_handlers::delete_sandbox))
        .route("/containers/{id}/envs", post(envs_handlers::create_env))
        .route("/containers/{id}/envs", get(envs_handlers::list_envs))
        .route(
            "/containers/{id}/envs/{env_id}",
            delete(envs_handlers::delete_env),
        )
        .route(
            "/containers/{id}/envs/{env_id}/execute",
            post(execute_handlers::execute_cell),
        )
        .route(
            "/containers/{id}/envs/{env_id}/restart",
            post(execute_handlers::restart_env),
        )
        .route(
            "/containers/{id}/envs/{env_id}/interrupt",
            post(execute_handlers::interrupt_env),
        )
}

/// Health check endpoint returning service status
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Assemble the full application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(create_containers_router())
        .route("/health", get(health))
        .with_state(state)
}
