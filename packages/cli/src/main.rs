// ABOUTME: Entry point for the Crucible control-plane server
// ABOUTME: Builds the control plane, starts the cleanup sweep, and serves HTTP

use axum::http::{HeaderValue, Method};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crucible_api::AppState;
use crucible_sandboxes::{
    ControlPlane, ControlPlaneOptions, DockerRuntime, KernelLauncher, SandboxRegistry,
};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    info!("Starting Crucible control plane...");

    let pool = SqlitePoolOptions::new()
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(true),
        )
        .await?;

    let runtime = Arc::new(DockerRuntime::connect().await?);
    let launcher = KernelLauncher::locate()?;

    let control = Arc::new(
        ControlPlane::new(
            pool,
            runtime,
            ControlPlaneOptions {
                kernel_image: config.kernel_image.clone(),
                data_dir: config.data_dir.clone(),
                launcher,
            },
        )
        .await?,
    );

    // Periodic sweep removing units whose record is gone
    SandboxRegistry::start_cleanup_task(control.sandboxes.clone());

    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = crucible_api::create_router(AppState::new(control.clone())).layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown: terminate every live interpreter before exit
    info!("Shutting down...");
    control.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
