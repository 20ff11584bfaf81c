//! The isolated execution daemon.
//!
//! One process serves `/execute`, `/health` and `/shutdown`. Each request
//! materializes its program under the scratch directory, runs it as an
//! independent task, and cleans up unconditionally; concurrent requests
//! never share a file because paths are derived from execution ids.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::DaemonError;
use crate::providers::ProviderRegistry;

pub mod routes;
pub mod sandbox;

pub use routes::{ExecuteRequest, ExecuteResponse};

/// Runtime settings for one executor process.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind: String,
    pub scratch_dir: PathBuf,
    pub executor_id: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4310".to_string(),
            scratch_dir: std::env::temp_dir().join("nagare-scratch"),
            executor_id: default_executor_id(),
        }
    }
}

fn default_executor_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("executor-{}", &suffix[..8])
}

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: DaemonConfig,
    pub providers: ProviderRegistry,
    pub started: Instant,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: DaemonConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            providers: ProviderRegistry::with_builtins(),
            started: Instant::now(),
            shutdown,
        }
    }
}

/// Run the daemon until the cancellation token is triggered.
///
/// Orphaned scratch modules from a previous crash are swept before the
/// listener opens.
pub async fn run(config: DaemonConfig, shutdown: CancellationToken) -> Result<(), DaemonError> {
    sandbox::sweep_orphans(&config.scratch_dir).await?;

    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config, shutdown.clone()));
    let app = router(state);

    let listener = TcpListener::bind(&bind).await.map_err(|e| DaemonError::Bind {
        addr: bind.clone(),
        source: e,
    })?;
    info!(bind = %bind, "executor listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(DaemonError::Serve)?;

    info!("executor shut down");
    Ok(())
}

/// The daemon's route table, separated so tests can drive handlers
/// without a listener.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/execute", post(routes::execute))
        .route("/shutdown", post(routes::shutdown))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
