use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nagare::daemon::{self, DaemonConfig};

/// The isolated flow execution daemon.
///
/// Serves `/execute`, `/health` and `/shutdown` over HTTP. Generated flow
/// scripts arrive as request payloads, run in a scratch directory owned by
/// this process, and are deleted when their execution finishes.
#[derive(Parser, Debug)]
#[command(name = "nagare-executor", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "NAGARE_BIND", default_value = "0.0.0.0:4310")]
    bind: String,

    /// Directory for transient flow modules
    #[arg(long, env = "NAGARE_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Stable identifier reported in responses (auto-generated if not provided)
    #[arg(long, env = "NAGARE_EXECUTOR_ID")]
    executor_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nagare=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let defaults = DaemonConfig::default();
    let config = DaemonConfig {
        bind: cli.bind,
        scratch_dir: cli.scratch_dir.unwrap_or(defaults.scratch_dir),
        executor_id: cli.executor_id.unwrap_or(defaults.executor_id),
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Graceful shutdown on Ctrl-C or SIGTERM
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down executor...");
        cancel_clone.cancel();
    });

    info!(executor_id = %config.executor_id, "starting executor");
    daemon::run(config, cancel).await?;
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
