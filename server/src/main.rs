//! Federated X-Ray Diagnosis Server
//!
//! HTTP API that loads the centralized and hospital checkpoints once and
//! runs all of them on each uploaded chest X-ray.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use xray_fed::utils::logging::{init_logging, LogConfig, LogLevel};
use xray_fed::AppConfig;

use crate::state::{AppState, ServerConfig};

/// Federated X-Ray Diagnosis Server
#[derive(Parser, Debug)]
#[command(name = "xray-fed-server")]
#[command(version)]
#[command(about = "HTTP API comparing centralized and per-hospital X-ray classifiers")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8501")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory holding central_model.pth and client_<n>_model.pth
    #[arg(long, env = "XRAY_FED_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// JSON configuration file (models directory, slots, log level)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Largest accepted upload, in megabytes
    #[arg(long, default_value = "20")]
    max_upload_mb: usize,
}

/// Upload cap in bytes; oversized megabyte counts saturate
fn upload_limit_bytes(megabytes: usize) -> usize {
    megabytes.saturating_mul(1024 * 1024)
}

/// Merge the optional config file with the command line flags
fn load_config(cli: &Cli) -> anyhow::Result<(ServerConfig, LogLevel)> {
    let app_config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => AppConfig::default(),
    };

    let mut registry = app_config.registry.clone();
    if let Some(models_dir) = &cli.models_dir {
        registry.models_dir = models_dir.clone();
    }

    let config = ServerConfig {
        registry,
        max_upload_bytes: upload_limit_bytes(cli.max_upload_mb),
    };

    Ok((config, app_config.log_level()))
}

fn build_router(state: state::SharedState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/models", get(routes::models::list_models))
        .route("/predict", post(routes::predict::predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, log_level) = load_config(&cli)?;

    init_logging(&LogConfig::production().with_level(log_level)).map_err(anyhow::Error::msg)?;

    info!("Federated X-Ray Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Models dir: {:?}", config.registry.models_dir);
    info!("  Slots:      {}", config.registry.slots.len());
    info!("  Backend:    {}", xray_fed::backend::backend_name());
    info!("  Max upload: {} MB", cli.max_upload_mb);

    // Checkpoints are read synchronously before the server accepts requests
    let state = tokio::task::spawn_blocking(move || AppState::load(config)).await?;
    if state.models_loaded() == 0 {
        warn!(
            "No models loaded from {:?}. /predict will answer 503 until checkpoints are added and the server restarted",
            state.config.registry.models_dir
        );
    }

    let app = build_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
