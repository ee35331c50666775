// Algae cell counting API server

use algae_core::AlgaeConfig;
use algae_eye::{DetectorAdapter, ModelManager};
use algae_server::{create_router, AppState, PredictionPipeline};
use algae_storage::{spawn_periodic_flush, FlushGuard, ResultStore};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "algae-server", version, about = "Counts algae cells in microscope images")]
struct Args {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long, env = "ALGAE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding the latest result and history files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// ONNX model file
    #[arg(long)]
    model: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("Starting algae-server v{}", env!("CARGO_PKG_VERSION"));

    let adapter = load_adapter(&config);

    let store = Arc::new(ResultStore::load(&config.storage).context("failed to open data directory")?);
    let _flush_guard = FlushGuard::new(store.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = spawn_periodic_flush(
        store.clone(),
        Duration::from_secs(config.storage.flush_interval_secs),
        shutdown_rx,
    );

    let pipeline = Arc::new(PredictionPipeline::from_config(adapter, store, &config));
    let app = create_router(AppState::new(pipeline), &config.server);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = flusher.await {
        warn!("Flush task ended abnormally: {}", e);
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<AlgaeConfig> {
    let mut config = match &args.config {
        Some(path) => AlgaeConfig::from_file(path).with_context(|| format!("failed to load config {:?}", path))?,
        None => AlgaeConfig::default(),
    };
    config.apply_env();

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(model) = &args.model {
        config.detector.model_path = model.clone();
    }

    config.validate()?;
    Ok(config)
}

/// A missing or broken model is not fatal; `/predict` reports it per request.
fn load_adapter(config: &AlgaeConfig) -> Option<Arc<DetectorAdapter>> {
    let manager = ModelManager::new(Arc::new(config.detector.clone()));
    match manager.load_detector() {
        Ok(detector) => {
            let adapter = DetectorAdapter::from_config(detector, &config.detector);
            info!("Detection model ready ({})", adapter.detector_name());
            Some(Arc::new(adapter))
        }
        Err(e) => {
            error!("Failed to load detection model: {}. Serving without a model.", e);
            None
        }
    }
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
