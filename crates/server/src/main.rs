use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shrinkwrap_core::{
    config_path, load_config, validate_config, ArtifactStore, CleanupSweeper, FsArtifactStore,
    JobStore, Lifecycle, SqliteJobStore, TransformEngine, TransformerRegistry,
};
use shrinkwrap_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = config_path();
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.storage.database_path);
    info!("Artifact directory: {:?}", config.storage.artifact_dir);

    // Compute config hash, reported by /health
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = config_hash[..16].to_string();
    info!("Config hash: {}", config_hash_short);

    // Create stores
    let jobs: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.storage.database_path)
            .context("Failed to create job store")?,
    );
    info!("Job store initialized");

    let artifacts: Arc<dyn ArtifactStore> = Arc::new(
        FsArtifactStore::new(&config.storage.artifact_dir)
            .context("Failed to create artifact store")?,
    );
    info!("Artifact store initialized");

    let lifecycle = Arc::new(Lifecycle::new(jobs, artifacts, config.engine.retention()));

    // Create transformers
    let registry = TransformerRegistry::with_defaults(&config.tools);
    let unavailable = registry.validate_all().await;
    if !unavailable.is_empty() {
        warn!(
            "Some transformers are unavailable, their jobs will fail: {:?}",
            unavailable
        );
    }

    // Create and start the engine
    let engine = Arc::new(TransformEngine::new(
        config.engine.clone(),
        config.limits.clone(),
        registry,
        Arc::clone(&lifecycle),
        config.storage.work_dir.clone(),
    ));
    engine.start().await;

    let interrupted = engine
        .recover()
        .await
        .context("Failed to recover jobs from a previous run")?;
    if interrupted > 0 {
        warn!("Marked {} interrupted jobs as failed", interrupted);
    }
    info!("Transform engine started");

    // Start the cleanup sweeper
    let sweeper =
        CleanupSweeper::new(Arc::clone(&lifecycle), config.engine.sweep_interval()).spawn();
    info!(
        "Cleanup sweeper started (every {}s)",
        config.engine.sweep_interval_secs
    );

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&engine),
        config_hash_short,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    sweeper.stop().await;
    info!("Cleanup sweeper stopped");
    engine.stop().await;
    info!("Transform engine stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
}
