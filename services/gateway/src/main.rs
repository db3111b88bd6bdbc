use anyhow::{Context, Result};
use cinemage_gateway::api::start_api_server;
use cinemage_gateway::{
    AppState, Config, IngestionHandler, ListingOrchestrator, PgRecordStore, S3ObjectStore,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, config.service.json_logs);

    info!(
        service = %config.service.name,
        "Starting Cinemage Gateway"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Long-lived clients, shared by every request
    let record_store = PgRecordStore::new(&config.database, config.retry.clone())
        .await
        .context("Failed to initialize record store")?;

    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3, config.retry.clone())
            .await
            .context("Failed to initialize S3 object store")?,
    );
    info!(bucket = %object_store.bucket(), "Object store ready");

    let listing = ListingOrchestrator::new(
        object_store.clone(),
        config.listing.clone(),
        config.presigned_url_expiry(),
    );

    let ingest = IngestionHandler::new(object_store.clone(), config.ingest.clone())
        .context("Failed to initialize ingestion handler")?;

    let state = AppState {
        listing: Arc::new(listing),
        ingest: Arc::new(ingest),
        objects: object_store,
        records: Arc::new(record_store),
    };

    start_api_server(
        state,
        &config.api,
        config.ingest.max_body_bytes,
        shutdown_signal(),
    )
    .await?;

    info!("Gateway stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
