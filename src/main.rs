//! Sintegre webhook relay service.
//!
//! Main entry point. Wires the processing engine to its production
//! collaborators (HTTP fetcher, S3 blob store, Airflow notifier, tokio
//! scheduler) and serves the API until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use relay_api::{start_server, AppState, Config};
use relay_core::InMemoryStore;
use relay_pipeline::{
    AirflowNotifier, HttpFileFetcher, ProcessingEngine, S3BlobStore, TokioScheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!("Starting Sintegre webhook relay");

    let addr = config.parse_server_addr()?;
    info!(
        server_addr = %addr,
        s3_bucket = %config.s3_bucket,
        temp_dir = %config.temp_dir,
        max_retry_attempts = config.max_retry_attempts,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(
        HttpFileFetcher::new(&config.temp_dir).context("Failed to prepare scratch directory")?,
    );
    let blob = Arc::new(S3BlobStore::from_env(&config.s3_bucket).await);
    let notifier = Arc::new(AirflowNotifier::new(config.to_notifier_config()));
    let scheduler = Arc::new(TokioScheduler::new());

    let engine = ProcessingEngine::new(
        store,
        fetcher,
        blob,
        notifier,
        scheduler,
        config.to_retry_policy(),
    );

    info!(addr = %addr, "Relay is ready to receive webhook notifications");

    if let Err(e) = start_server(AppState::new(engine), addr, config.request_timeout()).await {
        error!(error = %e, "Server failed");
        return Err(e).context("HTTP server terminated abnormally");
    }

    info!("Relay shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` in the environment wins; the configured
/// `rust_log` directive is the fallback.
fn init_tracing(configured: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Invalid log filter directive");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
