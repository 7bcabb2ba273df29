//! smsgate SMS webhook ingestion service.
//!
//! Main entry point. Initializes logging, opens the audit database, makes
//! sure the schema exists, then serves provider callbacks until shutdown.

use anyhow::{Context, Result};
use smsgate_api::{AppState, Config};
use smsgate_core::{GateError, Storage};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log);

    info!("Starting smsgate webhook ingestion service");
    info!(
        database_path = %config.database_path.display(),
        webhook_url = %config.webhook_url,
        auth_token = %config.auth_token_masked(),
        max_connections = config.database_max_connections,
        "Configuration loaded"
    );

    let storage = Storage::connect(&config.to_storage_config())
        .await
        .context("Failed to open audit database")?;

    storage
        .initialize_schema()
        .await
        .map_err(GateError::SchemaInitialization)
        .context("Failed to initialize audit schema")?;
    info!("Audit schema initialized");

    let addr = config.parse_server_addr()?;
    let state = AppState::from_config(&config, storage.clone())
        .context("Failed to build identity deriver")?;

    info!(addr = %addr, "smsgate is ready to receive callbacks");

    if let Err(e) = smsgate_api::start_server(state, addr, config.request_timeout()).await {
        error!(error = %e, "Server failed");
        storage.close().await;
        return Err(e).context("HTTP server failed");
    }

    storage.close().await;
    info!("smsgate shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` from the process environment.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
