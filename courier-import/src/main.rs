//! courier-import - bulk order import service
//!
//! Takes a CSV of delivery orders, maps its columns, geocodes every row,
//! lets an operator fix failures, then creates the orders in one batch.

use anyhow::{Context, Result};
use clap::Parser;
use courier_common::config::{default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver};
use courier_common::events::EventBus;
use courier_import::config::{resolve_geocoder_api_key, DEFAULT_BIND_ADDRESS};
use courier_import::db::{MemorySessionStorage, SessionStorage, SqliteSessionStorage};
use courier_import::services::{
    BaatoClient, ControllerSettings, HttpOrderClient, ImportController, ResumeStore,
};
use courier_import::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Bulk order import service")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "COURIER_IMPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_path = args
        .config
        .clone()
        .or_else(|| default_config_path("courier-import"));
    let toml_config = toml_path
        .as_deref()
        .map(load_toml_config)
        .unwrap_or_default();

    // RUST_LOG wins over the TOML level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&toml_config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting courier-import");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = RootFolderResolver::new("courier-import")
        .with_cli_arg(args.root_folder)
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    // An unusable database degrades to process-local storage rather than aborting
    let (db_pool, storage) = match courier_import::db::init_database_pool(&db_path).await {
        Ok(pool) => {
            info!("Database connection established");
            let storage: Arc<dyn SessionStorage> = Arc::new(SqliteSessionStorage::new(pool.clone()));
            (pool, storage)
        }
        Err(e) => {
            warn!(error = %e, "Database unavailable; sessions will not survive a restart");
            let pool = courier_import::db::init_memory_pool()
                .await
                .context("Failed to open fallback in-memory database")?;
            let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
            (pool, storage)
        }
    };

    let api_key = resolve_geocoder_api_key(&db_pool, &toml_config).await?;
    let geocoder = Arc::new(
        BaatoClient::new(&toml_config.geocoder, api_key).context("Failed to build geocoder client")?,
    );
    let orders = Arc::new(
        HttpOrderClient::new(&toml_config.orders).context("Failed to build order service client")?,
    );

    let event_bus = EventBus::new(100);
    let controller = ImportController::new(
        geocoder.clone(),
        orders,
        ResumeStore::new(storage),
        event_bus.clone(),
        ControllerSettings::from(&toml_config),
    );

    if controller.resume().await {
        info!("Previous import session restored");
    }

    let mut state = AppState::new(db_pool, event_bus, controller.clone()).with_geocoder_client(geocoder);
    if let Some(path) = toml_path {
        state = state.with_toml_path(path);
    }
    let app = courier_import::build_router(state);

    let bind_address = toml_config
        .bind_address
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    controller.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
