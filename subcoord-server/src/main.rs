//! Subscription Checkout Coordinator Server
//!
//! Takes subscription payments through an external processor, turns the
//! processor's answers into payment and subscription state, and streams
//! that state to live clients.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use subcoord_core::Coordinator;
use subcoord_core::framework::DatabaseProcessor;
use subcoord_core::gateway::build_gateway;
use subcoord_core::store::{MemoryStateStore, PgStateStore, StateStore};
use subcoord_core::utils::SystemClock;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

/// Subscription checkout coordinator
#[derive(Parser, Debug)]
#[command(name = "subcoord-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "SUBCOORD_CONFIG", default_value = "./subcoord-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "SUBCOORD_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.log_json);

    tracing::info!("Starting subcoord-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let gateway = build_gateway(&loaded_config.gateway);

    // Convert to shared config with separate stores for each section
    let shared_config = loaded_config.into_shared();

    // Pick the state store
    let (store, db_pool): (Arc<dyn StateStore>, _) = match get_database_url() {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            // Run migrations if requested
            if args.migrate {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("../migrations")
                    .run(&db_pool)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to run migrations: {}", e);
                        e
                    })?;
                tracing::info!("Migrations completed successfully");
            }

            let store = PgStateStore::new(DatabaseProcessor::new(db_pool.clone()));
            (Arc::new(store) as Arc<dyn StateStore>, Some(db_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; state is kept in memory and lost on exit");
            if args.migrate {
                tracing::warn!("--migrate ignored without a database");
            }
            (Arc::new(MemoryStateStore::new()) as Arc<dyn StateStore>, None)
        }
    };

    let (coordinator, background) = Coordinator::new(
        store,
        gateway,
        shared_config.clone(),
        Arc::new(SystemClock),
    );

    // Start background processors
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = background.spawn(shutdown_rx.clone());

    // Spawn config reload handler (listens for SIGHUP)
    spawn_config_reload_handler(shared_config, config_loader, shutdown_rx);

    // Build the router
    let router = build_router(AppState::new(coordinator));

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_signal()).await;

    // Stop processors and wait for them to finish
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task failed");
        }
    }

    // Close database connections gracefully
    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
