//! # till-server
//!
//! Process entry point: loads configuration, opens the ledger, starts the
//! hub and the closing scheduler, and waits for a shutdown signal.
//!
//! ## Startup Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default info)                                   │
//! │  2. TillConfig::load  (till.toml + TILL_* env overrides)               │
//! │  3. Database::new     (migrations, business timezone)                  │
//! │  4. SyncHub actor  ──► HubServer (GET /ws, GET /health)                │
//! │  5. ClosingScheduler (when closing.enabled)                            │
//! │  6. wait for Ctrl+C / SIGTERM, then stop in reverse order              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use till_core::BusinessDay;
use till_db::{Database, DbConfig};
use till_sync::{
    ClosingEngine, ClosingScheduler, HubServer, RegisterTotalsAggregator, SchedulerOptions, SyncHub, TillConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting till ledger server...");

    // Optional config path as the only argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TillConfig::load(config_path).context("Failed to load configuration")?;
    let timezone = config.timezone()?;
    info!(
        database = %config.ledger.database_path,
        %timezone,
        port = config.hub.port,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(&config.ledger.database_path).timezone(timezone))
        .await
        .context("Failed to open ledger database")?;
    info!(
        business_day = %BusinessDay::containing(Utc::now(), timezone).date,
        "Ledger database ready"
    );

    // Real-time hub
    let hub = SyncHub::new(Arc::new(db.clone()), timezone).start();
    let server = HubServer::new(config.hub.clone(), hub.clone())
        .start()
        .await
        .context("Failed to start hub server")?;
    info!(addr = %server.local_addr(), "Hub server listening");

    // Automatic closings
    let scheduler = if config.closing.enabled {
        let aggregator = RegisterTotalsAggregator::new(db.clone(), config.cash_method());
        let engine = ClosingEngine::new(db.clone(), aggregator);
        let options = SchedulerOptions::from_config(&config)?;
        Some(ClosingScheduler::new(Arc::new(engine), options).start())
    } else {
        info!("Automatic closing disabled");
        None
    };

    shutdown_signal().await;

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            warn!(?e, "Scheduler did not stop cleanly");
        }
    }
    if let Err(e) = server.shutdown().await {
        warn!(?e, "Hub server did not stop cleanly");
    }
    if let Err(e) = hub.shutdown().await {
        warn!(?e, "Hub did not stop cleanly");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
