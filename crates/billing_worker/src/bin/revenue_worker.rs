//! Hotel Billing - Revenue Worker Binary
//!
//! Drains the revenue outbox into the period reports and flags overdue
//! bookings until interrupted.
//!
//! # Usage
//!
//! ```bash
//! WORKER_DATABASE_URL=postgres://... cargo run --bin revenue-worker
//! ```
//!
//! # Environment Variables
//!
//! * `WORKER_DATABASE_URL` - PostgreSQL connection string (falls back to `DATABASE_URL`)
//! * `WORKER_POLL_INTERVAL_MS` - Pause between passes (default: 2000)
//! * `WORKER_BATCH_SIZE` - Jobs claimed per pass (default: 50)
//! * `WORKER_REFRESH_OVERDUE` - Mark overdue bookings on every pass (default: true)
//! * `WORKER_CURRENCY` / `WORKER_TIMEZONE` - Hotel currency and timezone (default: INR, Asia/Kolkata)
//! * `WORKER_LOG_LEVEL` - Log level: trace, debug, info, warn, error (default: info)
//! * `WORKER_JSON_LOGS` - Emit JSON log lines (default: false)

use std::sync::Arc;

use anyhow::Context;
use billing_worker::telemetry::init_tracing;
use billing_worker::{RevenueWorker, WorkerConfig};
use domain_billing::BillingPorts;
use infra_db::{create_pool, run_migrations, PostgresBillingStore};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("loading worker configuration")?;
    init_tracing(&config.log_level, config.json_logs);

    let settings = config.billing_settings().context("building billing settings")?;
    tracing::info!(
        currency = %settings.currency,
        timezone = %settings.timezone,
        "Starting revenue worker"
    );

    let pool = create_pool(config.database_config())
        .await
        .context("connecting to the database")?;
    run_migrations(&pool).await.context("running migrations")?;

    let store = Arc::new(PostgresBillingStore::new(pool, settings.currency));
    let worker = RevenueWorker::new(BillingPorts::from_store(store), settings, config.worker_options());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    handle.await.context("worker task panicked")?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// The current pass finishes before the worker exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
