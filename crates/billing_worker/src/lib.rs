//! Revenue Worker
//!
//! Background process that applies the revenue jobs payments leave in the
//! outbox and keeps overdue flags current.
//!
//! # Example
//!
//! ```rust,ignore
//! use billing_worker::{RevenueWorker, WorkerConfig};
//!
//! let config = WorkerConfig::from_env()?;
//! let worker = RevenueWorker::new(ports, config.billing_settings()?, config.worker_options());
//! worker.run(shutdown_rx).await;
//! ```

pub mod config;
pub mod error;
pub mod telemetry;
pub mod worker;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use worker::{PassReport, RevenueWorker, WorkerOptions};
