//! Worker error types

use domain_billing::BillingError;
use infra_db::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl WorkerError {
    pub fn config(message: impl Into<String>) -> Self {
        WorkerError::Config(message.into())
    }
}

impl From<config::ConfigError> for WorkerError {
    fn from(err: config::ConfigError) -> Self {
        WorkerError::Config(err.to_string())
    }
}
