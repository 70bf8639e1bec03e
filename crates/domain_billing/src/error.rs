//! Billing domain errors

use thiserror::Error;

use core_kernel::{AccountId, MoneyError, PortError, TemporalError};

use crate::ports::LedgerCommitError;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Account, booking, bill item, invoice or user absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Debit, withdrawal or transfer exceeding what the account may give up
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: String,
        requested: String,
    },

    /// Invalid input, rejected before any state is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Concurrent modification contention that outlived the retries
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration or data store unreachable, or an operation timed out
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Guest token unknown, inactive or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid state transition attempted
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        BillingError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BillingError::NotFound { .. })
    }
}

impl From<PortError> for BillingError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound { entity_type, id } => BillingError::NotFound {
                entity: entity_type,
                id,
            },
            PortError::Validation { message, .. } => BillingError::Validation(message),
            PortError::Conflict { message } => BillingError::Conflict(message),
            PortError::Unauthorized { message } => BillingError::Unauthorized(message),
            e @ (PortError::Connection { .. }
            | PortError::Timeout { .. }
            | PortError::ServiceUnavailable { .. }) => BillingError::UpstreamUnavailable(e.to_string()),
            e @ PortError::Internal { .. } => BillingError::Internal(e.to_string()),
        }
    }
}

impl From<LedgerCommitError> for BillingError {
    fn from(err: LedgerCommitError) -> Self {
        match err {
            LedgerCommitError::InsufficientFunds {
                account_id,
                balance,
                requested,
            } => BillingError::InsufficientFunds {
                account_id,
                balance: balance.to_string(),
                requested: requested.to_string(),
            },
            e @ LedgerCommitError::StaleStatus { .. } => BillingError::Conflict(e.to_string()),
            LedgerCommitError::Port(e) => e.into(),
        }
    }
}

impl From<MoneyError> for BillingError {
    fn from(err: MoneyError) -> Self {
        BillingError::Validation(err.to_string())
    }
}

impl From<TemporalError> for BillingError {
    fn from(err: TemporalError) -> Self {
        BillingError::Validation(err.to_string())
    }
}
