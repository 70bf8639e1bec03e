//! Ports and Adapters Infrastructure
//!
//! Foundational types for the ports-and-adapters layout used by the billing
//! domain.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Billing services (domain)                    │
//! │  BillCalculator, LedgerService, RevenueAggregator, ...       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Port Traits                             │
//! │  BookingPort, LedgerPort, RevenueReportPort, InvoicePort...  │
//! └─────────────────────────────────────────────────────────────┘
//!                    ▲                         ▲
//!         ┌─────────┴─────────┐     ┌────────┴────────┐
//!         │ PostgreSQL adapter│     │ In-memory adapter│
//!         │    (infra_db)     │     │  (tests / mock)  │
//!         └───────────────────┘     └──────────────────┘
//! ```
//!
//! Every port returns [`PortError`]; services translate it into their own
//! error taxonomy.

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

/// Error type for port operations
#[derive(Debug, Error)]
pub enum PortError {
    /// The requested entity was not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// A validation error occurred
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The operation conflicts with concurrent or existing data
    /// (unique violation, serialization failure, deadlock)
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    /// Connection to the underlying store failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation timed out
    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// Authentication or authorization failed
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
    },

    /// The store is unavailable
    #[error("Service unavailable: {service}")]
    ServiceUnavailable {
        service: String,
    },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a Validation error with field information
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict {
            message: message.into(),
        }
    }

    /// Creates a Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a Timeout error
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        PortError::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error indicates a transient failure that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortError::Connection { .. }
                | PortError::Timeout { .. }
                | PortError::ServiceUnavailable { .. }
        )
    }

    /// Returns true if this error indicates the entity was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }

    /// Returns true for write contention that a fresh attempt may resolve
    pub fn is_conflict(&self) -> bool {
        matches!(self, PortError::Conflict { .. })
    }
}

/// Marker trait for all domain ports
///
/// All port traits extend this marker so they can be shared across tasks.
pub trait DomainPort: Send + Sync + 'static {}

/// Health status for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Health check result for an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Adapter identifier
    pub adapter_id: String,
    /// Current health status
    pub status: AdapterHealth,
    /// Latency of the health check in milliseconds
    pub latency_ms: u64,
    /// Optional message with additional details
    pub message: Option<String>,
    /// Timestamp of the health check
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == AdapterHealth::Healthy
    }
}

/// Trait for adapters that support health checks
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    /// Performs a health check on the adapter
    async fn health_check(&self) -> HealthCheckResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_error_not_found() {
        let error = PortError::not_found("Account", "123");
        assert!(error.is_not_found());
        assert!(!error.is_transient());
        assert!(error.to_string().contains("Account"));
        assert!(error.to_string().contains("123"));
    }

    #[test]
    fn test_port_error_transient() {
        let timeout = PortError::timeout("commit_batch", std::time::Duration::from_secs(10));
        assert!(timeout.is_transient());
        assert!(timeout.to_string().contains("10000ms"));

        let unavailable = PortError::ServiceUnavailable {
            service: "postgres".to_string(),
        };
        assert!(unavailable.is_transient());

        let validation = PortError::validation("negative amount");
        assert!(!validation.is_transient());
    }

    #[test]
    fn test_conflict_is_not_transient_but_retryable() {
        let conflict = PortError::conflict("serialization failure");
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
    }
}
