//! Database error types
//!
//! This module defines the errors raised by the PostgreSQL layer and their
//! translation into the `PortError` values the billing domain understands.

use std::time::Duration;

use core_kernel::PortError;
use thiserror::Error;

/// Errors that can occur during database operations
///
/// This enum captures connection issues, query failures, constraint
/// violations and rows that cannot be decoded into domain values.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Entity not found in database
    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Serialization failure or deadlock; the transaction may be retried
    #[error("Concurrent update conflict: {0}")]
    SerializationConflict(String),

    /// Migration error
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded into its domain type
    #[error("Decode error in column {column}: {message}")]
    Decode { column: String, message: String },

    /// Pool exhaustion - no available connections
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Generic SQL error
    #[error("SQL error: {0}")]
    SqlError(sqlx::Error),
}

impl DatabaseError {
    /// Creates a not found error for a specific entity type and identifier
    ///
    /// # Arguments
    ///
    /// * `entity` - The type of entity (e.g., "Booking", "Invoice")
    /// * `id` - The identifier that was not found
    ///
    /// # Example
    ///
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("Booking", "9b1f");
    /// assert!(error.to_string().contains("Booking"));
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// Creates a duplicate entry error
    ///
    /// # Arguments
    ///
    /// * `entity` - The type of entity
    /// * `field` - The field that caused the duplicate
    /// * `value` - The duplicate value
    pub fn duplicate(entity: &str, field: &str, value: impl std::fmt::Display) -> Self {
        DatabaseError::DuplicateEntry(format!("{} with {} '{}' already exists", entity, field, value))
    }

    pub fn decode(column: &str, message: impl std::fmt::Display) -> Self {
        DatabaseError::Decode {
            column: column.to_string(),
            message: message.to_string(),
        }
    }

    /// Checks if this error indicates a record was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    /// Checks if this error is a constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry(_)
                | DatabaseError::ForeignKeyViolation(_)
                | DatabaseError::ConstraintViolation(_)
        )
    }

    /// Checks if this error is a connection-related issue
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted)
    }
}

/// Maps SQLx errors to specific variants by PostgreSQL error code
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>
impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DatabaseError::not_found("Record", "unknown"),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::Tls(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::PoolClosed => DatabaseError::ConnectionFailed("pool closed".to_string()),
            sqlx::Error::ColumnDecode { index, source } => DatabaseError::decode(&index, source),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry(message),
                    Some("23503") => DatabaseError::ForeignKeyViolation(message),
                    Some("23514") => DatabaseError::ConstraintViolation(message),
                    Some("40001") | Some("40P01") => DatabaseError::SerializationConflict(message),
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            other => DatabaseError::SqlError(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(error.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        DatabaseError::decode("jsonb", error)
    }
}

/// Translates database errors into port errors
///
/// - `NotFound` -> `PortError::NotFound`
/// - duplicates and serialization conflicts -> `PortError::Conflict`
/// - pool exhaustion -> `PortError::Timeout`
/// - connection failures -> `PortError::Connection`
/// - everything else -> `PortError::Internal`
impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound { entity, id } => PortError::not_found(entity, id),
            DatabaseError::DuplicateEntry(msg) | DatabaseError::SerializationConflict(msg) => {
                PortError::conflict(msg)
            }
            DatabaseError::PoolExhausted => PortError::timeout("acquire connection", Duration::ZERO),
            DatabaseError::ConnectionFailed(msg) => PortError::connection(msg),
            other => PortError::internal(other.to_string()),
        }
    }
}
