//! Infrastructure Database Layer
//!
//! This crate provides PostgreSQL persistence for the hotel billing domain
//! using SQLx: connection pooling, embedded migrations, one repository per
//! area of the schema and [`PostgresBillingStore`], which implements every
//! billing port.
//!
//! # Architecture
//!
//! The crate follows the repository pattern. Repositories own the SQL and the
//! row types; the adapter maps port calls onto them and translates errors.
//!
//! # Consistency
//!
//! - Ledger postings, balance updates and their outbox jobs commit in one
//!   database transaction with the touched accounts locked in id order
//! - Outbox jobs are claimed with `SKIP LOCKED` leases
//! - Report reversals run under a row lock
//! - Unique indexes enforce one active main account, one active account per
//!   user, one invoice per booking and unique invoice numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/hotel_billing")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresBillingStore::new(pool, Currency::INR);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::PostgresBillingStore;
pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
