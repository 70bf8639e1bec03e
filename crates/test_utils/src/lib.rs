//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! hotel billing test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built test data for common entities
//! - `builders`: Builder patterns for bookings, bill items, payments and users
//! - `database`: PostgreSQL container management and a migrated billing store
//! - `assertions`: Custom assertion helpers for money and ledger state
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
