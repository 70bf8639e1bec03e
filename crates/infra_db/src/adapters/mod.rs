//! Domain Adapters
//!
//! This module provides adapter implementations for domain ports,
//! connecting domain interfaces to the PostgreSQL database layer.
//!
//! # Architecture
//!
//! The billing adapter:
//! - Implements every billing port trait
//! - Delegates to the repository that owns each table
//! - Translates database errors into port errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingStore;
//! use domain_billing::ports::BookingPort;
//!
//! let store = PostgresBillingStore::new(pool, Currency::INR);
//! let booking = store.get_booking(booking_id).await?;
//! ```

pub mod billing;

pub use billing::PostgresBillingStore;
