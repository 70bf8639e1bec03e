//! Core Kernel - Foundational types shared by the hotel billing crates
//!
//! This crate provides the building blocks used across the billing domain and
//! its adapters:
//! - Money with fixed-point decimal arithmetic and a single rounding rule
//! - Strongly-typed identifiers for bookings, accounts, invoices and more
//! - Reporting periods (daily/monthly/yearly) anchored in the hotel timezone
//! - The port error type and marker traits implemented by every adapter

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, MoneyError, Rate};
pub use temporal::{DateRange, PeriodType, TemporalError, Timezone};
pub use identifiers::{
    BookingId, BillItemId, ServiceId, RoomId, AccountId, TransactionId, UserId,
    PaymentId, InvoiceId, ReportId, GuestAccessId, OutboxJobId,
};
pub use ports::{PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth};
