//! Repository implementations for the billing tables
//!
//! Each repository owns the SQL for one area of the schema and exposes row
//! types that map one-to-one onto table columns. Conversions from rows into
//! domain values live next to the row types.
//!
//! # Conventions
//!
//! - Amounts are `NUMERIC` with a `currency` column on the same row
//! - Enumerations are stored as their `as_str` names and parsed back with `FromStr`
//! - Nested value objects (tax lists, invoice lines, report breakdowns) are `JSONB`
//! - Writes that must be atomic take a `&mut PgConnection` so callers can run
//!   them inside one transaction

use std::fmt::Display;
use std::str::FromStr;

use core_kernel::{Currency, Money};
use rust_decimal::Decimal;

use crate::error::DatabaseError;

pub mod bill_items;
pub mod bookings;
pub mod guest_access;
pub mod hotel;
pub mod invoices;
pub mod ledger;
pub mod outbox;
pub mod payments;
pub mod reports;

pub use bill_items::BillItemRepository;
pub use bookings::BookingRepository;
pub use guest_access::GuestAccessRepository;
pub use hotel::HotelRepository;
pub use invoices::InvoiceRepository;
pub use ledger::LedgerRepository;
pub use outbox::OutboxRepository;
pub use payments::PaymentRepository;
pub use reports::ReportRepository;

/// Parses a stored enumeration name
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, DatabaseError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse::<T>().map_err(|e| DatabaseError::decode(column, e))
}

pub(crate) fn parse_optional<T>(column: &str, value: Option<&str>) -> Result<Option<T>, DatabaseError>
where
    T: FromStr,
    T::Err: Display,
{
    value.map(|v| parse_column(column, v)).transpose()
}

pub(crate) fn currency(code: &str) -> Result<Currency, DatabaseError> {
    parse_column("currency", code.trim())
}

pub(crate) fn money(amount: Decimal, currency: Currency) -> Money {
    Money::new(amount, currency)
}

pub(crate) fn optional_money(amount: Option<Decimal>, currency: Currency) -> Option<Money> {
    amount.map(|a| Money::new(a, currency))
}

/// Counters are `INTEGER` columns that never go negative
pub(crate) fn counter(column: &str, value: i32) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|e| DatabaseError::decode(column, e))
}

pub(crate) fn to_i32(column: &str, value: u32) -> Result<i32, DatabaseError> {
    i32::try_from(value).map_err(|e| DatabaseError::decode(column, e))
}

/// Escapes `value` for use as a literal inside a `LIKE ... ESCAPE '\'` pattern
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
