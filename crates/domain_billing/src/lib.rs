//! Billing Domain - Hotel Folio, Ledger and Revenue Reporting
//!
//! This crate turns a booking's stay and bill items into a taxed bill, records
//! guest payments, posts them to a small internal ledger and keeps per-period
//! revenue reports in step with the ledger.
//!
//! # Flow
//!
//! - [`BillCalculator`] prices room nights and bill items and is the only
//!   writer of a booking's stored totals
//! - [`PaymentService`] records payments; on the transition into `Paid` it
//!   posts category revenue through [`LedgerService`] and enqueues report jobs
//!   in the same atomic batch
//! - [`RevenueJobRunner`] drains those jobs into [`RevenueAggregator`]
//! - [`InvoiceService`] issues one GST invoice per booking with numbers from
//!   [`InvoiceNumberGenerator`]
//! - [`GuestAccessService`] serves a read-only bill view behind an expiring token
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingPorts, BillingSettings, PaymentService, ProcessPaymentRequest, PaymentMethod};
//!
//! let ports = BillingPorts::from_store(store);
//! let payments = PaymentService::new(ports, BillingSettings::default());
//!
//! let request = ProcessPaymentRequest::new(amount, PaymentMethod::Upi).received_by("front-desk");
//! let payment = payments.process_payment(booking_id, request).await?;
//! ```

pub mod account;
pub mod bill;
pub mod booking;
pub mod category;
pub mod error;
pub mod guest_access;
pub mod invoice;
pub mod ledger;
pub mod outbox;
pub mod payment;
pub mod ports;
pub mod revenue;
pub mod settings;
pub mod tax;
pub mod transaction;

pub use account::{Account, AccountBalance, AccountType, StaffRef, UserRef};
pub use bill::{BillCalculation, BillCalculator, BillItem, BillItemUpdate, HotelService, ItemTax, NewBillItem};
pub use booking::{Booking, BookingPaymentStatus, BookingSource, BookingTotals, StatusTransition};
pub use category::{CategoryRevenue, RevenueCategory, ServiceCategory};
pub use error::BillingError;
pub use guest_access::{GuestAccessService, GuestBillingAccess, GuestBillingSnapshot};
pub use invoice::{
    GstSplit, HotelProfile, Invoice, InvoiceItem, InvoiceNumber, InvoiceNumberGenerator, InvoiceService,
    InvoiceStatus,
};
pub use ledger::{AccountStatement, LedgerService, Reconciliation, StaffCredit};
pub use outbox::{OutboxJob, OutboxJobKind, OutboxStatus, RevenueJobRunner, RunSummary};
pub use payment::{
    Payment, PaymentMethod, PaymentMethodTotals, PaymentService, PaymentStatus, ProcessPaymentRequest,
    StatusChange,
};
pub use ports::{BillingPorts, LedgerCommitError};
#[cfg(any(test, feature = "mock"))]
pub use ports::mock::InMemoryBillingStore;
pub use revenue::{
    PaidBooking, PeriodAggregate, RevenueAggregator, RevenuePeriodReport, RevenueReportData, RevenueTrends,
};
pub use settings::BillingSettings;
pub use tax::{OtherTax, TaxBreakdown, TaxCalculator, TaxConfig, TaxLine};
pub use transaction::{
    OverdraftPolicy, Posting, PostingBatch, ReferenceType, Transaction, TransactionCategory, TransactionType,
};
