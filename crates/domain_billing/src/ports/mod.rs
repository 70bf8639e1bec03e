//! Billing Domain Ports
//!
//! Port interfaces through which the billing services reach their data. The
//! relational schema is not billing's concern: adapters implement these traits
//! against PostgreSQL (`infra_db`) or in memory ([`mock`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_billing::ports::BillingPorts;
//! use std::sync::Arc;
//!
//! let store = Arc::new(PostgresBillingStore::new(pool));
//! let ports = BillingPorts::from_store(store);
//! let ledger = LedgerService::new(ports.clone(), settings.clone());
//! ```
//!
//! Every call a service makes through a port is bounded by
//! `BillingSettings::operation_timeout`; ledger commits that hit a store
//! conflict are retried up to `BillingSettings::max_conflict_retries` times.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use core_kernel::{
    AccountId, BillItemId, BookingId, DomainPort, InvoiceId, Money, OutboxJobId, PaymentId, PeriodType,
    PortError, ServiceId, UserId,
};

use crate::account::{Account, UserRef};
use crate::bill::{BillItem, HotelService};
use crate::booking::{Booking, BookingPaymentStatus, BookingTotals, StatusTransition};
use crate::category::CategoryRevenue;
use crate::error::BillingError;
use crate::guest_access::GuestBillingAccess;
use crate::invoice::{HotelProfile, Invoice};
use crate::outbox::{OutboxJob, OutboxStatus};
use crate::payment::Payment;
use crate::revenue::{PaidBooking, ReversalOutcome, RevenuePeriodReport};
use crate::tax::TaxConfig;
use crate::transaction::{PostingBatch, Transaction};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Bookings as read and updated by billing
#[async_trait]
pub trait BookingPort: DomainPort {
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError>;

    /// Persists the recalculated totals; the only writer of these fields
    async fn update_booking_totals(&self, id: BookingId, totals: &BookingTotals) -> Result<(), PortError>;

    /// Applies `transition` only while the stored status equals
    /// `transition.expected`; a mismatch is `PortError::Conflict`
    async fn set_payment_status(&self, transition: &StatusTransition) -> Result<(), PortError>;

    /// Bookings whose check-out is before `now` and that are not yet settled or overdue
    async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, PortError>;

    /// Paid bookings with `paid_at` in `[from, to)`, joined with payments and bill items
    async fn paid_bookings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaidBooking>, PortError>;

    /// Unpaid remainder of unsettled bookings checking in within `[from, to)`
    async fn outstanding_balance(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money, PortError>;
}

/// Bill items and the service catalogue
#[async_trait]
pub trait BillItemPort: DomainPort {
    async fn list_bill_items(&self, booking_id: BookingId) -> Result<Vec<BillItem>, PortError>;
    async fn get_bill_item(&self, id: BillItemId) -> Result<BillItem, PortError>;
    async fn insert_bill_item(&self, item: &BillItem) -> Result<(), PortError>;
    async fn update_bill_item(&self, item: &BillItem) -> Result<(), PortError>;
    async fn delete_bill_item(&self, id: BillItemId) -> Result<(), PortError>;
    async fn get_service(&self, id: ServiceId) -> Result<HotelService, PortError>;
}

/// Hotel-level configuration
#[async_trait]
pub trait HotelConfigPort: DomainPort {
    async fn tax_config(&self) -> Result<TaxConfig, PortError>;
    async fn hotel_profile(&self) -> Result<HotelProfile, PortError>;
}

/// Application users, for account-owner resolution
#[async_trait]
pub trait UserPort: DomainPort {
    async fn get_user(&self, id: UserId) -> Result<UserRef, PortError>;
    /// Active users whose name matches exactly (case-insensitive)
    async fn find_users_by_name(&self, name: &str) -> Result<Vec<UserRef>, PortError>;
}

/// Rejection of a posting batch
#[derive(Debug, Error)]
pub enum LedgerCommitError {
    /// A debit would take an account below what its overdraft policy allows
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Money,
        requested: Money,
    },

    /// The booking's payment status no longer matches the batch's transition
    #[error("Booking {booking_id} is {actual}, expected {expected}")]
    StaleStatus {
        booking_id: BookingId,
        expected: BookingPaymentStatus,
        actual: BookingPaymentStatus,
    },

    #[error(transparent)]
    Port(#[from] PortError),
}

/// Accounts and their transactions
#[async_trait]
pub trait LedgerPort: DomainPort {
    /// Returns the active main account, creating it if absent. Must be an
    /// upsert so concurrent first calls converge on one account.
    async fn ensure_main_account(&self, candidate: &Account) -> Result<Account, PortError>;

    /// Returns the active personal account of `candidate.owner_user_id`,
    /// creating it if absent, with the same upsert guarantee
    async fn ensure_user_account(&self, candidate: &Account) -> Result<Account, PortError>;

    async fn find_user_account(&self, user_id: UserId) -> Result<Option<Account>, PortError>;
    async fn find_main_account(&self) -> Result<Option<Account>, PortError>;
    async fn get_account(&self, id: AccountId) -> Result<Account, PortError>;
    async fn create_account(&self, account: &Account) -> Result<(), PortError>;
    async fn list_accounts(&self, active_only: bool) -> Result<Vec<Account>, PortError>;

    /// Applies the batch's status transition and every posting, and enqueues
    /// every job, or nothing at all. Concurrent batches touching the same
    /// account or booking serialize; a transition whose expected status no
    /// longer holds fails with `LedgerCommitError::StaleStatus`.
    async fn commit_batch(&self, batch: PostingBatch) -> Result<Vec<Transaction>, LedgerCommitError>;

    /// Transactions of one account ordered by transaction date
    async fn account_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, PortError>;

    /// Transactions on `account_id` referring to `reference_id`
    async fn reference_transactions(
        &self,
        account_id: AccountId,
        reference_id: uuid::Uuid,
    ) -> Result<Vec<Transaction>, PortError>;
}

/// Period revenue reports
#[async_trait]
pub trait RevenueReportPort: DomainPort {
    /// Inserts or replaces the report keyed by `(date, period_type)`,
    /// keeping the stored id and creation time
    async fn upsert_report(&self, report: &RevenuePeriodReport) -> Result<RevenuePeriodReport, PortError>;

    async fn get_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<RevenuePeriodReport>, PortError>;

    /// Reports of one period type whose date lies in `[from, to]`, ascending
    async fn list_reports(
        &self,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RevenuePeriodReport>, PortError>;

    /// Applies [`RevenuePeriodReport::apply_reversal`] under the report's row
    /// lock. `None` when no report exists for the key.
    async fn reverse_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
        amounts: &CategoryRevenue,
    ) -> Result<Option<ReversalOutcome>, PortError>;
}

/// Durable revenue jobs
#[async_trait]
pub trait OutboxPort: DomainPort {
    async fn enqueue(&self, jobs: &[OutboxJob]) -> Result<(), PortError>;

    /// Claims up to `limit` due jobs, leasing them until `lease_until`
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxJob>, PortError>;

    /// Claims one job if it is still pending; `None` when someone else has it
    async fn claim_job(
        &self,
        id: OutboxJobId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<OutboxJob>, PortError>;

    async fn mark_done(&self, id: OutboxJobId, at: DateTime<Utc>) -> Result<(), PortError>;

    /// Records a failure and the next state of the job
    async fn record_failure(
        &self,
        id: OutboxJobId,
        status: OutboxStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), PortError>;

    async fn list_jobs(&self, status: OutboxStatus) -> Result<Vec<OutboxJob>, PortError>;
}

/// Invoices
#[async_trait]
pub trait InvoicePort: DomainPort {
    async fn find_invoice_by_booking(&self, booking_id: BookingId) -> Result<Option<Invoice>, PortError>;
    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError>;

    /// Highest sequence issued for `prefix-yyyymm-`, if any
    async fn max_invoice_sequence(&self, prefix: &str, year_month: &str) -> Result<Option<u32>, PortError>;

    /// Fails with `Conflict` when the number or the booking already has an invoice
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError>;

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), PortError>;
}

/// Guest payments
#[async_trait]
pub trait PaymentPort: DomainPort {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), PortError>;
    async fn update_payment(&self, payment: &Payment) -> Result<(), PortError>;
    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError>;
    /// Payments of a booking ordered by payment time
    async fn list_payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError>;
}

/// Guest billing tokens
#[async_trait]
pub trait GuestAccessPort: DomainPort {
    async fn insert_access(&self, access: &GuestBillingAccess) -> Result<(), PortError>;
    async fn find_access_by_token(&self, token: &str) -> Result<Option<GuestBillingAccess>, PortError>;
    /// Increments the view count and stamps the view time atomically
    async fn record_view(&self, token: &str, at: DateTime<Utc>) -> Result<GuestBillingAccess, PortError>;
    async fn deactivate_access(&self, token: &str) -> Result<(), PortError>;
}

/// The set of ports the billing services are built from
#[derive(Clone)]
pub struct BillingPorts {
    pub bookings: Arc<dyn BookingPort>,
    pub bill_items: Arc<dyn BillItemPort>,
    pub hotel: Arc<dyn HotelConfigPort>,
    pub users: Arc<dyn UserPort>,
    pub ledger: Arc<dyn LedgerPort>,
    pub reports: Arc<dyn RevenueReportPort>,
    pub outbox: Arc<dyn OutboxPort>,
    pub invoices: Arc<dyn InvoicePort>,
    pub payments: Arc<dyn PaymentPort>,
    pub guest_access: Arc<dyn GuestAccessPort>,
}

impl BillingPorts {
    /// Uses one adapter for every port
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: BookingPort
            + BillItemPort
            + HotelConfigPort
            + UserPort
            + LedgerPort
            + RevenueReportPort
            + OutboxPort
            + InvoicePort
            + PaymentPort
            + GuestAccessPort,
    {
        Self {
            bookings: store.clone(),
            bill_items: store.clone(),
            hotel: store.clone(),
            users: store.clone(),
            ledger: store.clone(),
            reports: store.clone(),
            outbox: store.clone(),
            invoices: store.clone(),
            payments: store.clone(),
            guest_access: store,
        }
    }
}

/// Runs one store round-trip under `limit`; expiry is `UpstreamUnavailable`
pub(crate) async fn bounded<T, E, F>(limit: Duration, operation: &str, call: F) -> Result<T, BillingError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BillingError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(BillingError::UpstreamUnavailable(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

/// Re-runs `attempt` while it fails with `Conflict`, at most `retries` more times
pub(crate) async fn retry_on_conflict<T, F, Fut>(retries: u32, operation: &str, mut attempt: F) -> Result<T, BillingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BillingError>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Err(BillingError::Conflict(message)) if tries < retries => {
                tries += 1;
                warn!(operation, attempt = tries, %message, "store conflict, retrying");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(tries))).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_maps_timeout_to_upstream_unavailable() {
        let result: Result<(), BillingError> = bounded(Duration::from_millis(5), "slow", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<(), PortError>(())
        })
        .await;
        assert!(matches!(result, Err(BillingError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up_after_limit() {
        let mut calls = 0;
        let result: Result<(), BillingError> = retry_on_conflict(2, "commit", || {
            calls += 1;
            async { Err(BillingError::Conflict("busy".into())) }
        })
        .await;
        assert!(matches!(result, Err(BillingError::Conflict(_))));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_returns_first_success() {
        let mut calls = 0;
        let result = retry_on_conflict(3, "commit", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 2 {
                    Err(BillingError::Conflict("busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
