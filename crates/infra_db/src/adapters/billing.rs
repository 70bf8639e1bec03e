//! PostgreSQL Billing Store
//!
//! This module provides the internal (database) adapter for the billing
//! domain, implementing every billing port on top of the repositories.
//!
//! # Overview
//!
//! The `PostgresBillingStore` serves as the bridge between the domain's port
//! traits and the database layer. It:
//!
//! - Delegates each port call to the repository owning the table
//! - Translates `DatabaseError` into `PortError`
//! - Reports database reachability through `HealthCheckable`
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingStore};
//! use domain_billing::BillingPorts;
//! use std::sync::Arc;
//!
//! let pool = create_pool(DatabaseConfig::new(url)).await?;
//! run_migrations(&pool).await?;
//! let store = Arc::new(PostgresBillingStore::new(pool, Currency::INR));
//! let ports = BillingPorts::from_store(store);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    AccountId, AdapterHealth, BillItemId, BookingId, Currency, DomainPort, HealthCheckResult, HealthCheckable,
    InvoiceId, Money, OutboxJobId, PaymentId, PeriodType, PortError, ServiceId, UserId,
};
use domain_billing::ports::{
    BillItemPort, BookingPort, GuestAccessPort, HotelConfigPort, InvoicePort, LedgerPort, OutboxPort, PaymentPort,
    RevenueReportPort, UserPort,
};
use domain_billing::revenue::ReversalOutcome;
use domain_billing::{
    Account, BillItem, Booking, BookingTotals, CategoryRevenue, GuestBillingAccess,
    HotelProfile, HotelService, Invoice, LedgerCommitError, OutboxJob, OutboxStatus, PaidBooking, Payment,
    PostingBatch, RevenuePeriodReport, StatusTransition, TaxConfig, Transaction, UserRef,
};

use crate::repositories::{
    BillItemRepository, BookingRepository, GuestAccessRepository, HotelRepository, InvoiceRepository,
    LedgerRepository, OutboxRepository, PaymentRepository, ReportRepository,
};

const ADAPTER_ID: &str = "postgres-billing-store";

/// PostgreSQL-backed implementation of all billing ports
///
/// One instance is shared by every service through `BillingPorts::from_store`.
///
/// # Health Checking
///
/// `health_check` runs `SELECT 1` against the pool and reports its latency.
///
/// # Error Handling
///
/// Database errors are translated to `PortError` variants:
/// - `DatabaseError::NotFound` -> `PortError::NotFound`
/// - duplicates and serialization failures -> `PortError::Conflict`
/// - connection problems -> `PortError::Connection` or `PortError::Timeout`
/// - other errors -> `PortError::Internal`
#[derive(Debug, Clone)]
pub struct PostgresBillingStore {
    bookings: BookingRepository,
    bill_items: BillItemRepository,
    hotel: HotelRepository,
    ledger: LedgerRepository,
    reports: ReportRepository,
    outbox: OutboxRepository,
    invoices: InvoiceRepository,
    payments: PaymentRepository,
    guest_access: GuestAccessRepository,
    pool: PgPool,
    currency: Currency,
}

impl PostgresBillingStore {
    /// Creates a new store over the given pool
    ///
    /// # Arguments
    ///
    /// * `pool` - The PostgreSQL connection pool
    /// * `currency` - Currency of aggregate figures when there is nothing to sum
    pub fn new(pool: PgPool, currency: Currency) -> Self {
        Self {
            bookings: BookingRepository::new(pool.clone()),
            bill_items: BillItemRepository::new(pool.clone()),
            hotel: HotelRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            reports: ReportRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool.clone()),
            invoices: InvoiceRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            guest_access: GuestAccessRepository::new(pool.clone()),
            pool,
            currency,
        }
    }

    /// Booking repository, for seeding bookings created outside billing
    pub fn booking_repository(&self) -> &BookingRepository {
        &self.bookings
    }

    /// Settings and user repository, for maintaining tax settings and staff
    pub fn hotel_repository(&self) -> &HotelRepository {
        &self.hotel
    }

    /// Catalog repository, for maintaining hotel services
    pub fn bill_item_repository(&self) -> &BillItemRepository {
        &self.bill_items
    }
}

// Mark as a domain port
impl DomainPort for PostgresBillingStore {}

#[async_trait]
impl HealthCheckable for PostgresBillingStore {
    /// Checks database connectivity
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Healthy,
                latency_ms,
                message: None,
                checked_at: Utc::now(),
            },
            Err(e) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Unhealthy,
                latency_ms,
                message: Some(format!("Database error: {}", e)),
                checked_at: Utc::now(),
            },
        }
    }
}

#[async_trait]
impl BookingPort for PostgresBillingStore {
    #[instrument(skip(self), fields(booking_id = %id))]
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
        debug!("Fetching booking");
        Ok(self.bookings.get(id).await?)
    }

    #[instrument(skip(self, totals), fields(booking_id = %id))]
    async fn update_booking_totals(&self, id: BookingId, totals: &BookingTotals) -> Result<(), PortError> {
        debug!(total = %totals.total_amount, "Updating booking totals");
        Ok(self.bookings.update_totals(id, totals).await?)
    }

    #[instrument(skip(self, transition), fields(booking_id = %transition.booking_id, to = %transition.next))]
    async fn set_payment_status(&self, transition: &StatusTransition) -> Result<(), PortError> {
        Ok(self.bookings.set_payment_status(transition).await?)
    }

    #[instrument(skip(self))]
    async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, PortError> {
        Ok(self.bookings.overdue_candidates(now).await?)
    }

    #[instrument(skip(self))]
    async fn paid_bookings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaidBooking>, PortError> {
        let bookings = self.bookings.paid_between(from, to).await?;
        debug!(count = bookings.len(), "Loading payments and items of paid bookings");

        let mut paid = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let payments = self.payments.list_for_booking(booking.id).await?;
            let items = self.bill_items.list_for_booking(booking.id).await?;
            paid.push(PaidBooking {
                booking,
                payments,
                items,
            });
        }
        Ok(paid)
    }

    #[instrument(skip(self))]
    async fn outstanding_balance(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money, PortError> {
        Ok(self.bookings.outstanding_balance(from, to, self.currency).await?)
    }
}

#[async_trait]
impl BillItemPort for PostgresBillingStore {
    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn list_bill_items(&self, booking_id: BookingId) -> Result<Vec<BillItem>, PortError> {
        Ok(self.bill_items.list_for_booking(booking_id).await?)
    }

    #[instrument(skip(self), fields(item_id = %id))]
    async fn get_bill_item(&self, id: BillItemId) -> Result<BillItem, PortError> {
        Ok(self.bill_items.get(id).await?)
    }

    #[instrument(skip(self, item), fields(item_id = %item.id, booking_id = %item.booking_id))]
    async fn insert_bill_item(&self, item: &BillItem) -> Result<(), PortError> {
        debug!(name = %item.item_name, "Inserting bill item");
        Ok(self.bill_items.insert(item).await?)
    }

    #[instrument(skip(self, item), fields(item_id = %item.id))]
    async fn update_bill_item(&self, item: &BillItem) -> Result<(), PortError> {
        Ok(self.bill_items.update(item).await?)
    }

    #[instrument(skip(self), fields(item_id = %id))]
    async fn delete_bill_item(&self, id: BillItemId) -> Result<(), PortError> {
        Ok(self.bill_items.delete(id).await?)
    }

    #[instrument(skip(self), fields(service_id = %id))]
    async fn get_service(&self, id: ServiceId) -> Result<HotelService, PortError> {
        Ok(self.bill_items.get_service(id).await?)
    }
}

#[async_trait]
impl HotelConfigPort for PostgresBillingStore {
    async fn tax_config(&self) -> Result<TaxConfig, PortError> {
        Ok(self.hotel.tax_config().await?)
    }

    async fn hotel_profile(&self) -> Result<HotelProfile, PortError> {
        Ok(self.hotel.hotel_profile().await?)
    }
}

#[async_trait]
impl UserPort for PostgresBillingStore {
    #[instrument(skip(self), fields(user_id = %id))]
    async fn get_user(&self, id: UserId) -> Result<UserRef, PortError> {
        Ok(self.hotel.get_user(id).await?)
    }

    #[instrument(skip(self))]
    async fn find_users_by_name(&self, name: &str) -> Result<Vec<UserRef>, PortError> {
        Ok(self.hotel.find_users_by_name(name).await?)
    }
}

#[async_trait]
impl LedgerPort for PostgresBillingStore {
    #[instrument(skip(self, candidate))]
    async fn ensure_main_account(&self, candidate: &Account) -> Result<Account, PortError> {
        Ok(self.ledger.ensure_main_account(candidate).await?)
    }

    #[instrument(skip(self, candidate), fields(owner = ?candidate.owner_user_id))]
    async fn ensure_user_account(&self, candidate: &Account) -> Result<Account, PortError> {
        if candidate.owner_user_id.is_none() {
            return Err(PortError::validation_field(
                "personal account needs an owner",
                "owner_user_id",
            ));
        }
        Ok(self.ledger.ensure_user_account(candidate).await?)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_user_account(&self, user_id: UserId) -> Result<Option<Account>, PortError> {
        Ok(self.ledger.find_user_account(user_id).await?)
    }

    async fn find_main_account(&self) -> Result<Option<Account>, PortError> {
        Ok(self.ledger.find_main_account().await?)
    }

    #[instrument(skip(self), fields(account_id = %id))]
    async fn get_account(&self, id: AccountId) -> Result<Account, PortError> {
        Ok(self.ledger.get_account(id).await?)
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn create_account(&self, account: &Account) -> Result<(), PortError> {
        debug!(name = %account.name, account_type = %account.account_type, "Creating account");
        Ok(self.ledger.create_account(account).await?)
    }

    async fn list_accounts(&self, active_only: bool) -> Result<Vec<Account>, PortError> {
        Ok(self.ledger.list_accounts(active_only).await?)
    }

    #[instrument(skip(self, batch), fields(postings = batch.postings.len(), jobs = batch.jobs.len()))]
    async fn commit_batch(&self, batch: PostingBatch) -> Result<Vec<Transaction>, LedgerCommitError> {
        self.ledger.commit_batch(batch).await
    }

    #[instrument(skip(self), fields(account_id = %id))]
    async fn account_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, PortError> {
        Ok(self.ledger.account_transactions(id).await?)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn reference_transactions(
        &self,
        account_id: AccountId,
        reference_id: Uuid,
    ) -> Result<Vec<Transaction>, PortError> {
        Ok(self.ledger.reference_transactions(account_id, reference_id).await?)
    }
}

#[async_trait]
impl RevenueReportPort for PostgresBillingStore {
    #[instrument(skip(self, report), fields(date = %report.date, period = %report.period_type))]
    async fn upsert_report(&self, report: &RevenuePeriodReport) -> Result<RevenuePeriodReport, PortError> {
        Ok(self.reports.upsert(report).await?)
    }

    #[instrument(skip(self))]
    async fn get_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<RevenuePeriodReport>, PortError> {
        Ok(self.reports.get(date, period_type).await?)
    }

    #[instrument(skip(self))]
    async fn list_reports(
        &self,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RevenuePeriodReport>, PortError> {
        Ok(self.reports.list(period_type, from, to).await?)
    }

    #[instrument(skip(self, amounts))]
    async fn reverse_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
        amounts: &CategoryRevenue,
    ) -> Result<Option<ReversalOutcome>, PortError> {
        Ok(self.reports.reverse(date, period_type, amounts).await?)
    }
}

#[async_trait]
impl OutboxPort for PostgresBillingStore {
    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    async fn enqueue(&self, jobs: &[OutboxJob]) -> Result<(), PortError> {
        Ok(self.outbox.enqueue(jobs).await?)
    }

    #[instrument(skip(self))]
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxJob>, PortError> {
        let jobs = self.outbox.claim_due(now, lease_until, limit).await?;
        debug!(claimed = jobs.len(), "Claimed due outbox jobs");
        Ok(jobs)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn claim_job(
        &self,
        id: OutboxJobId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<OutboxJob>, PortError> {
        Ok(self.outbox.claim_job(id, now, lease_until).await?)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn mark_done(&self, id: OutboxJobId, at: DateTime<Utc>) -> Result<(), PortError> {
        Ok(self.outbox.mark_done(id, at).await?)
    }

    #[instrument(skip(self, error), fields(job_id = %id))]
    async fn record_failure(
        &self,
        id: OutboxJobId,
        status: OutboxStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), PortError> {
        Ok(self
            .outbox
            .record_failure(id, status, attempts, next_attempt_at, error)
            .await?)
    }

    async fn list_jobs(&self, status: OutboxStatus) -> Result<Vec<OutboxJob>, PortError> {
        Ok(self.outbox.list_by_status(status).await?)
    }
}

#[async_trait]
impl InvoicePort for PostgresBillingStore {
    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn find_invoice_by_booking(&self, booking_id: BookingId) -> Result<Option<Invoice>, PortError> {
        Ok(self.invoices.find_by_booking(booking_id).await?)
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
        Ok(self.invoices.get(id).await?)
    }

    #[instrument(skip(self))]
    async fn max_invoice_sequence(&self, prefix: &str, year_month: &str) -> Result<Option<u32>, PortError> {
        Ok(self.invoices.max_sequence(prefix, year_month).await?)
    }

    #[instrument(skip(self, invoice), fields(number = %invoice.invoice_number))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
        debug!(booking_id = %invoice.booking_id, "Inserting invoice");
        Ok(self.invoices.insert(invoice).await?)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id))]
    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
        Ok(self.invoices.update(invoice).await?)
    }
}

#[async_trait]
impl PaymentPort for PostgresBillingStore {
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn insert_payment(&self, payment: &Payment) -> Result<(), PortError> {
        Ok(self.payments.insert(payment).await?)
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn update_payment(&self, payment: &Payment) -> Result<(), PortError> {
        Ok(self.payments.update(payment).await?)
    }

    #[instrument(skip(self), fields(payment_id = %id))]
    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
        Ok(self.payments.get(id).await?)
    }

    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn list_payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError> {
        Ok(self.payments.list_for_booking(booking_id).await?)
    }
}

// Tokens are never recorded in spans
#[async_trait]
impl GuestAccessPort for PostgresBillingStore {
    #[instrument(skip(self, access), fields(access_id = %access.id))]
    async fn insert_access(&self, access: &GuestBillingAccess) -> Result<(), PortError> {
        Ok(self.guest_access.insert(access).await?)
    }

    #[instrument(skip_all)]
    async fn find_access_by_token(&self, token: &str) -> Result<Option<GuestBillingAccess>, PortError> {
        Ok(self.guest_access.find_by_token(token).await?)
    }

    #[instrument(skip_all)]
    async fn record_view(&self, token: &str, at: DateTime<Utc>) -> Result<GuestBillingAccess, PortError> {
        Ok(self.guest_access.record_view(token, at).await?)
    }

    #[instrument(skip_all)]
    async fn deactivate_access(&self, token: &str) -> Result<(), PortError> {
        Ok(self.guest_access.deactivate(token).await?)
    }
}
