//! In-memory billing store
//!
//! Implements every billing port over plain collections behind one async
//! mutex, which makes each port call atomic. Useful for unit and workflow tests
//! without a database. Failure switches let tests exercise conflict retries and
//! unavailable stores.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use core_kernel::{
    AccountId, AdapterHealth, BillItemId, BookingId, Currency, DomainPort, HealthCheckResult, HealthCheckable,
    InvoiceId, Money, OutboxJobId, PaymentId, PeriodType, PortError, ServiceId, UserId,
};

use super::{
    BillItemPort, BookingPort, GuestAccessPort, HotelConfigPort, InvoicePort, LedgerCommitError, LedgerPort,
    OutboxPort, PaymentPort, RevenueReportPort, UserPort,
};
use crate::account::{Account, UserRef};
use crate::bill::{BillItem, HotelService};
use crate::booking::{Booking, BookingPaymentStatus, BookingTotals, StatusTransition};
use crate::category::CategoryRevenue;
use crate::guest_access::GuestBillingAccess;
use crate::invoice::{HotelProfile, Invoice, InvoiceNumberGenerator};
use crate::outbox::{OutboxJob, OutboxStatus};
use crate::payment::Payment;
use crate::revenue::{PaidBooking, ReversalOutcome, RevenuePeriodReport};
use crate::tax::TaxConfig;
use crate::transaction::{PostingBatch, Transaction, TransactionType};

#[derive(Debug, Default)]
struct Switches {
    commit_conflicts: u32,
    ledger_unavailable: bool,
    reports_unavailable: bool,
    config_unavailable: bool,
}

#[derive(Debug)]
struct MemoryState {
    currency: Currency,
    bookings: HashMap<BookingId, Booking>,
    bill_items: HashMap<BillItemId, BillItem>,
    services: HashMap<ServiceId, HotelService>,
    tax_config: TaxConfig,
    hotel: HotelProfile,
    users: HashMap<UserId, UserRef>,
    accounts: HashMap<AccountId, Account>,
    transactions: Vec<Transaction>,
    reports: BTreeMap<(NaiveDate, PeriodType), RevenuePeriodReport>,
    outbox: BTreeMap<OutboxJobId, OutboxJob>,
    invoices: HashMap<InvoiceId, Invoice>,
    payments: HashMap<PaymentId, Payment>,
    guest_access: HashMap<String, GuestBillingAccess>,
    switches: Switches,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            currency: Currency::INR,
            bookings: HashMap::new(),
            bill_items: HashMap::new(),
            services: HashMap::new(),
            tax_config: TaxConfig::default(),
            hotel: HotelProfile::default(),
            users: HashMap::new(),
            accounts: HashMap::new(),
            transactions: Vec::new(),
            reports: BTreeMap::new(),
            outbox: BTreeMap::new(),
            invoices: HashMap::new(),
            payments: HashMap::new(),
            guest_access: HashMap::new(),
            switches: Switches::default(),
        }
    }
}

impl MemoryState {
    fn payments_of(&self, booking_id: BookingId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.paid_at.cmp(&b.paid_at).then(a.id.cmp(&b.id)));
        payments
    }

    fn items_of(&self, booking_id: BookingId) -> Vec<BillItem> {
        let mut items: Vec<BillItem> = self
            .bill_items
            .values()
            .filter(|i| i.booking_id == booking_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    fn active_main(&self) -> Option<&Account> {
        self.accounts.values().find(|a| a.is_main_account && a.is_active)
    }

    fn active_owned(&self, user_id: UserId) -> Option<&Account> {
        self.accounts
            .values()
            .find(|a| a.is_active && a.owner_user_id == Some(user_id))
    }

    fn check_transition(&self, transition: &StatusTransition) -> Result<(), LedgerCommitError> {
        let booking = self
            .bookings
            .get(&transition.booking_id)
            .ok_or_else(|| PortError::not_found("Booking", transition.booking_id))?;
        if booking.payment_status != transition.expected {
            return Err(LedgerCommitError::StaleStatus {
                booking_id: transition.booking_id,
                expected: transition.expected,
                actual: booking.payment_status,
            });
        }
        Ok(())
    }

    fn apply_transition(&mut self, transition: &StatusTransition) -> Result<(), LedgerCommitError> {
        self.check_transition(transition)?;
        if let Some(booking) = self.bookings.get_mut(&transition.booking_id) {
            booking.payment_status = transition.next;
            if transition.paid_at.is_some() {
                booking.paid_at = transition.paid_at;
            }
            booking.updated_at = Utc::now();
        }
        Ok(())
    }

    fn ledger_check(&self) -> Result<(), PortError> {
        if self.switches.ledger_unavailable {
            return Err(PortError::connection("ledger store unavailable"));
        }
        Ok(())
    }

    fn reports_check(&self) -> Result<(), PortError> {
        if self.switches.reports_unavailable {
            return Err(PortError::ServiceUnavailable {
                service: "revenue reports".to_string(),
            });
        }
        Ok(())
    }
}

/// Every billing port over in-memory collections
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.state.lock().await.bookings.insert(booking.id, booking);
    }

    pub async fn insert_user(&self, user: UserRef) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_service(&self, service: HotelService) {
        self.state.lock().await.services.insert(service.id, service);
    }

    pub async fn insert_account(&self, account: Account) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    pub async fn set_tax_config(&self, config: TaxConfig) {
        self.state.lock().await.tax_config = config;
    }

    pub async fn set_hotel_profile(&self, profile: HotelProfile) {
        self.state.lock().await.hotel = profile;
    }

    /// Makes the next `n` batch commits fail with a conflict
    pub async fn fail_next_commits(&self, n: u32) {
        self.state.lock().await.switches.commit_conflicts = n;
    }

    pub async fn set_ledger_unavailable(&self, unavailable: bool) {
        self.state.lock().await.switches.ledger_unavailable = unavailable;
    }

    pub async fn set_reports_unavailable(&self, unavailable: bool) {
        self.state.lock().await.switches.reports_unavailable = unavailable;
    }

    pub async fn set_config_unavailable(&self, unavailable: bool) {
        self.state.lock().await.switches.config_unavailable = unavailable;
    }

    pub async fn booking(&self, id: BookingId) -> Option<Booking> {
        self.state.lock().await.bookings.get(&id).cloned()
    }

    pub async fn account(&self, id: AccountId) -> Option<Account> {
        self.state.lock().await.accounts.get(&id).cloned()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.clone()
    }

    pub async fn jobs(&self) -> Vec<OutboxJob> {
        self.state.lock().await.outbox.values().cloned().collect()
    }

    pub async fn report(&self, date: NaiveDate, period_type: PeriodType) -> Option<RevenuePeriodReport> {
        self.state.lock().await.reports.get(&(date, period_type)).cloned()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.state.lock().await.invoices.values().cloned().collect()
    }
}

impl DomainPort for InMemoryBillingStore {}

#[async_trait]
impl HealthCheckable for InMemoryBillingStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult {
            adapter_id: "in-memory-billing-store".to_string(),
            status: AdapterHealth::Healthy,
            latency_ms: 0,
            message: None,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl BookingPort for InMemoryBillingStore {
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
        self.state
            .lock()
            .await
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Booking", id))
    }

    async fn update_booking_totals(&self, id: BookingId, totals: &BookingTotals) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Booking", id))?;
        booking.totals = Some(*totals);
        booking.updated_at = Utc::now();
        Ok(())
    }

    async fn set_payment_status(&self, transition: &StatusTransition) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        state.apply_transition(transition).map_err(|e| match e {
            LedgerCommitError::Port(p) => p,
            other => PortError::conflict(other.to_string()),
        })
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, PortError> {
        let state = self.state.lock().await;
        let mut ids: Vec<BookingId> = state
            .bookings
            .values()
            .filter(|b| b.is_overdue_at(now))
            .map(|b| b.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn paid_bookings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaidBooking>, PortError> {
        let state = self.state.lock().await;
        let mut paid: Vec<PaidBooking> = state
            .bookings
            .values()
            .filter(|b| b.payment_status == BookingPaymentStatus::Paid)
            .filter(|b| b.paid_at.is_some_and(|at| at >= from && at < to))
            .map(|b| PaidBooking {
                booking: b.clone(),
                payments: state.payments_of(b.id),
                items: state.items_of(b.id),
            })
            .collect();
        paid.sort_by_key(|p| p.booking.id);
        Ok(paid)
    }

    async fn outstanding_balance(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money, PortError> {
        let state = self.state.lock().await;
        let mut outstanding = Money::zero(state.currency);
        for booking in state.bookings.values() {
            if booking.payment_status.is_settled() || booking.check_in < from || booking.check_in >= to {
                continue;
            }
            let paid = state
                .payments_of(booking.id)
                .iter()
                .filter(|p| p.is_completed())
                .fold(Money::zero(state.currency), |acc, p| acc + p.amount);
            let due = booking
                .total_amount()
                .saturating_sub(&paid)
                .map_err(|e| PortError::internal(e.to_string()))?;
            outstanding = outstanding + due;
        }
        Ok(outstanding)
    }
}

#[async_trait]
impl BillItemPort for InMemoryBillingStore {
    async fn list_bill_items(&self, booking_id: BookingId) -> Result<Vec<BillItem>, PortError> {
        Ok(self.state.lock().await.items_of(booking_id))
    }

    async fn get_bill_item(&self, id: BillItemId) -> Result<BillItem, PortError> {
        self.state
            .lock()
            .await
            .bill_items
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("BillItem", id))
    }

    async fn insert_bill_item(&self, item: &BillItem) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        if !state.bookings.contains_key(&item.booking_id) {
            return Err(PortError::not_found("Booking", item.booking_id));
        }
        state.bill_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_bill_item(&self, item: &BillItem) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let slot = state
            .bill_items
            .get_mut(&item.id)
            .ok_or_else(|| PortError::not_found("BillItem", item.id))?;
        *slot = item.clone();
        Ok(())
    }

    async fn delete_bill_item(&self, id: BillItemId) -> Result<(), PortError> {
        self.state
            .lock()
            .await
            .bill_items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PortError::not_found("BillItem", id))
    }

    async fn get_service(&self, id: ServiceId) -> Result<HotelService, PortError> {
        self.state
            .lock()
            .await
            .services
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("HotelService", id))
    }
}

#[async_trait]
impl HotelConfigPort for InMemoryBillingStore {
    async fn tax_config(&self) -> Result<TaxConfig, PortError> {
        let state = self.state.lock().await;
        if state.switches.config_unavailable {
            return Err(PortError::ServiceUnavailable {
                service: "hotel configuration".to_string(),
            });
        }
        Ok(state.tax_config.clone())
    }

    async fn hotel_profile(&self) -> Result<HotelProfile, PortError> {
        Ok(self.state.lock().await.hotel.clone())
    }
}

#[async_trait]
impl UserPort for InMemoryBillingStore {
    async fn get_user(&self, id: UserId) -> Result<UserRef, PortError> {
        self.state
            .lock()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("User", id))
    }

    async fn find_users_by_name(&self, name: &str) -> Result<Vec<UserRef>, PortError> {
        let wanted = name.trim().to_lowercase();
        let state = self.state.lock().await;
        let mut users: Vec<UserRef> = state
            .users
            .values()
            .filter(|u| u.is_active && u.name.to_lowercase() == wanted)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }
}

#[async_trait]
impl LedgerPort for InMemoryBillingStore {
    async fn ensure_main_account(&self, candidate: &Account) -> Result<Account, PortError> {
        let mut state = self.state.lock().await;
        state.ledger_check()?;
        if let Some(existing) = state.active_main() {
            return Ok(existing.clone());
        }
        state.accounts.insert(candidate.id, candidate.clone());
        Ok(candidate.clone())
    }

    async fn ensure_user_account(&self, candidate: &Account) -> Result<Account, PortError> {
        let owner = candidate
            .owner_user_id
            .ok_or_else(|| PortError::validation_field("personal account needs an owner", "owner_user_id"))?;
        let mut state = self.state.lock().await;
        state.ledger_check()?;
        if let Some(existing) = state.active_owned(owner) {
            return Ok(existing.clone());
        }
        state.accounts.insert(candidate.id, candidate.clone());
        Ok(candidate.clone())
    }

    async fn find_user_account(&self, user_id: UserId) -> Result<Option<Account>, PortError> {
        let state = self.state.lock().await;
        state.ledger_check()?;
        Ok(state.active_owned(user_id).cloned())
    }

    async fn find_main_account(&self) -> Result<Option<Account>, PortError> {
        let state = self.state.lock().await;
        state.ledger_check()?;
        Ok(state.active_main().cloned())
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, PortError> {
        let state = self.state.lock().await;
        state.ledger_check()?;
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Account", id))
    }

    async fn create_account(&self, account: &Account) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        state.ledger_check()?;
        if account.is_active && account.is_main_account && state.active_main().is_some() {
            return Err(PortError::conflict("an active main account already exists"));
        }
        if let Some(owner) = account.owner_user_id {
            if account.is_active && state.active_owned(owner).is_some() {
                return Err(PortError::conflict("user already has an active account"));
            }
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn list_accounts(&self, active_only: bool) -> Result<Vec<Account>, PortError> {
        let state = self.state.lock().await;
        state.ledger_check()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| !active_only || a.is_active)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn commit_batch(&self, batch: PostingBatch) -> Result<Vec<Transaction>, LedgerCommitError> {
        let mut state = self.state.lock().await;
        state.ledger_check()?;
        if state.switches.commit_conflicts > 0 {
            state.switches.commit_conflicts -= 1;
            return Err(PortError::conflict("simulated serialization failure").into());
        }

        if let Some(transition) = &batch.status {
            state.check_transition(transition)?;
        }

        let mut balances: BTreeMap<AccountId, Money> = BTreeMap::new();
        for id in batch.account_ids() {
            let account = state
                .accounts
                .get(&id)
                .filter(|a| a.is_active)
                .ok_or_else(|| PortError::not_found("Account", id))?;
            balances.insert(id, account.balance);
        }
        for posting in &batch.postings {
            let account = &state.accounts[&posting.account_id];
            let current = balances[&posting.account_id];
            let next = current
                .checked_add(&posting.signed_amount())
                .map_err(|e| PortError::validation(e.to_string()))?;
            let guarded = posting.overdraft.guards(account.account_type);
            if posting.transaction_type == TransactionType::Debit && guarded && next.is_negative() {
                return Err(LedgerCommitError::InsufficientFunds {
                    account_id: posting.account_id,
                    balance: current,
                    requested: posting.amount,
                });
            }
            balances.insert(posting.account_id, next);
        }

        if let Some(transition) = &batch.status {
            state.apply_transition(transition)?;
        }
        let now = Utc::now();
        for (id, balance) in balances {
            if let Some(account) = state.accounts.get_mut(&id) {
                account.balance = balance;
                account.updated_at = now;
            }
        }
        let date = batch.transaction_date;
        let transactions: Vec<Transaction> = batch
            .postings
            .into_iter()
            .map(|p| p.into_transaction(date))
            .collect();
        state.transactions.extend(transactions.iter().cloned());
        for job in batch.jobs {
            state.outbox.insert(job.id, job);
        }
        Ok(transactions)
    }

    async fn account_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, PortError> {
        let state = self.state.lock().await;
        state.ledger_check()?;
        let mut txns: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.account_id == id)
            .cloned()
            .collect();
        txns.sort_by_key(|t| t.transaction_date);
        Ok(txns)
    }

    async fn reference_transactions(
        &self,
        account_id: AccountId,
        reference_id: uuid::Uuid,
    ) -> Result<Vec<Transaction>, PortError> {
        let state = self.state.lock().await;
        state.ledger_check()?;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id && t.reference_id == Some(reference_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RevenueReportPort for InMemoryBillingStore {
    async fn upsert_report(&self, report: &RevenuePeriodReport) -> Result<RevenuePeriodReport, PortError> {
        let mut state = self.state.lock().await;
        state.reports_check()?;
        let key = (report.date, report.period_type);
        let mut stored = report.clone();
        if let Some(existing) = state.reports.get(&key) {
            stored.id = existing.id;
            stored.created_at = existing.created_at;
        }
        state.reports.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
    ) -> Result<Option<RevenuePeriodReport>, PortError> {
        let state = self.state.lock().await;
        state.reports_check()?;
        Ok(state.reports.get(&(date, period_type)).cloned())
    }

    async fn list_reports(
        &self,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RevenuePeriodReport>, PortError> {
        let state = self.state.lock().await;
        state.reports_check()?;
        Ok(state
            .reports
            .values()
            .filter(|r| r.period_type == period_type && r.date >= from && r.date <= to)
            .cloned()
            .collect())
    }

    async fn reverse_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
        amounts: &CategoryRevenue,
    ) -> Result<Option<ReversalOutcome>, PortError> {
        let mut state = self.state.lock().await;
        state.reports_check()?;
        Ok(state.reports.get_mut(&(date, period_type)).map(|report| {
            let outcome = report.apply_reversal(amounts);
            report.updated_at = Utc::now();
            outcome
        }))
    }
}

fn claimable(job: &OutboxJob, now: DateTime<Utc>) -> bool {
    matches!(job.status, OutboxStatus::Pending | OutboxStatus::Running) && job.next_attempt_at <= now
}

#[async_trait]
impl OutboxPort for InMemoryBillingStore {
    async fn enqueue(&self, jobs: &[OutboxJob]) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        for job in jobs {
            state.outbox.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxJob>, PortError> {
        let mut state = self.state.lock().await;
        let mut due: Vec<&mut OutboxJob> = state.outbox.values_mut().filter(|j| claimable(j, now)).collect();
        due.sort_by_key(|j| j.next_attempt_at);
        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|job| {
                job.status = OutboxStatus::Running;
                job.next_attempt_at = lease_until;
                job.updated_at = now;
                job.clone()
            })
            .collect())
    }

    async fn claim_job(
        &self,
        id: OutboxJobId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<OutboxJob>, PortError> {
        let mut state = self.state.lock().await;
        Ok(state
            .outbox
            .get_mut(&id)
            .filter(|j| j.status == OutboxStatus::Pending && j.next_attempt_at <= now)
            .map(|job| {
                job.status = OutboxStatus::Running;
                job.next_attempt_at = lease_until;
                job.updated_at = now;
                job.clone()
            }))
    }

    async fn mark_done(&self, id: OutboxJobId, at: DateTime<Utc>) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let job = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("OutboxJob", id))?;
        job.status = OutboxStatus::Done;
        job.updated_at = at;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: OutboxJobId,
        status: OutboxStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let job = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("OutboxJob", id))?;
        job.status = status;
        job.attempts = attempts;
        job.next_attempt_at = next_attempt_at;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list_jobs(&self, status: OutboxStatus) -> Result<Vec<OutboxJob>, PortError> {
        Ok(self
            .state
            .lock()
            .await
            .outbox
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InvoicePort for InMemoryBillingStore {
    async fn find_invoice_by_booking(&self, booking_id: BookingId) -> Result<Option<Invoice>, PortError> {
        Ok(self
            .state
            .lock()
            .await
            .invoices
            .values()
            .find(|i| i.booking_id == booking_id)
            .cloned())
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
        self.state
            .lock()
            .await
            .invoices
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Invoice", id))
    }

    async fn max_invoice_sequence(&self, prefix: &str, year_month: &str) -> Result<Option<u32>, PortError> {
        Ok(self
            .state
            .lock()
            .await
            .invoices
            .values()
            .filter_map(|i| InvoiceNumberGenerator::parse(&i.invoice_number).ok())
            .filter(|n| n.prefix == prefix && n.year_month() == year_month)
            .map(|n| n.sequence)
            .max())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let clash = state
            .invoices
            .values()
            .any(|i| i.invoice_number == invoice.invoice_number || i.booking_id == invoice.booking_id);
        if clash {
            return Err(PortError::conflict(format!(
                "invoice {} or an invoice for booking {} already exists",
                invoice.invoice_number, invoice.booking_id
            )));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let slot = state
            .invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| PortError::not_found("Invoice", invoice.id))?;
        *slot = invoice.clone();
        Ok(())
    }
}

#[async_trait]
impl PaymentPort for InMemoryBillingStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), PortError> {
        self.state.lock().await.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let slot = state
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| PortError::not_found("Payment", payment.id))?;
        *slot = payment.clone();
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, PortError> {
        self.state
            .lock()
            .await
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Payment", id))
    }

    async fn list_payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, PortError> {
        Ok(self.state.lock().await.payments_of(booking_id))
    }
}

#[async_trait]
impl GuestAccessPort for InMemoryBillingStore {
    async fn insert_access(&self, access: &GuestBillingAccess) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        if state.guest_access.contains_key(&access.token) {
            return Err(PortError::conflict("token already issued"));
        }
        state.guest_access.insert(access.token.clone(), access.clone());
        Ok(())
    }

    async fn find_access_by_token(&self, token: &str) -> Result<Option<GuestBillingAccess>, PortError> {
        Ok(self.state.lock().await.guest_access.get(token).cloned())
    }

    async fn record_view(&self, token: &str, at: DateTime<Utc>) -> Result<GuestBillingAccess, PortError> {
        let mut state = self.state.lock().await;
        let access = state
            .guest_access
            .get_mut(token)
            .ok_or_else(|| PortError::not_found("GuestBillingAccess", "token"))?;
        access.view_count = access.view_count.saturating_add(1);
        access.last_viewed_at = Some(at);
        Ok(access.clone())
    }

    async fn deactivate_access(&self, token: &str) -> Result<(), PortError> {
        let mut state = self.state.lock().await;
        let access = state
            .guest_access
            .get_mut(token)
            .ok_or_else(|| PortError::not_found("GuestBillingAccess", "token"))?;
        access.is_active = false;
        Ok(())
    }
}
