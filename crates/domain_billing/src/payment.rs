//! Guest payments
//!
//! [`PaymentService`] records payments against a booking and reacts to the
//! booking's payment status. The transition into `paid` recognizes the bill's
//! revenue in the ledger; leaving `paid` reverses exactly what was recognized.
//! Report updates ride along as outbox jobs committed with the postings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, instrument, warn};

use core_kernel::{BookingId, Currency, Money, MoneyError, PaymentId};

use crate::bill::{BillCalculation, BillCalculator};
use crate::booking::{Booking, BookingPaymentStatus, StatusTransition};
use crate::category::CategoryRevenue;
use crate::error::BillingError;
use crate::ledger::{LedgerService, SYSTEM_USER};
use crate::outbox::{OutboxJob, RevenueJobRunner};
use crate::ports::{bounded, BillingPorts};
use crate::settings::BillingSettings;
use crate::transaction::PostingBatch;

/// How a guest paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    BankTransfer,
    Online,
    Other,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 6] = [
        PaymentMethod::Cash,
        PaymentMethod::Card,
        PaymentMethod::Upi,
        PaymentMethod::BankTransfer,
        PaymentMethod::Online,
        PaymentMethod::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Online => "online",
            PaymentMethod::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| BillingError::validation(format!("unknown payment method: {}", s)))
    }
}

/// Amounts per payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodTotals {
    pub cash: Money,
    pub card: Money,
    pub upi: Money,
    pub bank_transfer: Money,
    pub online: Money,
    pub other: Money,
}

impl PaymentMethodTotals {
    pub fn zero(currency: Currency) -> Self {
        let z = Money::zero(currency);
        Self {
            cash: z,
            card: z,
            upi: z,
            bank_transfer: z,
            online: z,
            other: z,
        }
    }

    pub fn get(&self, method: PaymentMethod) -> Money {
        match method {
            PaymentMethod::Cash => self.cash,
            PaymentMethod::Card => self.card,
            PaymentMethod::Upi => self.upi,
            PaymentMethod::BankTransfer => self.bank_transfer,
            PaymentMethod::Online => self.online,
            PaymentMethod::Other => self.other,
        }
    }

    fn get_mut(&mut self, method: PaymentMethod) -> &mut Money {
        match method {
            PaymentMethod::Cash => &mut self.cash,
            PaymentMethod::Card => &mut self.card,
            PaymentMethod::Upi => &mut self.upi,
            PaymentMethod::BankTransfer => &mut self.bank_transfer,
            PaymentMethod::Online => &mut self.online,
            PaymentMethod::Other => &mut self.other,
        }
    }

    pub fn add(&mut self, method: PaymentMethod, amount: Money) -> Result<(), MoneyError> {
        let slot = self.get_mut(method);
        *slot = slot.checked_add(&amount)?;
        Ok(())
    }

    pub fn merge(&mut self, other: &PaymentMethodTotals) -> Result<(), MoneyError> {
        for method in PaymentMethod::ALL {
            self.add(method, other.get(method))?;
        }
        Ok(())
    }

    pub fn total(&self) -> Money {
        PaymentMethod::ALL
            .into_iter()
            .fold(Money::zero(self.cash.currency()), |acc, m| acc + self.get(m))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    /// The ledger rejected the revenue posting
    Failed,
    /// Undone by a status change out of `paid`
    Reversed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Reversed => "reversed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "reversed" => Ok(PaymentStatus::Reversed),
            other => Err(BillingError::validation(format!("unknown payment status: {}", other))),
        }
    }
}

/// A payment received for a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// External reference (card slip, UPI id, bank reference)
    pub reference: Option<String>,
    pub received_by: Option<String>,
    pub notes: Option<String>,
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
    /// Amount before the last modification
    pub original_amount: Option<Money>,
    pub modification_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Input of [`PaymentService::process_payment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessPaymentRequest {
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub received_by: Option<String>,
    pub notes: Option<String>,
}

impl ProcessPaymentRequest {
    pub fn new(amount: Money, method: PaymentMethod) -> Self {
        Self {
            amount,
            method,
            reference: None,
            received_by: None,
            notes: None,
        }
    }

    pub fn received_by(mut self, staff: impl Into<String>) -> Self {
        self.received_by = Some(staff.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Outcome of [`PaymentService::change_payment_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub booking_id: BookingId,
    pub from: BookingPaymentStatus,
    pub to: BookingPaymentStatus,
    /// Revenue taken back out of the ledger, when leaving `paid`
    pub reversed: Option<CategoryRevenue>,
}

/// Sum of completed payments
pub fn amount_paid(payments: &[Payment], currency: Currency) -> Result<Money, MoneyError> {
    payments
        .iter()
        .filter(|p| p.is_completed())
        .try_fold(Money::zero(currency), |acc, p| acc.checked_add(&p.amount))
}

/// Status a booking reaches after payments totalling `paid` against `total`
pub fn derive_payment_status(current: BookingPaymentStatus, paid: Money, total: Money) -> BookingPaymentStatus {
    if current == BookingPaymentStatus::Paid {
        return current;
    }
    if paid.amount() >= total.amount() {
        BookingPaymentStatus::Paid
    } else if paid.is_positive() {
        BookingPaymentStatus::PartiallyPaid
    } else {
        current
    }
}

/// Records payments and drives the ledger from the booking's payment status
#[derive(Clone)]
pub struct PaymentService {
    ports: BillingPorts,
    settings: BillingSettings,
    ledger: LedgerService,
    bills: BillCalculator,
    runner: RevenueJobRunner,
}

impl PaymentService {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self {
            ledger: LedgerService::new(ports.clone(), settings.clone()),
            bills: BillCalculator::new(ports.clone(), settings.clone()),
            runner: RevenueJobRunner::new(ports.clone(), settings.clone()),
            ports,
            settings,
        }
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Booking, BillingError> {
        bounded(
            self.settings.operation_timeout,
            "get_booking",
            self.ports.bookings.get_booking(booking_id),
        )
        .await
    }

    async fn payments(&self, booking_id: BookingId) -> Result<Vec<Payment>, BillingError> {
        bounded(
            self.settings.operation_timeout,
            "list_payments",
            self.ports.payments.list_payments(booking_id),
        )
        .await
    }

    /// Compare-and-set of a status change that posts nothing
    async fn set_status(&self, transition: StatusTransition) -> Result<(), BillingError> {
        bounded(
            self.settings.operation_timeout,
            "set_payment_status",
            self.ports.bookings.set_payment_status(&transition),
        )
        .await?;
        info!(
            booking_id = %transition.booking_id,
            from = %transition.expected,
            to = %transition.next,
            "booking payment status changed"
        );
        Ok(())
    }

    /// Whether a concurrent writer already left the booking in `wanted`
    async fn raced_to(&self, booking_id: BookingId, wanted: BookingPaymentStatus) -> bool {
        match self.booking(booking_id).await {
            Ok(current) => current.payment_status == wanted,
            Err(e) => {
                warn!(error = %e, "could not re-read booking after a status conflict");
                false
            }
        }
    }

    async fn apply_jobs(&self, jobs: &[OutboxJob], now: DateTime<Utc>) {
        if !self.settings.apply_revenue_inline || jobs.is_empty() {
            return;
        }
        let applied = self.runner.apply_inline(jobs, now).await;
        if applied < jobs.len() {
            warn!(applied, queued = jobs.len(), "revenue jobs left for the worker");
        }
    }

    /// Posts the bill's revenue and marks the booking paid in one batch
    ///
    /// The batch only commits while the booking still holds the status it was
    /// read with, so revenue is recognized at most once per transition.
    async fn recognize(
        &self,
        booking: &Booking,
        bill: &BillCalculation,
        method: Option<PaymentMethod>,
        processed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxJob>, BillingError> {
        let jobs = OutboxJob::recompute_all(self.settings.timezone.local_date(now), now);
        let transition =
            StatusTransition::new(booking.id, booking.payment_status, BookingPaymentStatus::Paid).paid_at(now);
        if bill.total_amount.is_positive() {
            let breakdown = bill.category_breakdown()?;
            self.ledger
                .process_payment_revenue(
                    booking.id,
                    bill.total_amount,
                    &breakdown,
                    method,
                    processed_by,
                    booking.guest_user_id,
                    jobs.clone(),
                    Some(transition),
                )
                .await?;
        } else {
            let batch = PostingBatch::new(now)
                .with_jobs(jobs.clone())
                .with_status_transition(transition);
            self.ledger.commit(batch).await?;
        }
        Ok(jobs)
    }

    /// Records a payment and advances the booking's payment status
    ///
    /// On the transition into `paid` the bill's revenue is posted to the ledger
    /// together with the status change. If that posting fails the payment is
    /// marked `failed` and the error is returned. Losing the transition to a
    /// concurrent payment that already made the booking `paid` is not a
    /// failure: this payment stays recorded and the revenue is posted once.
    /// Report updates never fail the payment.
    ///
    /// # Arguments
    ///
    /// * `booking_id` - Booking being paid
    /// * `request` - Amount, method and optional reference, collector and notes
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for a non-positive amount or a foreign currency
    /// - `BillingError::InvalidStateTransition` for cancelled or refunded bookings
    /// - `BillingError::NotFound` when the booking does not exist
    /// - `BillingError::Conflict` when the booking's status changed concurrently
    #[instrument(skip(self, request), fields(amount = %request.amount, method = %request.method))]
    pub async fn process_payment(
        &self,
        booking_id: BookingId,
        request: ProcessPaymentRequest,
    ) -> Result<Payment, BillingError> {
        if !request.amount.is_positive() {
            return Err(BillingError::validation("payment amount must be positive"));
        }
        let booking = self.booking(booking_id).await?;
        if booking.room_price.currency() != request.amount.currency() {
            return Err(BillingError::validation(format!(
                "payment in {} for a booking billed in {}",
                request.amount.currency(),
                booking.room_price.currency()
            )));
        }
        if matches!(
            booking.payment_status,
            BookingPaymentStatus::Cancelled | BookingPaymentStatus::Refunded
        ) {
            return Err(BillingError::transition(booking.payment_status, "payment"));
        }
        let bill = self.bills.recalculate_booking_total(booking_id).await?;

        let now = Utc::now();
        let mut payment = Payment {
            id: PaymentId::new_v7(),
            booking_id,
            amount: request.amount,
            method: request.method,
            reference: request.reference,
            received_by: request.received_by,
            notes: request.notes,
            status: PaymentStatus::Completed,
            paid_at: now,
            original_amount: None,
            modification_reason: None,
            created_at: now,
            updated_at: now,
        };
        bounded(
            self.settings.operation_timeout,
            "insert_payment",
            self.ports.payments.insert_payment(&payment),
        )
        .await?;
        info!(payment_id = %payment.id, "payment recorded");

        let payments = self.payments(booking_id).await?;
        let paid = amount_paid(&payments, bill.total_amount.currency())?;
        let next = derive_payment_status(booking.payment_status, paid, bill.total_amount);
        if next == booking.payment_status {
            return Ok(payment);
        }
        if !booking.payment_status.can_transition_to(next) {
            return Err(BillingError::transition(booking.payment_status, next));
        }

        if next == BookingPaymentStatus::Paid {
            let processed_by = payment.received_by.clone().unwrap_or_else(|| SYSTEM_USER.to_string());
            match self
                .recognize(&booking, &bill, Some(payment.method), &processed_by, now)
                .await
            {
                Ok(jobs) => self.apply_jobs(&jobs, now).await,
                Err(BillingError::Conflict(_)) if self.raced_to(booking_id, next).await => {
                    info!(payment_id = %payment.id, "booking already paid by a concurrent payment");
                }
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e, "revenue posting failed; payment marked failed");
                    payment.status = PaymentStatus::Failed;
                    payment.updated_at = Utc::now();
                    if let Err(update_err) = bounded(
                        self.settings.operation_timeout,
                        "update_payment",
                        self.ports.payments.update_payment(&payment),
                    )
                    .await
                    {
                        error!(payment_id = %payment.id, error = %update_err, "could not mark payment failed");
                    }
                    return Err(e);
                }
            }
        } else {
            match self
                .set_status(StatusTransition::new(booking_id, booking.payment_status, next))
                .await
            {
                Ok(()) => {}
                Err(BillingError::Conflict(_)) if self.raced_to(booking_id, next).await => {}
                Err(e) => return Err(e),
            }
        }
        Ok(payment)
    }

    /// Corrects the amount of an earlier payment
    ///
    /// The most recent completed payment of `original_amount` is adjusted and
    /// the signed difference is posted to the ledger with an audit trail.
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for negative amounts or differing currencies
    /// - `BillingError::NotFound` when no completed payment of `original_amount` exists
    #[instrument(skip(self, reason))]
    pub async fn modify_payment(
        &self,
        booking_id: BookingId,
        original_amount: Money,
        new_amount: Money,
        reason: &str,
        processed_by: &str,
    ) -> Result<Payment, BillingError> {
        if original_amount.is_negative() || new_amount.is_negative() {
            return Err(BillingError::validation("payment amounts must not be negative"));
        }
        if original_amount.currency() != new_amount.currency() {
            return Err(BillingError::validation("original and new amount differ in currency"));
        }
        let booking = self.booking(booking_id).await?;
        let mut payment = self
            .payments(booking_id)
            .await?
            .into_iter()
            .filter(|p| p.is_completed() && p.amount == original_amount)
            .max_by_key(|p| p.paid_at)
            .ok_or_else(|| {
                BillingError::not_found("Payment", format!("{} of {}", booking_id, original_amount))
            })?;
        if original_amount == new_amount {
            return Ok(payment);
        }

        let now = Utc::now();
        payment.original_amount = Some(original_amount);
        payment.amount = new_amount;
        payment.modification_reason = Some(reason.to_string());
        payment.updated_at = now;

        let report_date = self
            .settings
            .timezone
            .local_date(booking.paid_at.unwrap_or(payment.paid_at));
        let jobs = OutboxJob::recompute_all(report_date, now);
        self.ledger
            .process_payment_modification(
                booking_id,
                original_amount,
                new_amount,
                reason,
                processed_by,
                booking.guest_user_id,
                jobs.clone(),
            )
            .await?;
        bounded(
            self.settings.operation_timeout,
            "update_payment",
            self.ports.payments.update_payment(&payment),
        )
        .await?;
        info!(payment_id = %payment.id, from = %original_amount, to = %new_amount, "payment modified");
        self.apply_jobs(&jobs, now).await;
        Ok(payment)
    }

    /// Moves a booking to `status`, reversing recognized revenue when it leaves `paid`
    ///
    /// The reversal postings and the status change commit together, along with
    /// recompute jobs for the reports of the day the booking was paid. The
    /// booking no longer counts as paid once they commit, so the recomputed
    /// reports drop it exactly once.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidStateTransition` for a move the status table forbids
    /// - `BillingError::Conflict` when another caller changed the status first
    #[instrument(skip(self, reason))]
    pub async fn change_payment_status(
        &self,
        booking_id: BookingId,
        status: BookingPaymentStatus,
        processed_by: &str,
        reason: Option<&str>,
    ) -> Result<StatusChange, BillingError> {
        let booking = self.booking(booking_id).await?;
        let from = booking.payment_status;
        let mut change = StatusChange {
            booking_id,
            from,
            to: status,
            reversed: None,
        };
        if from == status {
            return Ok(change);
        }
        if !from.can_transition_to(status) {
            return Err(BillingError::transition(from, status));
        }

        let now = Utc::now();
        let transition = StatusTransition::new(booking_id, from, status);
        if status == BookingPaymentStatus::Paid {
            let bill = self.bills.recalculate_booking_total(booking_id).await?;
            let jobs = self.recognize(&booking, &bill, None, processed_by, now).await?;
            self.apply_jobs(&jobs, now).await;
        } else if from == BookingPaymentStatus::Paid {
            let recognized = self.ledger.recognized_revenue(booking_id).await?;
            let paid_date = self.settings.timezone.local_date(booking.paid_at.unwrap_or(now));
            let jobs = OutboxJob::recompute_all(paid_date, now);
            if recognized.is_zero() {
                warn!("no recognized revenue to reverse");
                let batch = PostingBatch::new(now)
                    .with_jobs(jobs.clone())
                    .with_status_transition(transition);
                self.ledger.commit(batch).await?;
            } else {
                self.ledger
                    .reverse_payment_revenue(
                        booking_id,
                        recognized.total(),
                        &recognized,
                        processed_by,
                        jobs.clone(),
                        Some(transition),
                    )
                    .await?;
            }
            self.reverse_payments(booking_id, reason, now).await?;
            self.apply_jobs(&jobs, now).await;
            change.reversed = Some(recognized);
        } else {
            self.set_status(transition).await?;
        }
        Ok(change)
    }

    async fn reverse_payments(
        &self,
        booking_id: BookingId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        for mut payment in self.payments(booking_id).await? {
            if !payment.is_completed() {
                continue;
            }
            payment.status = PaymentStatus::Reversed;
            if let Some(reason) = reason {
                payment.notes = Some(reason.to_string());
            }
            payment.updated_at = now;
            bounded(
                self.settings.operation_timeout,
                "update_payment",
                self.ports.payments.update_payment(&payment),
            )
            .await?;
        }
        Ok(())
    }

    /// Marks every booking past check-out and still owing as overdue
    ///
    /// A booking whose status changes between the scan and the write (a payment
    /// landing meanwhile) is skipped and picked up again on the next refresh.
    ///
    /// # Errors
    ///
    /// Returns the store error when candidates cannot be listed or a write
    /// fails for a reason other than a status conflict
    #[instrument(skip(self))]
    pub async fn refresh_overdue(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, BillingError> {
        let candidates = bounded(
            self.settings.operation_timeout,
            "overdue_candidates",
            self.ports.bookings.overdue_candidates(now),
        )
        .await?;
        let mut marked = Vec::with_capacity(candidates.len());
        for id in candidates {
            let booking = self.booking(id).await?;
            if !booking.is_overdue_at(now) {
                continue;
            }
            let transition = StatusTransition::new(id, booking.payment_status, BookingPaymentStatus::Overdue);
            match self.set_status(transition).await {
                Ok(()) => marked.push(id),
                Err(BillingError::Conflict(message)) => {
                    warn!(booking_id = %id, %message, "booking changed while marking overdue; skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if !marked.is_empty() {
            info!(count = marked.len(), "bookings marked overdue");
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inr(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    #[test]
    fn test_derive_status() {
        use BookingPaymentStatus::*;
        let total = inr(dec!(1000));
        assert_eq!(derive_payment_status(Pending, inr(dec!(0)), total), Pending);
        assert_eq!(derive_payment_status(Pending, inr(dec!(400)), total), PartiallyPaid);
        assert_eq!(derive_payment_status(PartiallyPaid, inr(dec!(1000)), total), Paid);
        assert_eq!(derive_payment_status(Overdue, inr(dec!(200)), total), PartiallyPaid);
        assert_eq!(derive_payment_status(Paid, inr(dec!(200)), total), Paid);
    }

    #[test]
    fn test_method_totals() {
        let mut totals = PaymentMethodTotals::zero(Currency::INR);
        totals.add(PaymentMethod::Cash, inr(dec!(100))).unwrap();
        totals.add(PaymentMethod::Upi, inr(dec!(250.50))).unwrap();
        totals.add(PaymentMethod::Cash, inr(dec!(50))).unwrap();
        assert_eq!(totals.cash, inr(dec!(150)));
        assert_eq!(totals.total(), inr(dec!(400.50)));
    }

    #[test]
    fn test_method_round_trip() {
        for method in PaymentMethod::ALL {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
    }
}
