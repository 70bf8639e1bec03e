//! End-to-end billing workflows against the in-memory store

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{
    BookingId, Currency, DateRange, DomainPort, Money, PeriodType, PortError, ReportId, RoomId, ServiceId, UserId,
};

use domain_billing::ports::{BookingPort, PaymentPort, RevenueReportPort};
use domain_billing::{
    Account, AccountType, BillCalculator, BillItem, BillItemUpdate, BillingError, BillingPorts, BillingSettings,
    Booking, BookingPaymentStatus, BookingSource, BookingTotals, CategoryRevenue, GuestAccessService, HotelService,
    InMemoryBillingStore, InvoiceService, InvoiceStatus, LedgerService, NewBillItem, OutboxJobKind, OutboxStatus,
    PaidBooking, Payment, PaymentMethod, PaymentMethodTotals, PaymentService, PaymentStatus, Posting,
    ProcessPaymentRequest, RevenueAggregator, RevenueCategory, RevenueJobRunner, RevenuePeriodReport, ServiceCategory,
    StaffRef, StatusTransition, TransactionCategory, TransactionType, UserRef,
};

// ============================================================================
// Fixtures
// ============================================================================

fn inr(amount: Decimal) -> Money {
    Money::new(amount, Currency::INR)
}

/// Two nights from 10 June 2024, 14:00 hotel time
fn stay(nightly: Decimal) -> Booking {
    let check_in = Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap();
    Booking {
        id: BookingId::new_v7(),
        room_id: RoomId::new(),
        room_number: "204".to_string(),
        room_type: "Deluxe".to_string(),
        room_price: inr(nightly),
        guest_name: "Asha Rao".to_string(),
        guest_user_id: None,
        check_in,
        check_out: check_in + Duration::days(2),
        source: BookingSource::Website,
        room_base_amount: None,
        room_discount: inr(dec!(0)),
        totals: None,
        payment_status: BookingPaymentStatus::Pending,
        paid_at: None,
        created_at: check_in,
        updated_at: check_in,
    }
}

fn user(name: &str) -> UserRef {
    UserRef {
        id: UserId::new_v7(),
        name: name.to_string(),
        email: None,
        is_active: true,
    }
}

struct Hotel {
    store: Arc<InMemoryBillingStore>,
    settings: BillingSettings,
    bills: BillCalculator,
    ledger: LedgerService,
    payments: PaymentService,
    invoices: InvoiceService,
    guests: GuestAccessService,
    revenue: RevenueAggregator,
    runner: RevenueJobRunner,
    restaurant: ServiceId,
}

impl Hotel {
    async fn open() -> Self {
        Self::with_settings(BillingSettings::default()).await
    }

    async fn with_settings(settings: BillingSettings) -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let restaurant = HotelService {
            id: ServiceId::new(),
            name: "Restaurant".to_string(),
            category: ServiceCategory::Restaurant,
            hsn_code: Some("996331".to_string()),
            is_active: true,
        };
        let restaurant_id = restaurant.id;
        store.insert_service(restaurant).await;
        let ports = BillingPorts::from_store(store.clone());
        Self {
            bills: BillCalculator::new(ports.clone(), settings.clone()),
            ledger: LedgerService::new(ports.clone(), settings.clone()),
            payments: PaymentService::new(ports.clone(), settings.clone()),
            invoices: InvoiceService::new(ports.clone(), settings.clone()),
            guests: GuestAccessService::new(ports.clone(), settings.clone()),
            revenue: RevenueAggregator::new(ports.clone(), settings.clone()),
            runner: RevenueJobRunner::new(ports, settings.clone()),
            store,
            settings,
            restaurant: restaurant_id,
        }
    }

    async fn checked_in(&self) -> Booking {
        let booking = stay(dec!(1000));
        self.store.insert_booking(booking.clone()).await;
        booking
    }

    /// Two dinners at 250 with 5% GST: 525 on the bill
    async fn add_dinner(&self, booking_id: BookingId) -> BillItem {
        self.bills
            .add_bill_item(
                booking_id,
                NewBillItem {
                    item_name: "Dinner".to_string(),
                    quantity: dec!(2),
                    unit_price: Some(inr(dec!(250))),
                    gst_applicable: true,
                    gst_percentage: Some(dec!(5)),
                    service_id: Some(self.restaurant),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    /// Booking of 2360 for the room plus 525 for dinner
    async fn billed(&self) -> Booking {
        let booking = self.checked_in().await;
        self.add_dinner(booking.id).await;
        booking
    }

    async fn pay(&self, booking_id: BookingId, amount: Decimal, method: PaymentMethod) -> Result<Payment, BillingError> {
        self.payments
            .process_payment(
                booking_id,
                ProcessPaymentRequest::new(inr(amount), method).received_by("front-desk"),
            )
            .await
    }

    async fn main_balance(&self) -> Money {
        self.ledger.get_or_create_main_account().await.unwrap().balance
    }

    async fn account(&self, account_type: AccountType, name: &str) -> Account {
        let account = Account::new(name, account_type, Currency::INR, Utc::now());
        self.store.insert_account(account.clone()).await;
        account
    }
}

/// Serves one booking as it was when built, like a reader that lost a race
/// with a concurrent writer; everything else goes to the store
struct SnapshotBookings {
    store: Arc<InMemoryBillingStore>,
    snapshot: Booking,
}

impl DomainPort for SnapshotBookings {}

#[async_trait]
impl BookingPort for SnapshotBookings {
    async fn get_booking(&self, id: BookingId) -> Result<Booking, PortError> {
        if id == self.snapshot.id {
            return Ok(self.snapshot.clone());
        }
        self.store.get_booking(id).await
    }

    async fn update_booking_totals(&self, id: BookingId, totals: &BookingTotals) -> Result<(), PortError> {
        self.store.update_booking_totals(id, totals).await
    }

    async fn set_payment_status(&self, transition: &StatusTransition) -> Result<(), PortError> {
        self.store.set_payment_status(transition).await
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, PortError> {
        let mut ids: Vec<BookingId> = self
            .store
            .overdue_candidates(now)
            .await?
            .into_iter()
            .filter(|id| *id != self.snapshot.id)
            .collect();
        if self.snapshot.is_overdue_at(now) {
            ids.push(self.snapshot.id);
        }
        Ok(ids)
    }

    async fn paid_bookings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaidBooking>, PortError> {
        self.store.paid_bookings_between(from, to).await
    }

    async fn outstanding_balance(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money, PortError> {
        self.store.outstanding_balance(from, to).await
    }
}

impl Hotel {
    /// Payment service whose reads of `booking_id` are frozen at its current state
    async fn stale_payments(&self, booking_id: BookingId) -> PaymentService {
        let snapshot = self.store.booking(booking_id).await.unwrap();
        let mut ports = BillingPorts::from_store(self.store.clone());
        ports.bookings = Arc::new(SnapshotBookings {
            store: self.store.clone(),
            snapshot,
        });
        PaymentService::new(ports, self.settings.clone())
    }

    async fn revenue_posting_count(&self) -> usize {
        self.store
            .transactions()
            .await
            .iter()
            .filter(|t| matches!(t.category, TransactionCategory::Revenue(_)))
            .count()
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Bill calculation
// ============================================================================

mod bill_tests {
    use super::*;

    #[tokio::test]
    async fn test_adding_item_recalculates_booking_total() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        let item = hotel.add_dinner(booking.id).await;

        assert_eq!(item.total_price, inr(dec!(500)));
        assert_eq!(item.tax_amount, inr(dec!(25)));
        assert_eq!(item.final_amount, inr(dec!(525)));
        assert_eq!(item.hsn_code.as_deref(), Some("996331"));

        let totals = hotel.store.booking(booking.id).await.unwrap().totals.unwrap();
        assert_eq!(totals.base_amount, inr(dec!(2500)));
        assert_eq!(totals.gst_amount, inr(dec!(385)));
        assert_eq!(totals.total_amount, inr(dec!(2885)));
    }

    #[tokio::test]
    async fn test_calculate_bill_is_repeatable() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;

        let first = hotel.bills.calculate_bill(booking.id).await.unwrap();
        let second = hotel.bills.calculate_bill(booking.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.nights, 2);
        assert_eq!(first.room_tax.total_amount, inr(dec!(2360)));
    }

    #[tokio::test]
    async fn test_update_and_remove_keep_totals_in_step() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        let item = hotel.add_dinner(booking.id).await;

        let updated = hotel
            .bills
            .update_bill_item(
                item.id,
                BillItemUpdate {
                    quantity: Some(dec!(3)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.final_amount, inr(dec!(787.50)));
        let totals = hotel.store.booking(booking.id).await.unwrap().totals.unwrap();
        assert_eq!(totals.total_amount, inr(dec!(3147.50)));

        hotel.bills.remove_bill_item(item.id).await.unwrap();
        let totals = hotel.store.booking(booking.id).await.unwrap().totals.unwrap();
        assert_eq!(totals.total_amount, inr(dec!(2360)));
        assert!(hotel.bills.get_bill_items(booking.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_gst_above_hundred() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        let result = hotel
            .bills
            .add_bill_item(
                booking.id,
                NewBillItem {
                    item_name: "Spa".to_string(),
                    quantity: dec!(1),
                    unit_price: Some(inr(dec!(100))),
                    gst_applicable: true,
                    gst_percentage: Some(dec!(150)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(hotel.bills.get_bill_items(booking.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_prices_in_another_currency() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        let before = hotel.store.booking(booking.id).await.unwrap().totals;

        let dollars = hotel
            .bills
            .add_bill_item(
                booking.id,
                NewBillItem {
                    item_name: "Minibar".to_string(),
                    quantity: dec!(1),
                    unit_price: Some(Money::new(dec!(10), Currency::USD)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(dollars, Err(BillingError::Validation(_))));

        let dollar_discount = hotel
            .bills
            .add_bill_item(
                booking.id,
                NewBillItem {
                    item_name: "Minibar".to_string(),
                    quantity: dec!(1),
                    unit_price: Some(inr(dec!(100))),
                    discount: Some(Money::new(dec!(1), Currency::USD)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(dollar_discount, Err(BillingError::Validation(_))));
        assert!(hotel.bills.get_bill_items(booking.id).await.unwrap().is_empty());
        assert_eq!(hotel.store.booking(booking.id).await.unwrap().totals, before);

        let dinner = hotel.add_dinner(booking.id).await;
        let update = hotel
            .bills
            .update_bill_item(
                dinner.id,
                BillItemUpdate {
                    unit_price: Some(Money::new(dec!(3), Currency::USD)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(update, Err(BillingError::Validation(_))));
        let items = hotel.bills.get_bill_items(booking.id).await.unwrap();
        assert_eq!(items[0].unit_price, inr(dec!(250)));
    }

    #[tokio::test]
    async fn test_unknown_booking_is_not_found() {
        let hotel = Hotel::open().await;
        let result = hotel.bills.calculate_bill(BookingId::new()).await;
        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_config_is_upstream_unavailable() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        hotel.store.set_config_unavailable(true).await;
        let result = hotel.bills.calculate_bill(booking.id).await;
        assert!(matches!(result, Err(BillingError::UpstreamUnavailable(_))));
    }
}

// ============================================================================
// Payments
// ============================================================================

mod payment_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_payment_recognizes_revenue_by_category() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;

        let payment = hotel.pay(booking.id, dec!(2885), PaymentMethod::Upi).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);

        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, BookingPaymentStatus::Paid);
        assert!(stored.paid_at.is_some());

        assert_eq!(hotel.main_balance().await, inr(dec!(2885)));
        let recognized = hotel.ledger.recognized_revenue(booking.id).await.unwrap();
        assert_eq!(recognized.accommodation, inr(dec!(2360)));
        assert_eq!(recognized.food_beverage, inr(dec!(525)));

        let revenue_postings: Vec<_> = hotel
            .store
            .transactions()
            .await
            .into_iter()
            .filter(|t| matches!(t.category, TransactionCategory::Revenue(_)))
            .collect();
        assert_eq!(revenue_postings.len(), 2);
        assert!(revenue_postings.iter().all(|t| t.payment_method == Some(PaymentMethod::Upi)));
    }

    #[tokio::test]
    async fn test_full_payment_updates_every_period_report() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Upi).await.unwrap();

        let paid_at = hotel.store.booking(booking.id).await.unwrap().paid_at.unwrap();
        let day = hotel.settings.timezone.local_date(paid_at);
        for period_type in PeriodType::ALL {
            let report = hotel.store.report(period_type.normalize(day), period_type).await.unwrap();
            assert_eq!(report.total_revenue, inr(dec!(2885)));
            assert_eq!(report.total_revenue, report.categories.total());
            assert_eq!(report.payment_methods.upi, inr(dec!(2885)));
            assert_eq!(report.total_bookings, 1);
            assert_eq!(report.tax_collected, inr(dec!(385)));
            assert_eq!(report.source_counts.get(&BookingSource::Website), Some(&1));
        }

        let jobs = hotel.store.jobs().await;
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.status == OutboxStatus::Done));
    }

    #[tokio::test]
    async fn test_partial_payments_settle_across_methods() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;

        hotel.pay(booking.id, dec!(1000), PaymentMethod::Cash).await.unwrap();
        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, BookingPaymentStatus::PartiallyPaid);
        assert!(hotel.store.transactions().await.is_empty());

        hotel.pay(booking.id, dec!(1885), PaymentMethod::Card).await.unwrap();
        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, BookingPaymentStatus::Paid);

        let day = hotel.settings.timezone.local_date(stored.paid_at.unwrap());
        let report = hotel.store.report(day, PeriodType::Daily).await.unwrap();
        assert_eq!(report.payment_methods.cash, inr(dec!(1000)));
        assert_eq!(report.payment_methods.card, inr(dec!(1885)));
        assert_eq!(report.payment_methods.total(), report.total_revenue);
    }

    #[tokio::test]
    async fn test_payment_without_items_reports_the_room() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        hotel.pay(booking.id, dec!(2360), PaymentMethod::Cash).await.unwrap();

        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.totals.unwrap().total_amount, inr(dec!(2360)));
        let day = hotel.settings.timezone.local_date(stored.paid_at.unwrap());
        let report = hotel.store.report(day, PeriodType::Daily).await.unwrap();
        assert_eq!(report.categories.accommodation, inr(dec!(2360)));
    }

    #[tokio::test]
    async fn test_invalid_payments_touch_nothing() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;

        let zero = hotel.pay(booking.id, dec!(0), PaymentMethod::Cash).await;
        assert!(matches!(zero, Err(BillingError::Validation(_))));

        let dollars = hotel
            .payments
            .process_payment(
                booking.id,
                ProcessPaymentRequest::new(Money::new(dec!(10), Currency::USD), PaymentMethod::Card),
            )
            .await;
        assert!(matches!(dollars, Err(BillingError::Validation(_))));

        assert!(hotel.store.list_payments(booking.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_booking_rejects_payment() {
        let hotel = Hotel::open().await;
        let mut booking = stay(dec!(1000));
        booking.payment_status = BookingPaymentStatus::Cancelled;
        hotel.store.insert_booking(booking.clone()).await;

        let result = hotel.pay(booking.id, dec!(100), PaymentMethod::Cash).await;
        assert!(matches!(result, Err(BillingError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_ledger_outage_marks_payment_failed() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.store.set_ledger_unavailable(true).await;

        let result = hotel.pay(booking.id, dec!(2885), PaymentMethod::Card).await;
        assert!(matches!(result, Err(BillingError::UpstreamUnavailable(_))));

        let payments = hotel.store.list_payments(booking.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, BookingPaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_conflicts_are_retried() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.store.fail_next_commits(2).await;

        hotel.pay(booking.id, dec!(2885), PaymentMethod::Card).await.unwrap();
        assert_eq!(hotel.main_balance().await, inr(dec!(2885)));
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.store.fail_next_commits(10).await;

        let result = hotel.pay(booking.id, dec!(2885), PaymentMethod::Card).await;
        assert!(matches!(result, Err(BillingError::Conflict(_))));
        assert!(hotel.store.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_outage_leaves_jobs_for_the_worker() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.store.set_reports_unavailable(true).await;

        hotel.pay(booking.id, dec!(2885), PaymentMethod::Online).await.unwrap();
        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, BookingPaymentStatus::Paid);

        let jobs = hotel.store.jobs().await;
        assert_eq!(jobs.len(), 3);
        for job in &jobs {
            assert_eq!(job.status, OutboxStatus::Pending);
            assert_eq!(job.attempts, 1);
            assert!(job.last_error.is_some());
        }

        hotel.store.set_reports_unavailable(false).await;
        let summary = hotel
            .runner
            .run_pending(Utc::now() + Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.succeeded, 3);

        let day = hotel.settings.timezone.local_date(stored.paid_at.unwrap());
        let report = hotel.store.report(day, PeriodType::Daily).await.unwrap();
        assert_eq!(report.total_revenue, inr(dec!(2885)));
    }

    #[tokio::test]
    async fn test_jobs_dead_letter_after_max_attempts() {
        let settings = BillingSettings {
            outbox_max_attempts: 2,
            ..Default::default()
        };
        let hotel = Hotel::with_settings(settings).await;
        let booking = hotel.billed().await;
        hotel.store.set_reports_unavailable(true).await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Cash).await.unwrap();

        let summary = hotel
            .runner
            .run_pending(Utc::now() + Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(summary.dead_lettered, 3);
        assert!(hotel.store.jobs().await.iter().all(|j| j.status == OutboxStatus::Dead));
    }

    #[tokio::test]
    async fn test_modify_payment_posts_signed_adjustment() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Upi).await.unwrap();

        let modified = hotel
            .payments
            .modify_payment(booking.id, inr(dec!(2885)), inr(dec!(2800)), "rounded off", "manager")
            .await
            .unwrap();
        assert_eq!(modified.amount, inr(dec!(2800)));
        assert_eq!(modified.original_amount, Some(inr(dec!(2885))));
        assert_eq!(modified.modification_reason.as_deref(), Some("rounded off"));
        assert_eq!(hotel.main_balance().await, inr(dec!(2800)));

        let adjustment = hotel
            .store
            .transactions()
            .await
            .into_iter()
            .find(|t| t.category == TransactionCategory::Adjustment)
            .unwrap();
        assert_eq!(adjustment.transaction_type, TransactionType::Debit);
        assert_eq!(adjustment.amount, inr(dec!(85)));
        assert!(adjustment.is_modification);
        assert_eq!(adjustment.original_amount, Some(inr(dec!(2885))));
    }

    #[tokio::test]
    async fn test_modify_unknown_payment_is_not_found() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(1000), PaymentMethod::Cash).await.unwrap();

        let result = hotel
            .payments
            .modify_payment(booking.id, inr(dec!(999)), inr(dec!(900)), "typo", "manager")
            .await;
        assert!(matches!(result, Err(BillingError::NotFound { .. })));

        let negative = hotel
            .payments
            .modify_payment(booking.id, inr(dec!(1000)), inr(dec!(-1)), "typo", "manager")
            .await;
        assert!(matches!(negative, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_leaving_paid_reverses_recognized_revenue() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Upi).await.unwrap();
        let paid_at = hotel.store.booking(booking.id).await.unwrap().paid_at.unwrap();

        let change = hotel
            .payments
            .change_payment_status(booking.id, BookingPaymentStatus::Cancelled, "manager", Some("guest disputed"))
            .await
            .unwrap();
        let reversed = change.reversed.unwrap();
        assert_eq!(reversed.accommodation, inr(dec!(2360)));
        assert_eq!(reversed.food_beverage, inr(dec!(525)));

        assert!(hotel.main_balance().await.is_zero());
        let main = hotel.ledger.get_or_create_main_account().await.unwrap();
        assert!(hotel.ledger.reconcile_account(main.id).await.unwrap().is_balanced);
        assert!(hotel.ledger.recognized_revenue(booking.id).await.unwrap().is_zero());

        let day = hotel.settings.timezone.local_date(paid_at);
        let report = hotel.store.report(day, PeriodType::Daily).await.unwrap();
        assert!(report.total_revenue.is_zero());
        assert_eq!(report.total_bookings, 0);

        let payments = hotel.store.list_payments(booking.id).await.unwrap();
        assert!(payments.iter().all(|p| p.status == PaymentStatus::Reversed));
        assert_eq!(
            hotel.store.booking(booking.id).await.unwrap().payment_status,
            BookingPaymentStatus::Cancelled
        );

        let again = hotel.pay(booking.id, dec!(10), PaymentMethod::Cash).await;
        assert!(matches!(again, Err(BillingError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_recompute_before_worker_keeps_other_paid_bookings() {
        let settings = BillingSettings {
            apply_revenue_inline: false,
            ..Default::default()
        };
        let hotel = Hotel::with_settings(settings).await;
        let kept = hotel.checked_in().await;
        let reopened = hotel.checked_in().await;
        hotel.pay(kept.id, dec!(2360), PaymentMethod::Cash).await.unwrap();
        hotel.pay(reopened.id, dec!(2360), PaymentMethod::Cash).await.unwrap();
        let paid_at = hotel.store.booking(reopened.id).await.unwrap().paid_at.unwrap();
        let day = hotel.settings.timezone.local_date(paid_at);
        hotel.runner.run_pending(Utc::now(), 50).await.unwrap();

        hotel
            .payments
            .change_payment_status(reopened.id, BookingPaymentStatus::Pending, "manager", Some("charged twice"))
            .await
            .unwrap();
        let recomputed = hotel.revenue.update_revenue_report(day, PeriodType::Daily).await.unwrap();
        assert_eq!(recomputed.total_revenue, inr(dec!(2360)));

        hotel
            .runner
            .run_pending(Utc::now() + Duration::hours(1), 50)
            .await
            .unwrap();
        for period_type in PeriodType::ALL {
            let report = hotel.store.report(period_type.normalize(day), period_type).await.unwrap();
            assert_eq!(report.total_revenue, inr(dec!(2360)));
            assert_eq!(report.total_bookings, 1);
        }
        assert!(hotel.store.jobs().await.iter().all(|j| j.status == OutboxStatus::Done));
    }

    #[tokio::test]
    async fn test_payment_racing_a_settled_booking_recognizes_once() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let racing = hotel.stale_payments(booking.id).await;

        hotel.pay(booking.id, dec!(2885), PaymentMethod::Upi).await.unwrap();
        let late = racing
            .process_payment(booking.id, ProcessPaymentRequest::new(inr(dec!(2885)), PaymentMethod::Card))
            .await;
        assert!(matches!(late, Err(BillingError::Conflict(_))));

        assert_eq!(hotel.main_balance().await, inr(dec!(2885)));
        let recognized = hotel.ledger.recognized_revenue(booking.id).await.unwrap();
        assert_eq!(recognized.total(), inr(dec!(2885)));
        assert_eq!(hotel.revenue_posting_count().await, 2);

        let payments = hotel.store.list_payments(booking.id).await.unwrap();
        let card = payments.iter().find(|p| p.method == PaymentMethod::Card).unwrap();
        assert_eq!(card.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_reversal_racing_a_reversal_reverses_once() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Upi).await.unwrap();
        let racing = hotel.stale_payments(booking.id).await;

        hotel
            .payments
            .change_payment_status(booking.id, BookingPaymentStatus::Pending, "manager", None)
            .await
            .unwrap();
        let late = racing
            .change_payment_status(booking.id, BookingPaymentStatus::Cancelled, "manager", None)
            .await;
        assert!(matches!(late, Err(BillingError::Conflict(_))));

        assert!(hotel.main_balance().await.is_zero());
        assert!(hotel.ledger.recognized_revenue(booking.id).await.unwrap().is_zero());
        assert_eq!(
            hotel.store.booking(booking.id).await.unwrap().payment_status,
            BookingPaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_overdue_refresh_skips_a_booking_paid_meanwhile() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let racing = hotel.stale_payments(booking.id).await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Cash).await.unwrap();

        let marked = racing.refresh_overdue(Utc::now()).await.unwrap();
        assert!(marked.is_empty());
        assert_eq!(
            hotel.store.booking(booking.id).await.unwrap().payment_status,
            BookingPaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_illegal_status_change_is_rejected() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let result = hotel
            .payments
            .change_payment_status(booking.id, BookingPaymentStatus::Refunded, "manager", None)
            .await;
        assert!(matches!(result, Err(BillingError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_manual_mark_paid_recognizes_revenue() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel
            .payments
            .change_payment_status(booking.id, BookingPaymentStatus::Paid, "manager", None)
            .await
            .unwrap();
        assert_eq!(hotel.main_balance().await, inr(dec!(2885)));
    }

    #[tokio::test]
    async fn test_refresh_overdue_skips_settled_bookings() {
        let hotel = Hotel::open().await;
        let unpaid = hotel.billed().await;
        let paid = hotel.billed().await;
        hotel.pay(paid.id, dec!(2885), PaymentMethod::Cash).await.unwrap();

        let marked = hotel.payments.refresh_overdue(Utc::now()).await.unwrap();
        assert_eq!(marked, vec![unpaid.id]);
        assert_eq!(
            hotel.store.booking(unpaid.id).await.unwrap().payment_status,
            BookingPaymentStatus::Overdue
        );
        assert!(hotel.payments.refresh_overdue(Utc::now()).await.unwrap().is_empty());
    }
}

// ============================================================================
// Ledger
// ============================================================================

mod ledger_tests {
    use super::*;

    #[tokio::test]
    async fn test_revenue_round_trip_restores_main_balance() {
        let hotel = Hotel::open().await;
        let before = hotel.main_balance().await;
        let booking_id = BookingId::new();
        let breakdown = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1000)));

        hotel
            .ledger
            .process_payment_revenue(booking_id, inr(dec!(1000)), &breakdown, Some(PaymentMethod::Cash), "desk", None, vec![], None)
            .await
            .unwrap();
        assert_eq!(hotel.main_balance().await, inr(dec!(1000)));

        hotel
            .ledger
            .reverse_payment_revenue(booking_id, inr(dec!(1000)), &breakdown, "desk", vec![], None)
            .await
            .unwrap();
        assert_eq!(hotel.main_balance().await, before);
    }

    #[tokio::test]
    async fn test_stale_status_transition_commits_nothing() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        let breakdown = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1000)));
        let stale = StatusTransition::new(booking.id, BookingPaymentStatus::PartiallyPaid, BookingPaymentStatus::Paid);

        let result = hotel
            .ledger
            .process_payment_revenue(booking.id, inr(dec!(1000)), &breakdown, None, "desk", None, vec![], Some(stale))
            .await;
        assert!(matches!(result, Err(BillingError::Conflict(_))));
        assert!(hotel.main_balance().await.is_zero());
        assert!(hotel.store.transactions().await.is_empty());
        assert_eq!(
            hotel.store.booking(booking.id).await.unwrap().payment_status,
            BookingPaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_status_transition_commits_with_postings() {
        let hotel = Hotel::open().await;
        let booking = hotel.checked_in().await;
        let breakdown = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1000)));
        let paid_at = Utc::now();
        let transition =
            StatusTransition::new(booking.id, BookingPaymentStatus::Pending, BookingPaymentStatus::Paid).paid_at(paid_at);

        hotel
            .ledger
            .process_payment_revenue(booking.id, inr(dec!(1000)), &breakdown, None, "desk", None, vec![], Some(transition))
            .await
            .unwrap();
        let stored = hotel.store.booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, BookingPaymentStatus::Paid);
        assert_eq!(stored.paid_at, Some(paid_at));
        assert_eq!(hotel.main_balance().await, inr(dec!(1000)));
    }

    #[tokio::test]
    async fn test_unallocated_revenue_goes_to_other() {
        let hotel = Hotel::open().await;
        let booking_id = BookingId::new();
        let breakdown = CategoryRevenue::single(RevenueCategory::Spa, inr(dec!(700)));
        hotel
            .ledger
            .process_payment_revenue(booking_id, inr(dec!(1000)), &breakdown, None, "desk", None, vec![], None)
            .await
            .unwrap();

        let recognized = hotel.ledger.recognized_revenue(booking_id).await.unwrap();
        assert_eq!(recognized.spa, inr(dec!(700)));
        assert_eq!(recognized.other, inr(dec!(300)));
    }

    #[tokio::test]
    async fn test_oversized_breakdown_is_rejected() {
        let hotel = Hotel::open().await;
        let breakdown = CategoryRevenue::single(RevenueCategory::Spa, inr(dec!(1200)));
        let result = hotel
            .ledger
            .process_payment_revenue(BookingId::new(), inr(dec!(1000)), &breakdown, None, "desk", None, vec![], None)
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_guest_account_is_credited_when_present() {
        let hotel = Hotel::open().await;
        let guest = user("Asha Rao");
        hotel.store.insert_user(guest.clone()).await;
        let account = hotel.ledger.get_or_create_user_account(guest.id).await.unwrap();

        let breakdown = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(500)));
        hotel
            .ledger
            .process_payment_revenue(BookingId::new(), inr(dec!(500)), &breakdown, None, "desk", Some(guest.id), vec![], None)
            .await
            .unwrap();
        assert_eq!(hotel.store.account(account.id).await.unwrap().balance, inr(dec!(500)));
    }

    #[tokio::test]
    async fn test_transfer_without_funds_changes_nothing() {
        let hotel = Hotel::open().await;
        let a = hotel.account(AccountType::PettyCash, "Front desk float").await;
        let b = hotel.account(AccountType::Current, "Operating").await;
        hotel.ledger.manual_deposit(a.id, inr(dec!(50)), "float", "manager").await.unwrap();

        let result = hotel
            .ledger
            .transfer_between_accounts(a.id, b.id, inr(dec!(100)), "top up", "manager")
            .await;
        assert!(matches!(result, Err(BillingError::InsufficientFunds { .. })));
        assert_eq!(hotel.store.account(a.id).await.unwrap().balance, inr(dec!(50)));
        assert!(hotel.store.account(b.id).await.unwrap().balance.is_zero());
    }

    #[tokio::test]
    async fn test_transfer_moves_both_sides() {
        let hotel = Hotel::open().await;
        let a = hotel.account(AccountType::Current, "Operating").await;
        let b = hotel.account(AccountType::Savings, "Reserve").await;
        hotel.ledger.manual_deposit(a.id, inr(dec!(500)), "opening", "manager").await.unwrap();

        let posted = hotel
            .ledger
            .transfer_between_accounts(a.id, b.id, inr(dec!(200)), "reserve", "manager")
            .await
            .unwrap();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].reference_id, posted[1].reference_id);
        assert_eq!(hotel.store.account(a.id).await.unwrap().balance, inr(dec!(300)));
        assert_eq!(hotel.store.account(b.id).await.unwrap().balance, inr(dec!(200)));

        let same = hotel
            .ledger
            .transfer_between_accounts(a.id, a.id, inr(dec!(1)), "loop", "manager")
            .await;
        assert!(matches!(same, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_overdraft_only_blocked_on_restricted_accounts() {
        let hotel = Hotel::open().await;
        let savings = hotel.account(AccountType::Savings, "Reserve").await;
        let current = hotel.account(AccountType::Current, "Operating").await;
        let debit = |account| Posting::debit(account, inr(dec!(10)), TransactionCategory::Expense, "linen", "manager");

        let blocked = hotel.ledger.post_transaction(debit(savings.id)).await;
        assert!(matches!(blocked, Err(BillingError::InsufficientFunds { .. })));

        hotel.ledger.post_transaction(debit(current.id)).await.unwrap();
        assert_eq!(hotel.store.account(current.id).await.unwrap().balance, inr(dec!(-10)));

        let withdrawal = hotel
            .ledger
            .manual_withdrawal(current.id, inr(dec!(5)), "cash out", "manager")
            .await;
        assert!(matches!(withdrawal, Err(BillingError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn test_staff_credit_by_id_and_by_name() {
        let hotel = Hotel::open().await;
        let ravi = user("Ravi Kumar");
        let namesake = user("Ravi Kumar");
        let meena = user("Meena Iyer");
        for u in [&ravi, &namesake, &meena] {
            hotel.store.insert_user(u.clone()).await;
        }
        let booking_id = BookingId::new();

        let ambiguous = hotel
            .ledger
            .credit_bill_to_staff(inr(dec!(500)), StaffRef::Name("ravi kumar".into()), booking_id, None, None)
            .await;
        assert!(matches!(ambiguous, Err(BillingError::Validation(_))));

        let unknown = hotel
            .ledger
            .credit_bill_to_staff(inr(dec!(500)), StaffRef::Name("Nobody".into()), booking_id, None, None)
            .await;
        assert!(matches!(unknown, Err(BillingError::NotFound { .. })));

        let by_name = hotel
            .ledger
            .credit_bill_to_staff(
                inr(dec!(500)),
                StaffRef::Name("meena iyer".into()),
                booking_id,
                Some(PaymentMethod::Cash),
                None,
            )
            .await
            .unwrap();
        assert_eq!(by_name.user_id, meena.id);
        assert!(by_name.reference.starts_with("STF-"));

        let by_id = hotel
            .ledger
            .credit_bill_to_staff(inr(dec!(300)), StaffRef::Id(ravi.id), booking_id, None, Some("SLIP-7".into()))
            .await
            .unwrap();
        assert_eq!(by_id.reference, "SLIP-7");

        let balance = hotel.ledger.get_user_account_balance(ravi.id).await.unwrap().unwrap();
        assert_eq!(balance.balance, inr(dec!(300)));
        assert!(hotel.ledger.get_user_account_balance(namesake.id).await.unwrap().is_none());
        let missing = hotel.ledger.get_user_account_balance(UserId::new()).await;
        assert!(matches!(missing, Err(BillingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_balances_list_main_account_first() {
        let hotel = Hotel::open().await;
        hotel.account(AccountType::Current, "Alpha").await;
        hotel.ledger.get_or_create_main_account().await.unwrap();

        let balances = hotel.ledger.get_all_account_balances().await.unwrap();
        assert_eq!(balances.len(), 2);
        assert!(balances[0].is_main_account);
        assert_eq!(balances[1].name, "Alpha");
    }

    #[tokio::test]
    async fn test_main_account_is_created_once() {
        let hotel = Hotel::open().await;
        let first = hotel.ledger.get_or_create_main_account().await.unwrap();
        let second = hotel.ledger.get_or_create_main_account().await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_statement_splits_opening_balance() {
        let hotel = Hotel::open().await;
        let account = hotel.account(AccountType::Current, "Operating").await;
        hotel.ledger.manual_deposit(account.id, inr(dec!(100)), "a", "manager").await.unwrap();
        hotel.ledger.manual_deposit(account.id, inr(dec!(40)), "b", "manager").await.unwrap();

        let statement = hotel.ledger.account_statement(account.id, None).await.unwrap();
        assert!(statement.opening_balance.is_zero());
        assert_eq!(statement.total_credits, inr(dec!(140)));
        assert_eq!(statement.closing_balance, inr(dec!(140)));
        assert_eq!(statement.transactions.len(), 2);

        let tomorrow = hotel.settings.timezone.local_date(Utc::now()) + Duration::days(1);
        let later = DateRange::single(tomorrow);
        let statement = hotel.ledger.account_statement(account.id, Some(later)).await.unwrap();
        assert_eq!(statement.opening_balance, inr(dec!(140)));
        assert!(statement.transactions.is_empty());
        assert_eq!(statement.closing_balance, inr(dec!(140)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_balance_is_credits_minus_debits(
            postings in prop::collection::vec((any::<bool>(), 1i64..1_000_000i64), 1..20)
        ) {
            runtime().block_on(async {
                let hotel = Hotel::open().await;
                let account = hotel.account(AccountType::Current, "Operating").await;
                let mut expected = inr(dec!(0));
                for (is_credit, minor) in postings {
                    let amount = Money::from_minor(minor, Currency::INR);
                    let posting = if is_credit {
                        expected = expected + amount;
                        Posting::credit(account.id, amount, TransactionCategory::Deposit, "in", "prop")
                    } else {
                        expected = expected - amount;
                        Posting::debit(account.id, amount, TransactionCategory::Expense, "out", "prop")
                    };
                    hotel.ledger.post_transaction(posting).await.unwrap();

                    let audit = hotel.ledger.reconcile_account(account.id).await.unwrap();
                    assert!(audit.is_balanced);
                    assert_eq!(audit.stored_balance, expected);
                }
            });
        }
    }
}

// ============================================================================
// Revenue reports
// ============================================================================

mod revenue_tests {
    use super::*;

    fn stored_report(date: NaiveDate, accommodation: Decimal) -> RevenuePeriodReport {
        let categories = CategoryRevenue::single(RevenueCategory::Accommodation, inr(accommodation));
        RevenuePeriodReport {
            id: ReportId::new(),
            date,
            period_type: PeriodType::Daily,
            total_revenue: categories.total(),
            categories,
            payment_methods: PaymentMethodTotals::zero(Currency::INR),
            source_counts: BTreeMap::new(),
            total_bookings: 1,
            tax_collected: inr(dec!(0)),
            outstanding_amount: inr(dec!(0)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_growth_is_zero_without_previous_revenue() {
        let hotel = Hotel::open().await;
        let day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        hotel.store.upsert_report(&stored_report(day, dec!(500))).await.unwrap();

        let trends = hotel
            .revenue
            .calculate_trends(DateRange::single(day), PeriodType::Daily)
            .await
            .unwrap();
        assert_eq!(trends.current.total_revenue, inr(dec!(500)));
        assert!(trends.previous.total_revenue.is_zero());
        assert_eq!(trends.revenue_growth, Decimal::ZERO);
        assert_eq!(trends.previous_range.start, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[tokio::test]
    async fn test_growth_against_previous_period() {
        let hotel = Hotel::open().await;
        let june_1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let june_2 = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        hotel.store.upsert_report(&stored_report(june_1, dec!(400))).await.unwrap();
        hotel.store.upsert_report(&stored_report(june_2, dec!(500))).await.unwrap();

        let trends = hotel
            .revenue
            .calculate_trends(DateRange::single(june_2), PeriodType::Daily)
            .await
            .unwrap();
        assert_eq!(trends.revenue_growth, dec!(25));
        assert_eq!(trends.booking_growth, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_clamped_reversal_schedules_recompute() {
        let hotel = Hotel::open().await;
        let day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        hotel.store.upsert_report(&stored_report(day, dec!(100))).await.unwrap();

        let amounts = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(300)));
        let outcome = hotel
            .revenue
            .reverse_revenue_report(day, PeriodType::Daily, &amounts)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.clamped);
        assert_eq!(outcome.applied.accommodation, inr(dec!(100)));

        let report = hotel.store.report(day, PeriodType::Daily).await.unwrap();
        assert!(report.total_revenue.is_zero());

        let jobs = hotel.store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].kind,
            OutboxJobKind::RecomputeReport {
                date: day,
                period_type: PeriodType::Daily
            }
        );
    }

    #[tokio::test]
    async fn test_reversing_missing_report_is_a_no_op() {
        let hotel = Hotel::open().await;
        let amounts = CategoryRevenue::single(RevenueCategory::Spa, inr(dec!(10)));
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let outcome = hotel
            .revenue
            .reverse_revenue_report(day, PeriodType::Yearly, &amounts)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(hotel.store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Card).await.unwrap();
        let day = hotel.settings.timezone.local_date(Utc::now());

        let first = hotel.revenue.update_revenue_report(day, PeriodType::Monthly).await.unwrap();
        let second = hotel.revenue.update_revenue_report(day, PeriodType::Monthly).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.categories, second.categories);
        assert_eq!(first.total_revenue, second.total_revenue);
        assert_eq!(first.total_bookings, second.total_bookings);
    }

    #[tokio::test]
    async fn test_generate_report_over_range() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(2885), PaymentMethod::Card).await.unwrap();
        let day = hotel.settings.timezone.local_date(Utc::now());

        let data = hotel
            .revenue
            .generate_revenue_report(day, day, PeriodType::Daily)
            .await
            .unwrap();
        assert_eq!(data.periods.len(), 1);
        assert_eq!(data.totals.total_revenue, inr(dec!(2885)));
        assert_eq!(data.totals.average_revenue, inr(dec!(2885)));
        assert_eq!(data.trends.current.total_revenue, inr(dec!(2885)));
    }

    #[tokio::test]
    async fn test_generate_report_caps_period_count() {
        let hotel = Hotel::open().await;
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let result = hotel.revenue.generate_revenue_report(start, end, PeriodType::Daily).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }
}

// ============================================================================
// Invoices
// ============================================================================

mod invoice_tests {
    use super::*;

    fn expected_number(hotel: &Hotel, sequence: u32) -> String {
        let today = hotel.settings.timezone.local_date(Utc::now());
        format!("HTL-{}-{:04}", today.format("%Y%m"), sequence)
    }

    #[tokio::test]
    async fn test_invoices_are_numbered_in_sequence() {
        let hotel = Hotel::open().await;
        let first = hotel.billed().await;
        let second = hotel.billed().await;

        let a = hotel.invoices.create_invoice(first.id, "front-desk").await.unwrap();
        let b = hotel.invoices.create_invoice(second.id, "front-desk").await.unwrap();
        assert_eq!(a.invoice_number, expected_number(&hotel, 1));
        assert_eq!(b.invoice_number, expected_number(&hotel, 2));
    }

    #[tokio::test]
    async fn test_create_invoice_is_idempotent_per_booking() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let a = hotel.invoices.create_invoice(booking.id, "front-desk").await.unwrap();
        let b = hotel.invoices.create_invoice(booking.id, "night-audit").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(hotel.store.invoices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_invoices_get_distinct_numbers() {
        let hotel = Hotel::open().await;
        let mut bookings = Vec::new();
        for _ in 0..4 {
            bookings.push(hotel.billed().await);
        }

        let handles: Vec<_> = bookings
            .iter()
            .map(|booking| {
                let invoices = hotel.invoices.clone();
                let id = booking.id;
                tokio::spawn(async move { invoices.create_invoice(id, "front-desk").await })
            })
            .collect();
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap().invoice_number);
        }
        numbers.sort();
        let expected: Vec<String> = (1..=4).map(|n| expected_number(&hotel, n)).collect();
        assert_eq!(numbers, expected);
    }

    #[tokio::test]
    async fn test_invoice_splits_gst_intra_state() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let invoice = hotel.invoices.create_invoice(booking.id, "front-desk").await.unwrap();

        assert_eq!(invoice.total_amount, inr(dec!(2885)));
        assert_eq!(invoice.cgst_amount + invoice.sgst_amount, inr(dec!(385)));
        assert!(invoice.igst_amount.is_zero());
        assert_eq!(invoice.items.len(), 2);
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn test_invoice_uses_igst_inter_state() {
        let settings = BillingSettings {
            inter_state_supply: true,
            ..Default::default()
        };
        let hotel = Hotel::with_settings(settings).await;
        let booking = hotel.billed().await;
        let invoice = hotel.invoices.create_invoice(booking.id, "front-desk").await.unwrap();
        assert_eq!(invoice.igst_amount, inr(dec!(385)));
        assert!(invoice.cgst_amount.is_zero());
        assert!(invoice.sgst_amount.is_zero());
    }

    #[tokio::test]
    async fn test_invoice_payment_and_status_rules() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let invoice = hotel.invoices.create_invoice(booking.id, "front-desk").await.unwrap();

        let partial = hotel.invoices.record_payment(invoice.id, inr(dec!(1000))).await.unwrap();
        assert_eq!(partial.status, InvoiceStatus::PartiallyPaid);
        assert!(partial.paid_date.is_none());

        let paid = hotel.invoices.record_payment(invoice.id, inr(dec!(1885))).await.unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(paid.paid_date.is_some());
        assert!(paid.balance_due().unwrap().is_zero());

        let backwards = hotel.invoices.update_status(invoice.id, InvoiceStatus::Sent, false).await;
        assert!(matches!(backwards, Err(BillingError::InvalidStateTransition { .. })));

        let overridden = hotel
            .invoices
            .update_status(invoice.id, InvoiceStatus::Pending, true)
            .await
            .unwrap();
        assert_eq!(overridden.status, InvoiceStatus::Pending);
        assert!(overridden.paid_date.is_none());
    }
}

// ============================================================================
// Guest billing access
// ============================================================================

mod guest_access_tests {
    use super::*;

    #[tokio::test]
    async fn test_guest_sees_bill_and_views_are_counted() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        hotel.pay(booking.id, dec!(885), PaymentMethod::Upi).await.unwrap();
        let access = hotel.guests.create_guest_billing_access(booking.id).await.unwrap();

        let snapshot = hotel.guests.get_guest_billing_info(&access.token).await.unwrap();
        assert_eq!(snapshot.booking_id, booking.id);
        assert_eq!(snapshot.bill.total_amount, inr(dec!(2885)));
        assert_eq!(snapshot.amount_paid, inr(dec!(885)));
        assert_eq!(snapshot.balance_due, inr(dec!(2000)));
        assert_eq!(snapshot.payment_status, BookingPaymentStatus::PartiallyPaid);
        assert_eq!(snapshot.view_count, 1);

        let again = hotel.guests.get_guest_billing_info(&access.token).await.unwrap();
        assert_eq!(again.view_count, 2);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let access = hotel.guests.create_guest_billing_access(booking.id).await.unwrap();

        let result = hotel
            .guests
            .get_guest_billing_info_at(&access.token, access.expires_at)
            .await;
        assert!(matches!(result, Err(BillingError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_revoked_and_unknown_tokens_are_unauthorized() {
        let hotel = Hotel::open().await;
        let booking = hotel.billed().await;
        let access = hotel.guests.create_guest_billing_access(booking.id).await.unwrap();

        hotel.guests.revoke_guest_billing_access(&access.token).await.unwrap();
        let revoked = hotel.guests.get_guest_billing_info(&access.token).await;
        assert!(matches!(revoked, Err(BillingError::Unauthorized(_))));

        let unknown = hotel.guests.get_guest_billing_info(&"a".repeat(64)).await;
        assert!(matches!(unknown, Err(BillingError::Unauthorized(_))));

        let malformed = hotel.guests.get_guest_billing_info("not-a-token").await;
        assert!(matches!(malformed, Err(BillingError::Unauthorized(_))));

        let revoke_unknown = hotel.guests.revoke_guest_billing_access(&"b".repeat(64)).await;
        assert!(matches!(revoke_unknown, Err(BillingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_access_for_unknown_booking_is_not_found() {
        let hotel = Hotel::open().await;
        let result = hotel.guests.create_guest_billing_access(BookingId::new()).await;
        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }
}
