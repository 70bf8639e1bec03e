//! PostgreSQL store integration tests
//!
//! Each test starts its own container; run with `cargo test -- --ignored`
//! on a machine with Docker.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal_macros::dec;

use core_kernel::{Currency, InvoiceId, Money, PeriodType, ReportId};
use domain_billing::ports::{
    BookingPort, GuestAccessPort, InvoicePort, LedgerPort, OutboxPort, PaymentPort, RevenueReportPort, UserPort,
};
use domain_billing::{
    Account, AccountType, BillingPorts, BookingPaymentStatus, CategoryRevenue, GuestAccessService, InvoiceService,
    LedgerCommitError, LedgerService, OutboxJob, OutboxJobKind, OutboxStatus, PaymentMethod, PaymentService, Posting,
    PostingBatch, ProcessPaymentRequest, RevenueCategory, RevenuePeriodReport, StatusTransition, TransactionCategory,
};
use infra_db::PostgresBillingStore;
use test_utils::{
    assert_balance_matches_transactions, assert_money_eq, create_isolated_test_database, HotelFixtures,
    MoneyFixtures, TestBookingBuilder, TestDatabase, TestUserBuilder,
};

async fn setup() -> (TestDatabase, Arc<PostgresBillingStore>) {
    let db = create_isolated_test_database()
        .await
        .expect("Failed to create test database");
    let store = Arc::new(db.store());
    (db, store)
}

fn inr(amount: rust_decimal::Decimal) -> Money {
    MoneyFixtures::inr(amount)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_commit_batch_moves_balance_and_enqueues_jobs() {
    let (_db, store) = setup().await;
    let now = Utc::now();

    let main = store
        .ensure_main_account(&Account::main("Hotel Main Account", Currency::INR, now))
        .await
        .unwrap();
    let job = OutboxJob::new(
        OutboxJobKind::RecomputeReport {
            date: now.date_naive(),
            period_type: PeriodType::Daily,
        },
        now,
    );
    let batch = PostingBatch::new(now)
        .post(Posting::credit(main.id, inr(dec!(500)), TransactionCategory::Deposit, "Float", "manager"))
        .with_jobs(vec![job]);

    let transactions = store.commit_batch(batch).await.unwrap();
    assert_eq!(transactions.len(), 1);

    let main = store.get_account(main.id).await.unwrap();
    assert_money_eq(&main.balance, dec!(500));
    let stored = store.account_transactions(main.id).await.unwrap();
    assert_balance_matches_transactions(&main, &stored);

    let pending = store.list_jobs(OutboxStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_restricted_account_rejects_overdraft_without_side_effects() {
    let (_db, store) = setup().await;
    let now = Utc::now();

    let savings = Account::new("Reserve", AccountType::Savings, Currency::INR, now);
    store.create_account(&savings).await.unwrap();

    let batch = PostingBatch::new(now).post(Posting::debit(
        savings.id,
        inr(dec!(100)),
        TransactionCategory::Withdrawal,
        "Cash out",
        "manager",
    ));

    let err = store.commit_batch(batch).await.unwrap_err();
    assert!(matches!(err, LedgerCommitError::InsufficientFunds { .. }));

    let savings = store.get_account(savings.id).await.unwrap();
    assert!(savings.balance.is_zero());
    assert!(store.account_transactions(savings.id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stale_status_transition_rolls_back_the_batch() {
    let (_db, store) = setup().await;
    let now = Utc::now();
    let booking = TestBookingBuilder::new().build();
    store.booking_repository().insert(&booking).await.unwrap();
    let main = store
        .ensure_main_account(&Account::main("Hotel Main Account", Currency::INR, now))
        .await
        .unwrap();

    let stale = StatusTransition::new(booking.id, BookingPaymentStatus::Paid, BookingPaymentStatus::Cancelled);
    let batch = PostingBatch::new(now)
        .post(Posting::credit(main.id, inr(dec!(500)), TransactionCategory::Deposit, "Float", "manager"))
        .with_status_transition(stale);
    let err = store.commit_batch(batch).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerCommitError::StaleStatus {
            actual: BookingPaymentStatus::Pending,
            ..
        }
    ));
    assert!(store.get_account(main.id).await.unwrap().balance.is_zero());
    assert!(store.account_transactions(main.id).await.unwrap().is_empty());

    let partial = StatusTransition::new(booking.id, BookingPaymentStatus::Pending, BookingPaymentStatus::PartiallyPaid);
    store.set_payment_status(&partial).await.unwrap();
    let err = store.set_payment_status(&partial).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(
        store.get_booking(booking.id).await.unwrap().payment_status,
        BookingPaymentStatus::PartiallyPaid
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_ensure_main_account_is_idempotent() {
    let (_db, store) = setup().await;
    let now = Utc::now();

    let first = store
        .ensure_main_account(&Account::main("Main", Currency::INR, now))
        .await
        .unwrap();
    let second = store
        .ensure_main_account(&Account::main("Main again", Currency::INR, now))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(store.list_accounts(true).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_claim_due_leases_jobs_once() {
    let (_db, store) = setup().await;
    let now = Utc::now();
    let date = now.date_naive();

    let mut jobs = OutboxJob::recompute_all(date, now);
    let mut later = OutboxJob::new(
        OutboxJobKind::RecomputeReport {
            date,
            period_type: PeriodType::Yearly,
        },
        now,
    );
    later.next_attempt_at = now + Duration::hours(1);
    let due = jobs.len();
    jobs.push(later);
    store.enqueue(&jobs).await.unwrap();

    let lease_until = now + Duration::seconds(30);
    let claimed = store.claim_due(now, lease_until, 50).await.unwrap();
    assert_eq!(claimed.len(), due);
    assert!(claimed.iter().all(|j| j.status == OutboxStatus::Running));

    let again = store.claim_due(now, lease_until, 50).await.unwrap();
    assert!(again.is_empty());

    store.mark_done(claimed[0].id, now).await.unwrap();
    assert_eq!(store.list_jobs(OutboxStatus::Done).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_report_upsert_keeps_identity_and_reverse_clamps() {
    let (_db, store) = setup().await;
    let now = Utc::now();
    let date = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();

    let mut report = RevenuePeriodReport::compute(
        date,
        PeriodType::Daily,
        &[],
        Money::zero(Currency::INR),
        Currency::INR,
        now,
    )
    .unwrap();
    report.categories = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1000)));
    report.total_revenue = inr(dec!(1000));
    report.total_bookings = 1;

    let stored = store.upsert_report(&report).await.unwrap();
    let replacement = RevenuePeriodReport {
        id: ReportId::new_v7(),
        ..report.clone()
    };
    let restored = store.upsert_report(&replacement).await.unwrap();
    assert_eq!(stored.id, restored.id);

    let amounts = CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1500)));
    let outcome = store
        .reverse_report(date, PeriodType::Daily, &amounts)
        .await
        .unwrap()
        .expect("report exists");
    assert!(outcome.clamped);
    assert_money_eq(&outcome.applied.accommodation, dec!(1000));

    let after = store.get_report(date, PeriodType::Daily).await.unwrap().unwrap();
    assert!(after.total_revenue.is_zero());
    assert_eq!(after.total_bookings, 0);

    let missing = store
        .reverse_report(date, PeriodType::Monthly, &amounts)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_full_payment_marks_booking_paid_and_credits_main_account() {
    let (_db, store) = setup().await;
    let booking = TestBookingBuilder::new().build();
    store.booking_repository().insert(&booking).await.unwrap();

    let ports = BillingPorts::from_store(store.clone());
    let settings = HotelFixtures::settings();
    let payments = PaymentService::new(ports.clone(), settings.clone());
    let ledger = LedgerService::new(ports, settings);

    let payment = payments
        .process_payment(booking.id, ProcessPaymentRequest::new(inr(dec!(5900)), PaymentMethod::Upi))
        .await
        .unwrap();
    assert!(payment.is_completed());

    let booking = store.get_booking(booking.id).await.unwrap();
    assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);
    assert!(booking.paid_at.is_some());
    assert_eq!(store.list_payments(booking.id).await.unwrap().len(), 1);

    let main = store.find_main_account().await.unwrap().expect("main account created");
    assert_money_eq(&main.balance, dec!(5900));
    let reconciliation = ledger.reconcile_account(main.id).await.unwrap();
    assert!(reconciliation.is_balanced);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_invoice_number_collision_is_a_conflict() {
    let (_db, store) = setup().await;
    let first = TestBookingBuilder::new().build();
    let second = TestBookingBuilder::new().with_room_number("305").build();
    store.booking_repository().insert(&first).await.unwrap();
    store.booking_repository().insert(&second).await.unwrap();
    store.hotel_repository().save_hotel_profile(&HotelFixtures::profile()).await.unwrap();

    let invoices = InvoiceService::new(BillingPorts::from_store(store.clone()), HotelFixtures::settings());
    let invoice = invoices.create_invoice(first.id, "front-desk").await.unwrap();
    let again = invoices.create_invoice(first.id, "front-desk").await.unwrap();
    assert_eq!(invoice.id, again.id);

    let clash = domain_billing::Invoice {
        id: InvoiceId::new_v7(),
        booking_id: second.id,
        ..invoice.clone()
    };
    let err = store.insert_invoice(&clash).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_guest_views_are_counted() {
    let (_db, store) = setup().await;
    let booking = TestBookingBuilder::new().build();
    store.booking_repository().insert(&booking).await.unwrap();

    let guests = GuestAccessService::new(BillingPorts::from_store(store.clone()), HotelFixtures::settings());
    let access = guests.create_guest_billing_access(booking.id).await.unwrap();

    let viewed = store.record_view(&access.token, Utc::now()).await.unwrap();
    let viewed = store.record_view(&viewed.token, Utc::now()).await.unwrap();
    assert_eq!(viewed.view_count, 2);
    assert!(viewed.last_viewed_at.is_some());

    store.deactivate_access(&access.token).await.unwrap();
    let stored = store.find_access_by_token(&access.token).await.unwrap().unwrap();
    assert!(!stored.is_active);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_user_lookup_by_name_ignores_case_and_inactive_users() {
    let (_db, store) = setup().await;
    let active = TestUserBuilder::new().named("Ravi Kumar").build();
    let retired = TestUserBuilder::new().named("ravi kumar").inactive().build();
    store.hotel_repository().insert_user(&active).await.unwrap();
    store.hotel_repository().insert_user(&retired).await.unwrap();

    let found = store.find_users_by_name("  RAVI KUMAR ").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, active.id);
    assert_eq!(store.get_user(active.id).await.unwrap().name, "Ravi Kumar");
}
