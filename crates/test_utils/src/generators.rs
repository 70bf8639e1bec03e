//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating random billing data
//! that maintains domain invariants.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::{BookingId, Currency, Money};
use domain_billing::{
    Booking, BookingSource, OtherTax, PaymentMethod, ServiceCategory, TaxConfig,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::builders::TestBookingBuilder;

/// Strategy for generating valid Currency values
pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::INR),
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::AED),
        Just(Currency::JPY),
    ]
}

/// Strategy for generating positive INR amounts up to one lakh
pub fn inr_money_strategy() -> impl Strategy<Value = Money> {
    (1i64..10_000_000i64).prop_map(|paise| Money::from_minor(paise, Currency::INR))
}

/// Strategy for generating INR amounts that may be zero
pub fn inr_non_negative_strategy() -> impl Strategy<Value = Money> {
    (0i64..10_000_000i64).prop_map(|paise| Money::from_minor(paise, Currency::INR))
}

/// Strategy for tax percentages between 0% and 28% in steps of 0.25
pub fn tax_percentage_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=112i64).prop_map(|quarters| Decimal::new(quarters * 25, 2))
}

/// Strategy for enabled tax configurations with up to two extra levies
pub fn tax_config_strategy() -> impl Strategy<Value = TaxConfig> {
    (
        tax_percentage_strategy(),
        tax_percentage_strategy(),
        proptest::collection::vec(tax_percentage_strategy(), 0..=2),
    )
        .prop_map(|(gst, service, others)| TaxConfig {
            gst_percentage: gst,
            service_tax_percentage: service,
            other_taxes: others
                .into_iter()
                .enumerate()
                .map(|(i, percentage)| OtherTax {
                    name: format!("Levy {}", i + 1),
                    percentage,
                    description: None,
                })
                .collect(),
            enabled: true,
        })
}

/// Strategy for item quantities (0.5 to 20 in halves)
pub fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=40i64).prop_map(|halves| Decimal::new(halves * 5, 1))
}

pub fn payment_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::Cash),
        Just(PaymentMethod::Card),
        Just(PaymentMethod::Upi),
        Just(PaymentMethod::BankTransfer),
        Just(PaymentMethod::Online),
        Just(PaymentMethod::Other),
    ]
}

pub fn booking_source_strategy() -> impl Strategy<Value = BookingSource> {
    prop_oneof![
        Just(BookingSource::WalkIn),
        Just(BookingSource::Phone),
        Just(BookingSource::Website),
        Just(BookingSource::Ota),
        Just(BookingSource::Corporate),
        Just(BookingSource::TravelAgent),
        Just(BookingSource::Other),
    ]
}

pub fn service_category_strategy() -> impl Strategy<Value = ServiceCategory> {
    prop_oneof![
        Just(ServiceCategory::Restaurant),
        Just(ServiceCategory::RoomService),
        Just(ServiceCategory::Bar),
        Just(ServiceCategory::Spa),
        Just(ServiceCategory::Transport),
        Just(ServiceCategory::Laundry),
        Just(ServiceCategory::Minibar),
        Just(ServiceCategory::Conference),
        Just(ServiceCategory::Other),
    ]
}

/// Strategy for check-in instants during 2024, on the quarter hour
pub fn check_in_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365i64, 0i64..96i64).prop_map(|(days, quarters)| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(days) + Duration::minutes(quarters * 15)
    })
}

/// Strategy for pending bookings of 1 to 14 nights
pub fn booking_strategy() -> impl Strategy<Value = Booking> {
    (
        check_in_strategy(),
        1i64..=14i64,
        (50_000i64..2_000_000i64),
        booking_source_strategy(),
    )
        .prop_map(|(check_in, nights, rate_paise, source)| {
            TestBookingBuilder::new()
                .with_id(BookingId::new())
                .with_room_price(Money::from_minor(rate_paise, Currency::INR))
                .staying(check_in, nights)
                .with_source(source)
                .build()
        })
}
