//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for common billing entities.
//! These fixtures are designed to be consistent and predictable for unit tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_kernel::{BookingId, Currency, Money, RoomId, Timezone, UserId};
use domain_billing::{BillingSettings, HotelProfile, HotelService, OtherTax, ServiceCategory, TaxConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Shorthand for an INR amount
    pub fn inr(amount: Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    /// Standard nightly rate of a deluxe room
    pub fn nightly_rate() -> Money {
        Self::inr(dec!(2500.00))
    }

    /// A restaurant bill line
    pub fn dinner() -> Money {
        Self::inr(dec!(450.00))
    }

    pub fn inr_zero() -> Money {
        Money::zero(Currency::INR)
    }

    /// A USD amount for currency mismatch tests
    pub fn usd_100() -> Money {
        Money::new(dec!(100.00), Currency::USD)
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Check-in on 10 June 2024, 14:00 in Kolkata
    pub fn check_in() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap()
    }

    /// Check-out two nights after [`Self::check_in`], 11:00 in Kolkata
    pub fn check_out() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 5, 30, 0).unwrap()
    }

    /// Local business day of the check-out
    pub fn checkout_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
    }

    /// A moment late on the check-out day, after the desk has settled bills
    pub fn evening_of_checkout() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 14, 0, 0).unwrap()
    }

    /// 18:00 UTC on 30 June, 23:30 in Kolkata
    pub fn month_end_late_night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 18, 0, 0).unwrap()
    }

    pub fn kolkata() -> Timezone {
        Timezone::new(chrono_tz::Asia::Kolkata)
    }
}

/// Fixture for identifier test data
pub struct IdFixtures;

impl IdFixtures {
    /// Creates a deterministic booking ID for testing
    pub fn booking_id() -> BookingId {
        BookingId::from_uuid(Uuid::parse_str("6f1c2d9a-0b7e-4c1a-9e55-3a1f00000001").unwrap())
    }

    /// Creates a deterministic room ID for testing
    pub fn room_id() -> RoomId {
        RoomId::from_uuid(Uuid::parse_str("6f1c2d9a-0b7e-4c1a-9e55-3a1f00000002").unwrap())
    }

    /// Creates a deterministic staff user ID for testing
    pub fn staff_id() -> UserId {
        UserId::from_uuid(Uuid::parse_str("6f1c2d9a-0b7e-4c1a-9e55-3a1f00000003").unwrap())
    }
}

/// Fixture for tax configurations
pub struct TaxFixtures;

impl TaxFixtures {
    /// 18% GST only
    pub fn standard() -> TaxConfig {
        TaxConfig::default()
    }

    /// 12% GST, 5% service tax and a 2% luxury levy
    pub fn layered() -> TaxConfig {
        TaxConfig {
            gst_percentage: dec!(12),
            service_tax_percentage: dec!(5),
            other_taxes: vec![OtherTax {
                name: "Luxury Tax".to_string(),
                percentage: dec!(2),
                description: None,
            }],
            enabled: true,
        }
    }

    pub fn disabled() -> TaxConfig {
        TaxConfig::disabled()
    }
}

/// Fixture for hotel-level data
pub struct HotelFixtures;

impl HotelFixtures {
    pub fn profile() -> HotelProfile {
        HotelProfile {
            name: "Hotel Sagar".to_string(),
            gst_number: Some("29ABCDE1234F1Z5".to_string()),
            address: "12 MG Road, Bengaluru".to_string(),
            phone: Some("+91 80 4000 1234".to_string()),
            email: Some("frontdesk@hotelsagar.example".to_string()),
            logo_url: None,
        }
    }

    /// Active restaurant service
    pub fn restaurant() -> HotelService {
        HotelService {
            id: core_kernel::ServiceId::new(),
            name: "Restaurant".to_string(),
            category: ServiceCategory::Restaurant,
            hsn_code: Some("996331".to_string()),
            is_active: true,
        }
    }

    /// Settings of a Kolkata-time hotel billing in INR
    pub fn settings() -> BillingSettings {
        BillingSettings {
            currency: Currency::INR,
            timezone: TemporalFixtures::kolkata(),
            ..BillingSettings::default()
        }
    }
}

/// Fixture for string test data
pub struct StringFixtures;

impl StringFixtures {
    pub fn room_number() -> &'static str {
        "204"
    }

    pub fn room_type() -> &'static str {
        "Deluxe"
    }

    pub fn guest_name() -> &'static str {
        "Asha Rao"
    }

    pub fn staff_name() -> &'static str {
        "Ravi Kumar"
    }
}
