//! Booking records as seen by billing
//!
//! Bookings are owned by the reservation side of the application. Billing
//! reads them, and writes back only the recalculated totals and the payment
//! status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BookingId, Money, RoomId, Timezone, UserId};

use crate::error::BillingError;

/// Channel a booking came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    WalkIn,
    Phone,
    Website,
    Ota,
    Corporate,
    TravelAgent,
    Other,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingSource::WalkIn => "walk_in",
            BookingSource::Phone => "phone",
            BookingSource::Website => "website",
            BookingSource::Ota => "ota",
            BookingSource::Corporate => "corporate",
            BookingSource::TravelAgent => "travel_agent",
            BookingSource::Other => "other",
        }
    }
}

impl FromStr for BookingSource {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "walk_in" => Ok(BookingSource::WalkIn),
            "phone" => Ok(BookingSource::Phone),
            "website" => Ok(BookingSource::Website),
            "ota" => Ok(BookingSource::Ota),
            "corporate" => Ok(BookingSource::Corporate),
            "travel_agent" => Ok(BookingSource::TravelAgent),
            "other" => Ok(BookingSource::Other),
            other => Err(BillingError::validation(format!("unknown booking source: {}", other))),
        }
    }
}

/// Payment status of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
}

impl BookingPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPaymentStatus::Pending => "pending",
            BookingPaymentStatus::PartiallyPaid => "partially_paid",
            BookingPaymentStatus::Paid => "paid",
            BookingPaymentStatus::Overdue => "overdue",
            BookingPaymentStatus::Cancelled => "cancelled",
            BookingPaymentStatus::Refunded => "refunded",
        }
    }

    /// Statuses that no longer owe anything
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            BookingPaymentStatus::Paid | BookingPaymentStatus::Cancelled | BookingPaymentStatus::Refunded
        )
    }

    /// Whether a payment event may move a booking from `self` to `next`
    pub fn can_transition_to(&self, next: BookingPaymentStatus) -> bool {
        use BookingPaymentStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Pending, PartiallyPaid | Paid | Overdue | Cancelled) => true,
            (PartiallyPaid, Pending | Paid | Overdue | Cancelled) => true,
            (Overdue, PartiallyPaid | Paid | Cancelled) => true,
            (Paid, Pending | Cancelled | Refunded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BookingPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingPaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingPaymentStatus::Pending),
            "partially_paid" => Ok(BookingPaymentStatus::PartiallyPaid),
            "paid" => Ok(BookingPaymentStatus::Paid),
            "overdue" => Ok(BookingPaymentStatus::Overdue),
            "cancelled" => Ok(BookingPaymentStatus::Cancelled),
            "refunded" => Ok(BookingPaymentStatus::Refunded),
            other => Err(BillingError::validation(format!("unknown payment status: {}", other))),
        }
    }
}

/// Compare-and-set of a booking's payment status
///
/// Applied only while the stored status still equals `expected`; otherwise the
/// write is rejected as a conflict. `paid_at` overwrites the stored time when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub booking_id: BookingId,
    pub expected: BookingPaymentStatus,
    pub next: BookingPaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl StatusTransition {
    pub fn new(booking_id: BookingId, expected: BookingPaymentStatus, next: BookingPaymentStatus) -> Self {
        Self {
            booking_id,
            expected,
            next,
            paid_at: None,
        }
    }

    pub fn paid_at(mut self, at: DateTime<Utc>) -> Self {
        self.paid_at = Some(at);
        self
    }
}

/// Totals persisted on the booking by `BillCalculator::recalculate_booking_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingTotals {
    pub base_amount: Money,
    pub discount_amount: Money,
    pub subtotal: Money,
    pub gst_amount: Money,
    pub service_tax_amount: Money,
    pub other_tax_amount: Money,
    pub total_tax_amount: Money,
    pub total_amount: Money,
}

/// A booking as read by billing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub room_number: String,
    pub room_type: String,
    /// Nightly rate of the room
    pub room_price: Money,
    pub guest_name: String,
    pub guest_user_id: Option<UserId>,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub source: BookingSource,
    /// Negotiated room charge; wins over `room_price * nights` when present
    pub room_base_amount: Option<Money>,
    /// Booking-level discount on the room charge
    pub room_discount: Money,
    pub totals: Option<BookingTotals>,
    pub payment_status: BookingPaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Nights billed: local calendar days between check-in and check-out, at least one
    pub fn nights(&self, tz: &Timezone) -> u32 {
        let days = (tz.local_date(self.check_out) - tz.local_date(self.check_in)).num_days();
        u32::try_from(days.max(1)).unwrap_or(u32::MAX)
    }

    /// Room charge before discount
    pub fn room_charge(&self, tz: &Timezone) -> Money {
        match self.room_base_amount {
            Some(amount) => amount,
            None => self.room_price.multiply(self.nights(tz).into()),
        }
    }

    /// Total persisted by the last recalculation, zero if never calculated
    pub fn total_amount(&self) -> Money {
        self.totals
            .map(|t| t.total_amount)
            .unwrap_or_else(|| Money::zero(self.room_price.currency()))
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.check_out < now
            && !self.payment_status.is_settled()
            && self.payment_status != BookingPaymentStatus::Overdue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn booking(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> Booking {
        Booking {
            id: BookingId::new(),
            room_id: RoomId::new(),
            room_number: "101".into(),
            room_type: "Deluxe".into(),
            room_price: Money::new(dec!(2500), Currency::INR),
            guest_name: "Guest".into(),
            guest_user_id: None,
            check_in,
            check_out,
            source: BookingSource::WalkIn,
            room_base_amount: None,
            room_discount: Money::zero(Currency::INR),
            totals: None,
            payment_status: BookingPaymentStatus::Pending,
            paid_at: None,
            created_at: check_in,
            updated_at: check_in,
        }
    }

    #[test]
    fn test_nights_uses_local_dates() {
        let tz = Timezone::default();
        let b = booking(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 4, 5, 30, 0).unwrap(),
        );
        assert_eq!(b.nights(&tz), 3);
        assert_eq!(b.room_charge(&tz).amount(), dec!(7500));
    }

    #[test]
    fn test_same_day_stay_bills_one_night() {
        let tz = Timezone::default();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
        let b = booking(at, at + chrono::Duration::hours(4));
        assert_eq!(b.nights(&tz), 1);
    }

    #[test]
    fn test_persisted_room_amount_wins() {
        let tz = Timezone::default();
        let mut b = booking(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 3, 5, 30, 0).unwrap(),
        );
        b.room_base_amount = Some(Money::new(dec!(4000), Currency::INR));
        assert_eq!(b.room_charge(&tz).amount(), dec!(4000));
    }

    #[test]
    fn test_status_transitions() {
        use BookingPaymentStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Overdue));
    }
}
