//! Token-gated guest billing view
//!
//! A guest gets a read-only view of their bill through an unguessable token.
//! Tokens expire, can be revoked, and count their views. Every failure to
//! validate a token is reported as `Unauthorized`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use core_kernel::{BookingId, GuestAccessId, Money};

use crate::bill::{BillCalculation, BillCalculator};
use crate::booking::BookingPaymentStatus;
use crate::error::BillingError;
use crate::invoice::HotelProfile;
use crate::payment::{amount_paid, Payment};
use crate::ports::{bounded, BillingPorts};
use crate::settings::BillingSettings;

/// Hex characters in a guest token
pub const TOKEN_LENGTH: usize = 64;

/// A guest's access grant to one booking's bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestBillingAccess {
    pub id: GuestAccessId,
    pub booking_id: BookingId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub view_count: u32,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl GuestBillingAccess {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

/// What a guest sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestBillingSnapshot {
    pub booking_id: BookingId,
    pub guest_name: String,
    pub room_number: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub hotel: HotelProfile,
    pub bill: BillCalculation,
    pub payments: Vec<Payment>,
    pub amount_paid: Money,
    pub balance_due: Money,
    pub payment_status: BookingPaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub view_count: u32,
}

/// 64 lowercase hex characters from two random UUIDs
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_hexdigit())
}

fn rejected() -> BillingError {
    BillingError::Unauthorized("invalid or expired billing link".into())
}

#[derive(Clone)]
pub struct GuestAccessService {
    ports: BillingPorts,
    settings: BillingSettings,
    bills: BillCalculator,
}

impl GuestAccessService {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self {
            bills: BillCalculator::new(ports.clone(), settings.clone()),
            ports,
            settings,
        }
    }

    /// Issues a new token for a booking
    #[instrument(skip(self))]
    pub async fn create_guest_billing_access(&self, booking_id: BookingId) -> Result<GuestBillingAccess, BillingError> {
        let limit = self.settings.operation_timeout;
        bounded(limit, "get_booking", self.ports.bookings.get_booking(booking_id)).await?;
        let now = Utc::now();
        let access = GuestBillingAccess {
            id: GuestAccessId::new_v7(),
            booking_id,
            token: generate_token(),
            expires_at: now + self.settings.guest_token_lifetime(),
            is_active: true,
            view_count: 0,
            last_viewed_at: None,
            created_at: now,
        };
        bounded(limit, "insert_access", self.ports.guest_access.insert_access(&access)).await?;
        info!(expires_at = %access.expires_at, "guest billing access created");
        Ok(access)
    }

    pub async fn get_guest_billing_info(&self, token: &str) -> Result<GuestBillingSnapshot, BillingError> {
        self.get_guest_billing_info_at(token, Utc::now()).await
    }

    /// Validates the token at `now`, records the view and builds the snapshot
    pub async fn get_guest_billing_info_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<GuestBillingSnapshot, BillingError> {
        if !well_formed(token) {
            return Err(rejected());
        }
        let limit = self.settings.operation_timeout;
        let access = bounded(
            limit,
            "find_access_by_token",
            self.ports.guest_access.find_access_by_token(token),
        )
        .await?
        .ok_or_else(rejected)?;
        if !access.is_valid_at(now) {
            warn!(access_id = %access.id, active = access.is_active, "guest billing token rejected");
            return Err(rejected());
        }
        let access = bounded(limit, "record_view", self.ports.guest_access.record_view(token, now)).await?;

        let booking = bounded(limit, "get_booking", self.ports.bookings.get_booking(access.booking_id)).await?;
        let bill = self.bills.calculate_bill(booking.id).await?;
        let hotel = bounded(limit, "hotel_profile", self.ports.hotel.hotel_profile()).await?;
        let payments = bounded(limit, "list_payments", self.ports.payments.list_payments(booking.id)).await?;
        let paid = amount_paid(&payments, bill.total_amount.currency())?;
        let balance_due = bill.total_amount.saturating_sub(&paid)?;

        Ok(GuestBillingSnapshot {
            booking_id: booking.id,
            guest_name: booking.guest_name,
            room_number: booking.room_number,
            check_in: booking.check_in,
            check_out: booking.check_out,
            hotel,
            bill,
            payments,
            amount_paid: paid,
            balance_due,
            payment_status: booking.payment_status,
            expires_at: access.expires_at,
            view_count: access.view_count,
        })
    }

    /// Deactivates a token; later lookups fail as unauthorized
    pub async fn revoke_guest_billing_access(&self, token: &str) -> Result<(), BillingError> {
        if !well_formed(token) {
            return Err(BillingError::not_found("GuestBillingAccess", "token"));
        }
        let limit = self.settings.operation_timeout;
        let access = bounded(
            limit,
            "find_access_by_token",
            self.ports.guest_access.find_access_by_token(token),
        )
        .await?
        .ok_or_else(|| BillingError::not_found("GuestBillingAccess", "token"))?;
        bounded(limit, "deactivate_access", self.ports.guest_access.deactivate_access(token)).await?;
        info!(access_id = %access.id, "guest billing access revoked");
        Ok(())
    }
}
