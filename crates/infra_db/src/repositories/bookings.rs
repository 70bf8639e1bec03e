//! Booking repository implementation
//!
//! Bookings are owned by the reservation side of the hotel; billing reads them
//! and writes back only the derived totals and the payment status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use core_kernel::{BookingId, Currency, Money, RoomId, UserId};
use domain_billing::{Booking, BookingPaymentStatus, BookingTotals, StatusTransition};

use super::{currency, money, optional_money, parse_column};
use crate::error::DatabaseError;

const BOOKING_COLUMNS: &str = r#"
    b.booking_id, b.room_id, b.room_number, b.room_type, b.room_price, b.currency,
    b.guest_name, b.guest_user_id, b.check_in, b.check_out, b.source,
    b.room_base_amount, b.room_discount,
    b.base_amount, b.discount_amount, b.subtotal, b.gst_amount, b.service_tax_amount,
    b.other_tax_amount, b.total_tax_amount, b.total_amount,
    b.payment_status, b.paid_at, b.created_at, b.updated_at
"#;

/// Result of a compare-and-set status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The booking holds another status
    Stale(BookingPaymentStatus),
    Missing,
}

/// Database row for a booking
#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    pub booking_id: Uuid,
    pub room_id: Uuid,
    pub room_number: String,
    pub room_type: String,
    pub room_price: Decimal,
    pub currency: String,
    pub guest_name: String,
    pub guest_user_id: Option<Uuid>,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub source: String,
    pub room_base_amount: Option<Decimal>,
    pub room_discount: Decimal,
    pub base_amount: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub gst_amount: Option<Decimal>,
    pub service_tax_amount: Option<Decimal>,
    pub other_tax_amount: Option<Decimal>,
    pub total_tax_amount: Option<Decimal>,
    pub total_amount: Option<Decimal>,
    pub payment_status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = DatabaseError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let ccy = currency(&row.currency)?;
        // Totals exist only once the bill has been calculated, and then as a whole
        let totals = match (
            row.base_amount,
            row.discount_amount,
            row.subtotal,
            row.gst_amount,
            row.service_tax_amount,
            row.other_tax_amount,
            row.total_tax_amount,
            row.total_amount,
        ) {
            (Some(base), Some(discount), Some(subtotal), Some(gst), Some(service), Some(other), Some(tax), Some(total)) => {
                Some(BookingTotals {
                    base_amount: money(base, ccy),
                    discount_amount: money(discount, ccy),
                    subtotal: money(subtotal, ccy),
                    gst_amount: money(gst, ccy),
                    service_tax_amount: money(service, ccy),
                    other_tax_amount: money(other, ccy),
                    total_tax_amount: money(tax, ccy),
                    total_amount: money(total, ccy),
                })
            }
            _ => None,
        };

        Ok(Booking {
            id: BookingId::from(row.booking_id),
            room_id: RoomId::from(row.room_id),
            room_number: row.room_number,
            room_type: row.room_type,
            room_price: money(row.room_price, ccy),
            guest_name: row.guest_name,
            guest_user_id: row.guest_user_id.map(UserId::from),
            check_in: row.check_in,
            check_out: row.check_out,
            source: parse_column("source", &row.source)?,
            room_base_amount: optional_money(row.room_base_amount, ccy),
            room_discount: money(row.room_discount, ccy),
            totals,
            payment_status: parse_column("payment_status", &row.payment_status)?,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A booking together with the sum of its completed payments
#[derive(Debug, Clone, FromRow)]
struct BookingWithPaidRow {
    #[sqlx(flatten)]
    booking: BookingRow,
    paid: Decimal,
}

/// Repository for bookings as seen by billing
#[derive(Debug, Clone)]
pub struct BookingRepository {
    pool: PgPool,
}

impl BookingRepository {
    /// Creates a new BookingRepository with the given connection pool
    ///
    /// # Arguments
    ///
    /// * `pool` - The PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Retrieves a booking by its identifier
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if the booking does not exist
    pub async fn get(&self, id: BookingId) -> Result<Booking, DatabaseError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings b WHERE b.booking_id = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Booking", id))?;
        row.try_into()
    }

    /// Inserts a booking
    ///
    /// Bookings are created by reservations; this exists for seeding and tests.
    pub async fn insert(&self, booking: &Booking) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (
                booking_id, room_id, room_number, room_type, room_price, currency,
                guest_name, guest_user_id, check_in, check_out, source,
                room_base_amount, room_discount, payment_status, paid_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(Uuid::from(booking.id))
        .bind(Uuid::from(booking.room_id))
        .bind(&booking.room_number)
        .bind(&booking.room_type)
        .bind(booking.room_price.amount())
        .bind(booking.room_price.currency().code())
        .bind(&booking.guest_name)
        .bind(booking.guest_user_id.map(Uuid::from))
        .bind(booking.check_in)
        .bind(booking.check_out)
        .bind(booking.source.as_str())
        .bind(booking.room_base_amount.map(|m| m.amount()))
        .bind(booking.room_discount.amount())
        .bind(booking.payment_status.as_str())
        .bind(booking.paid_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;

        if let Some(totals) = &booking.totals {
            self.update_totals(booking.id, totals).await?;
        }
        Ok(())
    }

    /// Overwrites the derived totals of a booking
    ///
    /// # Arguments
    ///
    /// * `id` - The booking identifier
    /// * `totals` - Totals produced by the bill calculation
    pub async fn update_totals(&self, id: BookingId, totals: &BookingTotals) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET base_amount = $2, discount_amount = $3, subtotal = $4, gst_amount = $5,
                service_tax_amount = $6, other_tax_amount = $7, total_tax_amount = $8,
                total_amount = $9, updated_at = now()
            WHERE booking_id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(totals.base_amount.amount())
        .bind(totals.discount_amount.amount())
        .bind(totals.subtotal.amount())
        .bind(totals.gst_amount.amount())
        .bind(totals.service_tax_amount.amount())
        .bind(totals.other_tax_amount.amount())
        .bind(totals.total_tax_amount.amount())
        .bind(totals.total_amount.amount())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Booking", id));
        }
        Ok(())
    }

    /// Compare-and-set of the payment status on `conn`
    ///
    /// Writes `transition.next` only while the row still holds
    /// `transition.expected`, keeping the previous `paid_at` when none is given.
    /// Under READ COMMITTED a concurrent writer holding the row makes this wait
    /// and then re-check the condition against the committed status.
    pub async fn transition_status(
        conn: &mut PgConnection,
        transition: &StatusTransition,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET payment_status = $3, paid_at = COALESCE($4, paid_at), updated_at = now()
            WHERE booking_id = $1 AND payment_status = $2
            "#,
        )
        .bind(Uuid::from(transition.booking_id))
        .bind(transition.expected.as_str())
        .bind(transition.next.as_str())
        .bind(transition.paid_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(TransitionOutcome::Applied);
        }
        let current: Option<String> = sqlx::query_scalar("SELECT payment_status FROM bookings WHERE booking_id = $1")
            .bind(Uuid::from(transition.booking_id))
            .fetch_optional(&mut *conn)
            .await?;
        match current {
            None => Ok(TransitionOutcome::Missing),
            Some(status) => Ok(TransitionOutcome::Stale(parse_column("payment_status", &status)?)),
        }
    }

    /// Sets the payment status if it still holds the expected value
    ///
    /// # Errors
    ///
    /// - `DatabaseError::NotFound` when the booking does not exist
    /// - `DatabaseError::SerializationConflict` when the status has moved on
    pub async fn set_payment_status(&self, transition: &StatusTransition) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        match Self::transition_status(&mut conn, transition).await? {
            TransitionOutcome::Applied => Ok(()),
            TransitionOutcome::Missing => Err(DatabaseError::not_found("Booking", transition.booking_id)),
            TransitionOutcome::Stale(actual) => Err(DatabaseError::SerializationConflict(format!(
                "booking {} is {}, expected {}",
                transition.booking_id, actual, transition.expected
            ))),
        }
    }

    /// Bookings checked out before `now` that still owe money and are not yet overdue
    pub async fn overdue_candidates(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, DatabaseError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT booking_id FROM bookings
            WHERE check_out < $1 AND payment_status IN ('pending', 'partially_paid')
            ORDER BY booking_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(BookingId::from).collect())
    }

    /// Bookings whose transition into `paid` happened in `[from, to)`
    pub async fn paid_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Booking>, DatabaseError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings b
             WHERE b.payment_status = 'paid' AND b.paid_at >= $1 AND b.paid_at < $2
             ORDER BY b.booking_id"
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    /// Amount still owed by unsettled bookings checked in during `[from, to)`
    ///
    /// Each booking contributes its stored total less its completed payments,
    /// floored at zero.
    pub async fn outstanding_balance(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        currency: Currency,
    ) -> Result<Money, DatabaseError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS},
                    COALESCE((SELECT SUM(p.amount) FROM payments p
                              WHERE p.booking_id = b.booking_id AND p.status = 'completed'), 0) AS paid
             FROM bookings b
             WHERE b.payment_status NOT IN ('paid', 'cancelled', 'refunded')
               AND b.check_in >= $1 AND b.check_in < $2"
        );
        let rows = sqlx::query_as::<_, BookingWithPaidRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        let mut outstanding = Money::zero(currency);
        for row in rows {
            let booking = Booking::try_from(row.booking)?;
            let total = booking.total_amount();
            let paid = money(row.paid, total.currency());
            outstanding = total
                .saturating_sub(&paid)
                .and_then(|due| outstanding.checked_add(&due))
                .map_err(|e| DatabaseError::decode("total_amount", e))?;
        }
        Ok(outstanding)
    }
}
