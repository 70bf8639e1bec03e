//! Payment repository implementation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use core_kernel::{BookingId, PaymentId};
use domain_billing::Payment;

use super::{currency, money, optional_money, parse_column};
use crate::error::DatabaseError;

const PAYMENT_COLUMNS: &str = r#"
    payment_id, booking_id, amount, currency, method, reference, received_by, notes, status,
    paid_at, original_amount, modification_reason, created_at, updated_at
"#;

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub reference: Option<String>,
    pub received_by: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub paid_at: DateTime<Utc>,
    pub original_amount: Option<Decimal>,
    pub modification_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let ccy = currency(&row.currency)?;
        Ok(Payment {
            id: PaymentId::from(row.payment_id),
            booking_id: BookingId::from(row.booking_id),
            amount: money(row.amount, ccy),
            method: parse_column("method", &row.method)?,
            reference: row.reference,
            received_by: row.received_by,
            notes: row.notes,
            status: parse_column("status", &row.status)?,
            paid_at: row.paid_at,
            original_amount: optional_money(row.original_amount, ccy),
            modification_reason: row.modification_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for guest payments
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, payment: &Payment) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(payment.id))
            .bind(Uuid::from(payment.booking_id))
            .bind(payment.amount.amount())
            .bind(payment.amount.currency().code())
            .bind(payment.method.as_str())
            .bind(&payment.reference)
            .bind(&payment.received_by)
            .bind(&payment.notes)
            .bind(payment.status.as_str())
            .bind(payment.paid_at)
            .bind(payment.original_amount.map(|m| m.amount()))
            .bind(&payment.modification_reason)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes the fields a payment may change after it is recorded
    pub async fn update(&self, payment: &Payment) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET amount = $2, status = $3, notes = $4, original_amount = $5,
                modification_reason = $6, updated_at = $7
            WHERE payment_id = $1
            "#,
        )
        .bind(Uuid::from(payment.id))
        .bind(payment.amount.amount())
        .bind(payment.status.as_str())
        .bind(&payment.notes)
        .bind(payment.original_amount.map(|m| m.amount()))
        .bind(&payment.modification_reason)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Payment", payment.id));
        }
        Ok(())
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment, DatabaseError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?
            .try_into()
    }

    /// Payments of a booking in the order they were received
    pub async fn list_for_booking(&self, booking_id: BookingId) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1 ORDER BY paid_at, payment_id");
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::from(booking_id))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Payment::try_from).collect()
    }
}
