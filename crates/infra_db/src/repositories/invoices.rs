//! Invoice repository implementation
//!
//! Invoice numbers and bookings are both unique; a second insert for either
//! surfaces as `DatabaseError::DuplicateEntry`, which callers treat as a lost
//! race and retry with a fresh number.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use core_kernel::{BookingId, InvoiceId};
use domain_billing::{HotelProfile, Invoice, InvoiceItem, InvoiceNumberGenerator};

use super::{currency, escape_like, money, parse_column};
use crate::error::DatabaseError;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, invoice_number, booking_id, hotel, guest_name, room_number, issue_date, due_date,
    items, currency, base_amount, discount_amount, cgst_amount, sgst_amount, igst_amount,
    service_tax_amount, other_tax_amount, total_tax_amount, total_amount, amount_paid,
    status, paid_date, created_by, created_at, updated_at
"#;

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub booking_id: Uuid,
    pub hotel: Json<HotelProfile>,
    pub guest_name: String,
    pub room_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Json<Vec<InvoiceItem>>,
    pub currency: String,
    pub base_amount: Decimal,
    pub discount_amount: Decimal,
    pub cgst_amount: Decimal,
    pub sgst_amount: Decimal,
    pub igst_amount: Decimal,
    pub service_tax_amount: Decimal,
    pub other_tax_amount: Decimal,
    pub total_tax_amount: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub status: String,
    pub paid_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DatabaseError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let ccy = currency(&row.currency)?;
        Ok(Invoice {
            id: InvoiceId::from(row.invoice_id),
            invoice_number: row.invoice_number,
            booking_id: BookingId::from(row.booking_id),
            hotel: row.hotel.0,
            guest_name: row.guest_name,
            room_number: row.room_number,
            issue_date: row.issue_date,
            due_date: row.due_date,
            items: row.items.0,
            base_amount: money(row.base_amount, ccy),
            discount_amount: money(row.discount_amount, ccy),
            cgst_amount: money(row.cgst_amount, ccy),
            sgst_amount: money(row.sgst_amount, ccy),
            igst_amount: money(row.igst_amount, ccy),
            service_tax_amount: money(row.service_tax_amount, ccy),
            other_tax_amount: money(row.other_tax_amount, ccy),
            total_tax_amount: money(row.total_tax_amount, ccy),
            total_amount: money(row.total_amount, ccy),
            amount_paid: money(row.amount_paid, ccy),
            status: parse_column("status", &row.status)?,
            paid_date: row.paid_date,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for GST invoices
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_booking(&self, booking_id: BookingId) -> Result<Option<Invoice>, DatabaseError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE booking_id = $1");
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(Uuid::from(booking_id))
            .fetch_optional(&self.pool)
            .await?
            .map(Invoice::try_from)
            .transpose()
    }

    pub async fn get(&self, id: InvoiceId) -> Result<Invoice, DatabaseError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1");
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Invoice", id))?
            .try_into()
    }

    /// Highest sequence issued for `prefix` in `year_month` (`YYYYMM`)
    ///
    /// Numbers that do not parse are ignored. The prefix is matched literally,
    /// so `_` or `%` in a configured prefix are not wildcards.
    pub async fn max_sequence(&self, prefix: &str, year_month: &str) -> Result<Option<u32>, DatabaseError> {
        let numbers: Vec<String> =
            sqlx::query_scalar(r"SELECT invoice_number FROM invoices WHERE invoice_number LIKE $1 ESCAPE '\'")
                .bind(format!("{}-{year_month}-%", escape_like(prefix)))
                .fetch_all(&self.pool)
                .await?;

        Ok(numbers
            .iter()
            .filter_map(|n| InvoiceNumberGenerator::parse(n).ok())
            .filter(|n| n.prefix == prefix && n.year_month() == year_month)
            .map(|n| n.sequence)
            .max())
    }

    /// Inserts an invoice
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::DuplicateEntry` if the number or the booking
    /// already has an invoice
    pub async fn insert(&self, invoice: &Invoice) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO invoices ({INVOICE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                     $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(invoice.id))
            .bind(&invoice.invoice_number)
            .bind(Uuid::from(invoice.booking_id))
            .bind(Json(&invoice.hotel))
            .bind(&invoice.guest_name)
            .bind(&invoice.room_number)
            .bind(invoice.issue_date)
            .bind(invoice.due_date)
            .bind(Json(&invoice.items))
            .bind(invoice.total_amount.currency().code())
            .bind(invoice.base_amount.amount())
            .bind(invoice.discount_amount.amount())
            .bind(invoice.cgst_amount.amount())
            .bind(invoice.sgst_amount.amount())
            .bind(invoice.igst_amount.amount())
            .bind(invoice.service_tax_amount.amount())
            .bind(invoice.other_tax_amount.amount())
            .bind(invoice.total_tax_amount.amount())
            .bind(invoice.total_amount.amount())
            .bind(invoice.amount_paid.amount())
            .bind(invoice.status.as_str())
            .bind(invoice.paid_date)
            .bind(&invoice.created_by)
            .bind(invoice.created_at)
            .bind(invoice.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes the mutable part of an invoice: payment and status
    pub async fn update(&self, invoice: &Invoice) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid = $2, status = $3, paid_date = $4, due_date = $5, updated_at = $6
            WHERE invoice_id = $1
            "#,
        )
        .bind(Uuid::from(invoice.id))
        .bind(invoice.amount_paid.amount())
        .bind(invoice.status.as_str())
        .bind(invoice.paid_date)
        .bind(invoice.due_date)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Invoice", invoice.id));
        }
        Ok(())
    }
}
