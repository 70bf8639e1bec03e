//! Bill item and service catalog repository

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use core_kernel::{BillItemId, BookingId, ServiceId};
use domain_billing::{BillItem, HotelService};

use super::{currency, money, parse_column, parse_optional};
use crate::error::DatabaseError;

const ITEM_COLUMNS: &str = r#"
    bill_item_id, booking_id, service_id, service_category, item_name, quantity,
    unit_price, discount, currency, gst_applicable, gst_percentage, hsn_code,
    total_price, tax_amount, final_amount, created_at, updated_at
"#;

/// Database row for a bill item
#[derive(Debug, Clone, FromRow)]
pub struct BillItemRow {
    pub bill_item_id: Uuid,
    pub booking_id: Uuid,
    pub service_id: Option<Uuid>,
    pub service_category: Option<String>,
    pub item_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub currency: String,
    pub gst_applicable: bool,
    pub gst_percentage: Option<Decimal>,
    pub hsn_code: Option<String>,
    pub total_price: Decimal,
    pub tax_amount: Decimal,
    pub final_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BillItemRow> for BillItem {
    type Error = DatabaseError;

    fn try_from(row: BillItemRow) -> Result<Self, Self::Error> {
        let ccy = currency(&row.currency)?;
        Ok(BillItem {
            id: BillItemId::from(row.bill_item_id),
            booking_id: BookingId::from(row.booking_id),
            service_id: row.service_id.map(ServiceId::from),
            service_category: parse_optional("service_category", row.service_category.as_deref())?,
            item_name: row.item_name,
            quantity: row.quantity,
            unit_price: money(row.unit_price, ccy),
            discount: money(row.discount, ccy),
            gst_applicable: row.gst_applicable,
            gst_percentage: row.gst_percentage,
            hsn_code: row.hsn_code,
            total_price: money(row.total_price, ccy),
            tax_amount: money(row.tax_amount, ccy),
            final_amount: money(row.final_amount, ccy),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row for a hotel service
#[derive(Debug, Clone, FromRow)]
pub struct ServiceRow {
    pub service_id: Uuid,
    pub name: String,
    pub category: String,
    pub hsn_code: Option<String>,
    pub is_active: bool,
}

impl TryFrom<ServiceRow> for HotelService {
    type Error = DatabaseError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(HotelService {
            id: ServiceId::from(row.service_id),
            name: row.name,
            category: parse_column("category", &row.category)?,
            hsn_code: row.hsn_code,
            is_active: row.is_active,
        })
    }
}

/// Repository for bill items and the services they reference
#[derive(Debug, Clone)]
pub struct BillItemRepository {
    pool: PgPool,
}

impl BillItemRepository {
    /// Creates a new BillItemRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lists a booking's items in insertion order
    pub async fn list_for_booking(&self, booking_id: BookingId) -> Result<Vec<BillItem>, DatabaseError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM bill_items WHERE booking_id = $1 ORDER BY created_at, bill_item_id"
        );
        let rows = sqlx::query_as::<_, BillItemRow>(&sql)
            .bind(Uuid::from(booking_id))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(BillItem::try_from).collect()
    }

    pub async fn get(&self, id: BillItemId) -> Result<BillItem, DatabaseError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM bill_items WHERE bill_item_id = $1");
        sqlx::query_as::<_, BillItemRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("BillItem", id))?
            .try_into()
    }

    /// Inserts an item
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` when the booking does not exist
    pub async fn insert(&self, item: &BillItem) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO bill_items (
                bill_item_id, booking_id, service_id, service_category, item_name, quantity,
                unit_price, discount, currency, gst_applicable, gst_percentage, hsn_code,
                total_price, tax_amount, final_amount, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(Uuid::from(item.id))
        .bind(Uuid::from(item.booking_id))
        .bind(item.service_id.map(Uuid::from))
        .bind(item.service_category.map(|c| c.as_str()))
        .bind(&item.item_name)
        .bind(item.quantity)
        .bind(item.unit_price.amount())
        .bind(item.discount.amount())
        .bind(item.unit_price.currency().code())
        .bind(item.gst_applicable)
        .bind(item.gst_percentage)
        .bind(&item.hsn_code)
        .bind(item.total_price.amount())
        .bind(item.tax_amount.amount())
        .bind(item.final_amount.amount())
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DatabaseError::from(e) {
                DatabaseError::ForeignKeyViolation(_) => Err(DatabaseError::not_found("Booking", item.booking_id)),
                other => Err(other),
            },
        }
    }

    pub async fn update(&self, item: &BillItem) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE bill_items
            SET item_name = $2, quantity = $3, unit_price = $4, discount = $5,
                gst_applicable = $6, gst_percentage = $7, hsn_code = $8,
                total_price = $9, tax_amount = $10, final_amount = $11, updated_at = $12
            WHERE bill_item_id = $1
            "#,
        )
        .bind(Uuid::from(item.id))
        .bind(&item.item_name)
        .bind(item.quantity)
        .bind(item.unit_price.amount())
        .bind(item.discount.amount())
        .bind(item.gst_applicable)
        .bind(item.gst_percentage)
        .bind(&item.hsn_code)
        .bind(item.total_price.amount())
        .bind(item.tax_amount.amount())
        .bind(item.final_amount.amount())
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("BillItem", item.id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: BillItemId) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM bill_items WHERE bill_item_id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("BillItem", id));
        }
        Ok(())
    }

    pub async fn get_service(&self, id: ServiceId) -> Result<HotelService, DatabaseError> {
        sqlx::query_as::<_, ServiceRow>(
            "SELECT service_id, name, category, hsn_code, is_active FROM hotel_services WHERE service_id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("HotelService", id))?
        .try_into()
    }

    /// Inserts or replaces a catalog entry
    pub async fn upsert_service(&self, service: &HotelService) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO hotel_services (service_id, name, category, hsn_code, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (service_id) DO UPDATE
            SET name = EXCLUDED.name, category = EXCLUDED.category,
                hsn_code = EXCLUDED.hsn_code, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(Uuid::from(service.id))
        .bind(&service.name)
        .bind(service.category.as_str())
        .bind(&service.hsn_code)
        .bind(service.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
