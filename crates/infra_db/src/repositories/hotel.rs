//! Hotel configuration and staff user repository
//!
//! Tax settings and the hotel profile are singleton rows. A fresh database
//! without them behaves as if the defaults were stored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use core_kernel::UserId;
use domain_billing::{HotelProfile, OtherTax, TaxConfig, UserRef};

use crate::error::DatabaseError;

#[derive(Debug, Clone, FromRow)]
pub struct TaxSettingsRow {
    pub gst_percentage: Decimal,
    pub service_tax_percentage: Decimal,
    pub other_taxes: Json<Vec<OtherTax>>,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<TaxSettingsRow> for TaxConfig {
    fn from(row: TaxSettingsRow) -> Self {
        TaxConfig {
            gst_percentage: row.gst_percentage,
            service_tax_percentage: row.service_tax_percentage,
            other_taxes: row.other_taxes.0,
            enabled: row.enabled,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct HotelProfileRow {
    pub name: String,
    pub gst_number: Option<String>,
    pub address: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub logo_url: Option<String>,
}

impl From<HotelProfileRow> for HotelProfile {
    fn from(row: HotelProfileRow) -> Self {
        HotelProfile {
            name: row.name,
            gst_number: row.gst_number,
            address: row.address,
            phone: row.phone,
            email: row.email,
            logo_url: row.logo_url,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
}

impl From<UserRow> for UserRef {
    fn from(row: UserRow) -> Self {
        UserRef {
            id: UserId::from(row.user_id),
            name: row.name,
            email: row.email,
            is_active: row.is_active,
        }
    }
}

/// Repository for hotel-wide settings and staff users
#[derive(Debug, Clone)]
pub struct HotelRepository {
    pool: PgPool,
}

impl HotelRepository {
    /// Creates a new HotelRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reads the tax configuration, or the default when none is stored
    pub async fn tax_config(&self) -> Result<TaxConfig, DatabaseError> {
        let row = sqlx::query_as::<_, TaxSettingsRow>(
            "SELECT gst_percentage, service_tax_percentage, other_taxes, enabled, updated_at FROM tax_settings",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TaxConfig::from).unwrap_or_default())
    }

    /// Stores the tax configuration
    pub async fn save_tax_config(&self, config: &TaxConfig) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO tax_settings (singleton, gst_percentage, service_tax_percentage, other_taxes, enabled, updated_at)
            VALUES (TRUE, $1, $2, $3, $4, now())
            ON CONFLICT (singleton) DO UPDATE
            SET gst_percentage = EXCLUDED.gst_percentage,
                service_tax_percentage = EXCLUDED.service_tax_percentage,
                other_taxes = EXCLUDED.other_taxes,
                enabled = EXCLUDED.enabled,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(config.gst_percentage)
        .bind(config.service_tax_percentage)
        .bind(Json(&config.other_taxes))
        .bind(config.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reads the hotel profile, or an empty one when none is stored
    pub async fn hotel_profile(&self) -> Result<HotelProfile, DatabaseError> {
        let row = sqlx::query_as::<_, HotelProfileRow>(
            "SELECT name, gst_number, address, phone, email, logo_url FROM hotel_profile",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HotelProfile::from).unwrap_or_default())
    }

    pub async fn save_hotel_profile(&self, profile: &HotelProfile) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO hotel_profile (singleton, name, gst_number, address, phone, email, logo_url)
            VALUES (TRUE, $1, $2, $3, $4, $5, $6)
            ON CONFLICT (singleton) DO UPDATE
            SET name = EXCLUDED.name, gst_number = EXCLUDED.gst_number, address = EXCLUDED.address,
                phone = EXCLUDED.phone, email = EXCLUDED.email, logo_url = EXCLUDED.logo_url
            "#,
        )
        .bind(&profile.name)
        .bind(&profile.gst_number)
        .bind(&profile.address)
        .bind(&profile.phone)
        .bind(&profile.email)
        .bind(&profile.logo_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: UserId) -> Result<UserRef, DatabaseError> {
        sqlx::query_as::<_, UserRow>("SELECT user_id, name, email, is_active FROM users WHERE user_id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(UserRef::from)
            .ok_or_else(|| DatabaseError::not_found("User", id))
    }

    /// Active users whose name matches ignoring case and surrounding spaces
    pub async fn find_users_by_name(&self, name: &str) -> Result<Vec<UserRef>, DatabaseError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, name, email, is_active FROM users
            WHERE is_active AND lower(name) = lower($1)
            ORDER BY user_id
            "#,
        )
        .bind(name.trim())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserRef::from).collect())
    }

    pub async fn insert_user(&self, user: &UserRef) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO users (user_id, name, email, is_active) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::from(user.id))
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
