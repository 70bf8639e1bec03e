//! Guest billing access repository

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use core_kernel::{BookingId, GuestAccessId};
use domain_billing::GuestBillingAccess;

use super::{counter, to_i32};
use crate::error::DatabaseError;

const ACCESS_COLUMNS: &str =
    "access_id, booking_id, token, expires_at, is_active, view_count, last_viewed_at, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct GuestAccessRow {
    pub access_id: Uuid,
    pub booking_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub view_count: i32,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<GuestAccessRow> for GuestBillingAccess {
    type Error = DatabaseError;

    fn try_from(row: GuestAccessRow) -> Result<Self, Self::Error> {
        Ok(GuestBillingAccess {
            id: GuestAccessId::from(row.access_id),
            booking_id: BookingId::from(row.booking_id),
            token: row.token,
            expires_at: row.expires_at,
            is_active: row.is_active,
            view_count: counter("view_count", row.view_count)?,
            last_viewed_at: row.last_viewed_at,
            created_at: row.created_at,
        })
    }
}

/// Repository for guest billing tokens
#[derive(Debug, Clone)]
pub struct GuestAccessRepository {
    pool: PgPool,
}

impl GuestAccessRepository {
    /// Creates a new GuestAccessRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, access: &GuestBillingAccess) -> Result<(), DatabaseError> {
        let sql = format!("INSERT INTO guest_billing_access ({ACCESS_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)");
        sqlx::query(&sql)
            .bind(Uuid::from(access.id))
            .bind(Uuid::from(access.booking_id))
            .bind(&access.token)
            .bind(access.expires_at)
            .bind(access.is_active)
            .bind(to_i32("view_count", access.view_count)?)
            .bind(access.last_viewed_at)
            .bind(access.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<GuestBillingAccess>, DatabaseError> {
        let sql = format!("SELECT {ACCESS_COLUMNS} FROM guest_billing_access WHERE token = $1");
        sqlx::query_as::<_, GuestAccessRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(GuestBillingAccess::try_from)
            .transpose()
    }

    /// Counts one view in a single statement so concurrent views are not lost
    pub async fn record_view(&self, token: &str, at: DateTime<Utc>) -> Result<GuestBillingAccess, DatabaseError> {
        let sql = format!(
            "UPDATE guest_billing_access
             SET view_count = view_count + 1, last_viewed_at = $2
             WHERE token = $1
             RETURNING {ACCESS_COLUMNS}"
        );
        sqlx::query_as::<_, GuestAccessRow>(&sql)
            .bind(token)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("GuestBillingAccess", "token"))?
            .try_into()
    }

    pub async fn deactivate(&self, token: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE guest_billing_access SET is_active = FALSE WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("GuestBillingAccess", "token"));
        }
        Ok(())
    }
}
