//! Revenue report repository
//!
//! One row per `(report_date, period_type)`. Breakdowns by category, payment
//! method and booking source are stored as `JSONB`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use core_kernel::{PeriodType, ReportId};
use domain_billing::revenue::ReversalOutcome;
use domain_billing::{BookingSource, CategoryRevenue, PaymentMethodTotals, RevenuePeriodReport};

use super::{counter, currency, money, parse_column, to_i32};
use crate::error::DatabaseError;

const REPORT_COLUMNS: &str = r#"
    report_id, report_date, period_type, currency, categories, total_revenue, payment_methods,
    source_counts, total_bookings, tax_collected, outstanding_amount, created_at, updated_at
"#;

#[derive(Debug, Clone, FromRow)]
pub struct ReportRow {
    pub report_id: Uuid,
    pub report_date: NaiveDate,
    pub period_type: String,
    pub currency: String,
    pub categories: Json<CategoryRevenue>,
    pub total_revenue: Decimal,
    pub payment_methods: Json<PaymentMethodTotals>,
    pub source_counts: Json<BTreeMap<BookingSource, u32>>,
    pub total_bookings: i32,
    pub tax_collected: Decimal,
    pub outstanding_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for RevenuePeriodReport {
    type Error = DatabaseError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let ccy = currency(&row.currency)?;
        Ok(RevenuePeriodReport {
            id: ReportId::from(row.report_id),
            date: row.report_date,
            period_type: parse_column("period_type", &row.period_type)?,
            categories: row.categories.0,
            total_revenue: money(row.total_revenue, ccy),
            payment_methods: row.payment_methods.0,
            source_counts: row.source_counts.0,
            total_bookings: counter("total_bookings", row.total_bookings)?,
            tax_collected: money(row.tax_collected, ccy),
            outstanding_amount: money(row.outstanding_amount, ccy),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for per-period revenue reports
#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: PgPool,
}

impl ReportRepository {
    /// Creates a new ReportRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the report or replaces the figures of the stored one
    ///
    /// An existing row keeps its id and `created_at`; the stored report is
    /// returned.
    pub async fn upsert(&self, report: &RevenuePeriodReport) -> Result<RevenuePeriodReport, DatabaseError> {
        let sql = format!(
            r#"
            INSERT INTO revenue_reports ({REPORT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (report_date, period_type) DO UPDATE
            SET currency = EXCLUDED.currency,
                categories = EXCLUDED.categories,
                total_revenue = EXCLUDED.total_revenue,
                payment_methods = EXCLUDED.payment_methods,
                source_counts = EXCLUDED.source_counts,
                total_bookings = EXCLUDED.total_bookings,
                tax_collected = EXCLUDED.tax_collected,
                outstanding_amount = EXCLUDED.outstanding_amount,
                updated_at = EXCLUDED.updated_at
            RETURNING {REPORT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, ReportRow>(&sql)
            .bind(Uuid::from(report.id))
            .bind(report.date)
            .bind(report.period_type.as_str())
            .bind(report.total_revenue.currency().code())
            .bind(Json(&report.categories))
            .bind(report.total_revenue.amount())
            .bind(Json(&report.payment_methods))
            .bind(Json(&report.source_counts))
            .bind(to_i32("total_bookings", report.total_bookings)?)
            .bind(report.tax_collected.amount())
            .bind(report.outstanding_amount.amount())
            .bind(report.created_at)
            .bind(report.updated_at)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    pub async fn get(&self, date: NaiveDate, period_type: PeriodType) -> Result<Option<RevenuePeriodReport>, DatabaseError> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM revenue_reports WHERE report_date = $1 AND period_type = $2");
        sqlx::query_as::<_, ReportRow>(&sql)
            .bind(date)
            .bind(period_type.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(RevenuePeriodReport::try_from)
            .transpose()
    }

    /// Reports of one period type with `from <= date <= to`, ascending
    pub async fn list(
        &self,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RevenuePeriodReport>, DatabaseError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM revenue_reports
             WHERE period_type = $1 AND report_date >= $2 AND report_date <= $3
             ORDER BY report_date"
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(period_type.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(RevenuePeriodReport::try_from).collect()
    }

    /// Subtracts recognized revenue from a stored report under a row lock
    ///
    /// Returns `None` when no report exists for the period.
    pub async fn reverse(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
        amounts: &CategoryRevenue,
    ) -> Result<Option<ReversalOutcome>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM revenue_reports
             WHERE report_date = $1 AND period_type = $2
             FOR UPDATE"
        );
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(date)
            .bind(period_type.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut report = RevenuePeriodReport::try_from(row)?;
        let outcome = report.apply_reversal(amounts);
        report.updated_at = Utc::now();
        Self::write_figures(&mut tx, &report).await?;
        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn write_figures(conn: &mut PgConnection, report: &RevenuePeriodReport) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE revenue_reports
            SET categories = $2, total_revenue = $3, total_bookings = $4, updated_at = $5
            WHERE report_id = $1
            "#,
        )
        .bind(Uuid::from(report.id))
        .bind(Json(&report.categories))
        .bind(report.total_revenue.amount())
        .bind(to_i32("total_bookings", report.total_bookings)?)
        .bind(report.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
