//! Outbox job repository
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED`, so several workers can drain
//! the table concurrently without handing the same job to two of them. A claim
//! pushes `next_attempt_at` to the lease end; a crashed worker's job becomes
//! due again once the lease runs out.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use core_kernel::OutboxJobId;
use domain_billing::{OutboxJob, OutboxJobKind, OutboxStatus};

use super::{counter, parse_column, to_i32};
use crate::error::DatabaseError;

const JOB_COLUMNS: &str = "job_id, kind, status, attempts, next_attempt_at, last_error, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct OutboxJobRow {
    pub job_id: Uuid,
    pub kind: Json<OutboxJobKind>,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxJobRow> for OutboxJob {
    type Error = DatabaseError;

    fn try_from(row: OutboxJobRow) -> Result<Self, Self::Error> {
        Ok(OutboxJob {
            id: OutboxJobId::from(row.job_id),
            kind: row.kind.0,
            status: parse_column("status", &row.status)?,
            attempts: counter("attempts", row.attempts)?,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn rows_to_jobs(rows: Vec<OutboxJobRow>) -> Result<Vec<OutboxJob>, DatabaseError> {
    rows.into_iter().map(OutboxJob::try_from).collect()
}

/// Repository for durable report jobs
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes jobs on an open connection or transaction
    ///
    /// Used by the ledger so that jobs commit together with their postings.
    pub async fn insert_jobs(conn: &mut PgConnection, jobs: &[OutboxJob]) -> Result<(), DatabaseError> {
        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO outbox_jobs (job_id, kind, status, attempts, next_attempt_at, last_error, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::from(job.id))
            .bind(Json(&job.kind))
            .bind(job.status.as_str())
            .bind(to_i32("attempts", job.attempts)?)
            .bind(job.next_attempt_at)
            .bind(&job.last_error)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn enqueue(&self, jobs: &[OutboxJob]) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_jobs(&mut tx, jobs).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Claims up to `limit` due jobs, oldest due first
    ///
    /// Pending jobs and running jobs whose lease expired are both due.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxJob>, DatabaseError> {
        let sql = format!(
            r#"
            UPDATE outbox_jobs SET status = 'running', next_attempt_at = $2, updated_at = $1
            WHERE job_id IN (
                SELECT job_id FROM outbox_jobs
                WHERE status IN ('pending', 'running') AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let mut rows = sqlx::query_as::<_, OutboxJobRow>(&sql)
            .bind(now)
            .bind(lease_until)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.sort_by_key(|r| r.created_at);
        rows_to_jobs(rows)
    }

    /// Claims one pending job if it is due
    pub async fn claim_job(
        &self,
        id: OutboxJobId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<OutboxJob>, DatabaseError> {
        let sql = format!(
            r#"
            UPDATE outbox_jobs SET status = 'running', next_attempt_at = $3, updated_at = $2
            WHERE job_id = $1 AND status = 'pending' AND next_attempt_at <= $2
            RETURNING {JOB_COLUMNS}
            "#
        );
        sqlx::query_as::<_, OutboxJobRow>(&sql)
            .bind(Uuid::from(id))
            .bind(now)
            .bind(lease_until)
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxJob::try_from)
            .transpose()
    }

    pub async fn mark_done(&self, id: OutboxJobId, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE outbox_jobs SET status = 'done', updated_at = $2 WHERE job_id = $1")
            .bind(Uuid::from(id))
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxJob", id));
        }
        Ok(())
    }

    pub async fn record_failure(
        &self,
        id: OutboxJobId,
        status: OutboxStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_jobs
            SET status = $2, attempts = $3, next_attempt_at = $4, last_error = $5, updated_at = now()
            WHERE job_id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(status.as_str())
        .bind(to_i32("attempts", attempts)?)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxJob", id));
        }
        Ok(())
    }

    pub async fn list_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxJob>, DatabaseError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM outbox_jobs WHERE status = $1 ORDER BY job_id");
        let rows = sqlx::query_as::<_, OutboxJobRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows_to_jobs(rows)
    }
}
