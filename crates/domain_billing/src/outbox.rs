//! Revenue outbox
//!
//! Report updates triggered by a payment are not part of the payment's
//! guarantees. They are enqueued as durable jobs in the same atomic batch as
//! the ledger postings, then applied by [`RevenueJobRunner`], either right away
//! (best effort) or by the `revenue-worker` with exponential backoff. A job that
//! keeps failing is dead-lettered for reconciliation instead of being dropped.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use core_kernel::{OutboxJobId, PeriodType};

use crate::error::BillingError;
use crate::ports::{bounded, BillingPorts, OutboxPort};
use crate::revenue::RevenueAggregator;
use crate::settings::BillingSettings;

/// Longest delay between two attempts of a job
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// How long a claimed job stays invisible to other runners
pub const CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Work a job performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxJobKind {
    /// Recompute one period report from source data
    RecomputeReport { date: NaiveDate, period_type: PeriodType },
}

impl OutboxJobKind {
    pub fn name(&self) -> &'static str {
        match self {
            OutboxJobKind::RecomputeReport { .. } => "recompute_report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Running,
    Done,
    /// Gave up after too many failures
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Running => "running",
            OutboxStatus::Done => "done",
            OutboxStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "running" => Ok(OutboxStatus::Running),
            "done" => Ok(OutboxStatus::Done),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(BillingError::validation(format!("unknown outbox status: {}", other))),
        }
    }
}

/// A durable unit of deferred revenue work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: OutboxJobId,
    pub kind: OutboxJobKind,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxJob {
    pub fn new(kind: OutboxJobKind, now: DateTime<Utc>) -> Self {
        Self {
            id: OutboxJobId::new_v7(),
            kind,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recompute jobs for the daily, monthly and yearly reports covering `date`
    pub fn recompute_all(date: NaiveDate, now: DateTime<Utc>) -> Vec<Self> {
        PeriodType::ALL
            .into_iter()
            .map(|period_type| {
                Self::new(
                    OutboxJobKind::RecomputeReport {
                        date: period_type.normalize(date),
                        period_type,
                    },
                    now,
                )
            })
            .collect()
    }
}

/// Delay before the next attempt after `attempts` failures: `base * 2^attempts`, capped
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

/// Outcome of one runner pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
}

/// Applies outbox jobs through the revenue aggregator
#[derive(Clone)]
pub struct RevenueJobRunner {
    aggregator: RevenueAggregator,
    outbox: Arc<dyn OutboxPort>,
    settings: BillingSettings,
}

impl RevenueJobRunner {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self {
            aggregator: RevenueAggregator::new(ports.clone(), settings.clone()),
            outbox: ports.outbox,
            settings,
        }
    }

    /// Claims and applies up to `batch` due jobs
    #[instrument(skip(self))]
    pub async fn run_pending(&self, now: DateTime<Utc>, batch: u32) -> Result<RunSummary, BillingError> {
        let lease_until = now + chrono::Duration::from_std(CLAIM_LEASE).unwrap_or(chrono::Duration::minutes(5));
        let jobs = bounded(
            self.settings.operation_timeout,
            "claim_due",
            self.outbox.claim_due(now, lease_until, batch),
        )
        .await?;

        let mut summary = RunSummary {
            claimed: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match self.execute(&job).await {
                Ok(()) => {
                    self.complete(&job, now).await?;
                    summary.succeeded += 1;
                }
                Err(e) => {
                    if self.fail(&job, &e, now).await? == OutboxStatus::Dead {
                        summary.dead_lettered += 1;
                    } else {
                        summary.rescheduled += 1;
                    }
                }
            }
        }
        if summary.claimed > 0 {
            info!(?summary, "outbox pass finished");
        }
        Ok(summary)
    }

    /// Best-effort application right after the jobs were committed. A job is
    /// only run if it can still be claimed; failures stay queued for the worker.
    pub async fn apply_inline(&self, jobs: &[OutboxJob], now: DateTime<Utc>) -> usize {
        let lease_until = now + chrono::Duration::from_std(CLAIM_LEASE).unwrap_or(chrono::Duration::minutes(5));
        let mut applied = 0;
        for job in jobs {
            let claimed = bounded(
                self.settings.operation_timeout,
                "claim_job",
                self.outbox.claim_job(job.id, now, lease_until),
            )
            .await;
            let job = match claimed {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "could not claim revenue job inline");
                    continue;
                }
            };
            let outcome = match self.execute(&job).await {
                Ok(()) => self.complete(&job, now).await.map(|_| true),
                Err(e) => self.fail(&job, &e, now).await.map(|_| false),
            };
            match outcome {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "revenue job bookkeeping failed"),
            }
        }
        applied
    }

    /// Runs the job's work without touching its outbox row
    pub async fn execute(&self, job: &OutboxJob) -> Result<(), BillingError> {
        match &job.kind {
            OutboxJobKind::RecomputeReport { date, period_type } => {
                self.aggregator.update_revenue_report(*date, *period_type).await?;
            }
        }
        Ok(())
    }

    async fn complete(&self, job: &OutboxJob, now: DateTime<Utc>) -> Result<(), BillingError> {
        bounded(
            self.settings.operation_timeout,
            "mark_done",
            self.outbox.mark_done(job.id, now),
        )
        .await
    }

    async fn fail(&self, job: &OutboxJob, cause: &BillingError, now: DateTime<Utc>) -> Result<OutboxStatus, BillingError> {
        let attempts = job.attempts + 1;
        let message = cause.to_string();
        let (status, next_attempt_at) = if attempts >= self.settings.outbox_max_attempts {
            error!(
                job_id = %job.id,
                kind = job.kind.name(),
                attempts,
                error = %message,
                "revenue job dead-lettered; report needs reconciliation"
            );
            (OutboxStatus::Dead, now)
        } else {
            let delay = backoff_delay(self.settings.outbox_backoff_base, job.attempts);
            warn!(
                job_id = %job.id,
                kind = job.kind.name(),
                attempts,
                retry_in_secs = delay.as_secs(),
                error = %message,
                "revenue job failed, rescheduling"
            );
            let next = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::hours(1));
            (OutboxStatus::Pending, next)
        };
        bounded(
            self.settings.operation_timeout,
            "record_failure",
            self.outbox
                .record_failure(job.id, status, attempts, next_attempt_at, &message),
        )
        .await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(base, 20), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
    }

    #[test]
    fn test_recompute_all_normalizes_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 17).unwrap();
        let jobs = OutboxJob::recompute_all(date, Utc::now());
        let dates: Vec<NaiveDate> = jobs
            .iter()
            .map(|j| match j.kind {
                OutboxJobKind::RecomputeReport { date, .. } => date,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            dates,
            vec![
                date,
                NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            ]
        );
    }

    #[test]
    fn test_job_kind_serializes_with_tag() {
        let kind = OutboxJobKind::RecomputeReport {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            period_type: PeriodType::Monthly,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "recompute_report");
        assert_eq!(json["period_type"], "monthly");
    }
}
