//! Outbox polling loop
//!
//! Each pass claims due revenue jobs and applies them, then optionally marks
//! checked-out unpaid bookings overdue. A full batch is followed by another
//! pass straight away; otherwise the worker sleeps for the poll interval.

use std::time::Duration;

use chrono::{DateTime, Utc};
use domain_billing::{BillingError, BillingPorts, BillingSettings, PaymentService, RevenueJobRunner, RunSummary};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Options of the polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub refresh_overdue: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 50,
            refresh_overdue: true,
        }
    }
}

/// Outcome of one worker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub outbox: RunSummary,
    /// Bookings newly marked overdue
    pub overdue: usize,
}

pub struct RevenueWorker {
    runner: RevenueJobRunner,
    payments: PaymentService,
    options: WorkerOptions,
}

impl RevenueWorker {
    pub fn new(ports: BillingPorts, settings: BillingSettings, options: WorkerOptions) -> Self {
        Self {
            runner: RevenueJobRunner::new(ports.clone(), settings.clone()),
            payments: PaymentService::new(ports, settings),
            options,
        }
    }

    /// Runs a single pass at `now`
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<PassReport, BillingError> {
        let outbox = self.runner.run_pending(now, self.options.batch_size).await?;
        let overdue = if self.options.refresh_overdue {
            self.payments.refresh_overdue(now).await?.len()
        } else {
            0
        };
        Ok(PassReport { outbox, overdue })
    }

    /// Polls until `shutdown` turns true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            batch_size = self.options.batch_size,
            "revenue worker started"
        );

        while !*shutdown.borrow() {
            let full_batch = match self.run_once(Utc::now()).await {
                Ok(report) => {
                    debug!(?report, "worker pass finished");
                    self.options.batch_size > 0 && report.outbox.claimed >= self.options.batch_size as usize
                }
                Err(e) => {
                    warn!(error = %e, "worker pass failed");
                    false
                }
            };
            if full_batch {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }

        info!("revenue worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = WorkerOptions::default();
        assert_eq!(options.batch_size, 50);
        assert!(options.refresh_overdue);
        assert_eq!(options.poll_interval, Duration::from_secs(2));
    }
}
