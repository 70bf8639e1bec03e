//! Period revenue reports
//!
//! A [`RevenuePeriodReport`] summarizes the bookings paid within one local
//! calendar day, month or year. Reports are recomputed from source data and
//! upserted, so recomputation is idempotent. The only in-place change is the
//! reversal delta applied when a paid booking is undone, which clamps every
//! field at zero.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use core_kernel::{Currency, DateRange, Money, PeriodType, ReportId};

use crate::bill::BillItem;
use crate::booking::{Booking, BookingSource};
use crate::category::{CategoryRevenue, RevenueCategory};
use crate::error::BillingError;
use crate::outbox::{OutboxJob, OutboxJobKind};
use crate::payment::{Payment, PaymentMethodTotals};
use crate::ports::{bounded, BillingPorts};
use crate::settings::BillingSettings;

/// Most periods a single report request may recompute
pub const MAX_REPORT_PERIODS: usize = 400;

/// A paid booking with the records its revenue is derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidBooking {
    pub booking: Booking,
    pub payments: Vec<Payment>,
    pub items: Vec<BillItem>,
}

impl PaidBooking {
    /// Revenue of the booking per category; sums to the booking total
    pub fn category_revenue(&self) -> Result<CategoryRevenue, BillingError> {
        Ok(CategoryRevenue::allocate(
            self.booking.total_amount(),
            self.items.iter().map(|i| (i.revenue_category(), i.final_amount)),
        )?)
    }
}

/// What a reversal actually subtracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalOutcome {
    pub applied: CategoryRevenue,
    /// Some category held less than the requested amount
    pub clamped: bool,
}

/// Revenue summary of one period, keyed by `(date, period_type)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenuePeriodReport {
    pub id: ReportId,
    /// Normalized period start
    pub date: NaiveDate,
    pub period_type: PeriodType,
    pub categories: CategoryRevenue,
    /// Always the sum of `categories`
    pub total_revenue: Money,
    pub payment_methods: PaymentMethodTotals,
    pub source_counts: BTreeMap<BookingSource, u32>,
    pub total_bookings: u32,
    pub tax_collected: Money,
    pub outstanding_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RevenuePeriodReport {
    /// Builds the report of the period containing `date` from its paid bookings
    pub fn compute(
        date: NaiveDate,
        period_type: PeriodType,
        bookings: &[PaidBooking],
        outstanding_amount: Money,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        let mut categories = CategoryRevenue::zero(currency);
        let mut payment_methods = PaymentMethodTotals::zero(currency);
        let mut source_counts = BTreeMap::new();
        let mut tax_collected = Money::zero(currency);

        for paid in bookings {
            categories.merge(&paid.category_revenue()?)?;
            for payment in paid.payments.iter().filter(|p| p.is_completed()) {
                payment_methods.add(payment.method, payment.amount)?;
            }
            *source_counts.entry(paid.booking.source).or_insert(0) += 1;
            if let Some(totals) = paid.booking.totals {
                tax_collected = tax_collected.checked_add(&totals.total_tax_amount)?;
            }
        }

        Ok(Self {
            id: ReportId::new_v7(),
            date: period_type.normalize(date),
            period_type,
            total_revenue: categories.total(),
            categories,
            payment_methods,
            source_counts,
            total_bookings: u32::try_from(bookings.len()).unwrap_or(u32::MAX),
            tax_collected,
            outstanding_amount,
            created_at: now,
            updated_at: now,
        })
    }

    /// Subtracts a reversed booking, clamping every field at zero
    pub fn apply_reversal(&mut self, amounts: &CategoryRevenue) -> ReversalOutcome {
        let mut applied = CategoryRevenue::zero(self.categories.currency());
        let mut clamped = false;
        for category in RevenueCategory::ALL {
            let requested = amounts.get(category);
            if !requested.is_positive() {
                continue;
            }
            let current = self.categories.get_mut(category);
            let taken = if requested.amount() > current.amount() {
                clamped = true;
                *current
            } else {
                requested
            };
            *current = *current - taken;
            *applied.get_mut(category) = taken;
        }
        self.total_revenue = self.categories.total();
        self.total_bookings = self.total_bookings.saturating_sub(1);
        ReversalOutcome { applied, clamped }
    }
}

/// Totals over a set of period reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    pub total_revenue: Money,
    pub total_bookings: u32,
    /// Revenue per booking; zero without bookings
    pub average_revenue: Money,
    pub categories: CategoryRevenue,
    pub payment_methods: PaymentMethodTotals,
    pub tax_collected: Money,
}

impl PeriodAggregate {
    pub fn from_reports(reports: &[RevenuePeriodReport], currency: Currency) -> Result<Self, BillingError> {
        let mut categories = CategoryRevenue::zero(currency);
        let mut payment_methods = PaymentMethodTotals::zero(currency);
        let mut tax_collected = Money::zero(currency);
        let mut total_bookings: u32 = 0;
        for report in reports {
            categories.merge(&report.categories)?;
            payment_methods.merge(&report.payment_methods)?;
            tax_collected = tax_collected.checked_add(&report.tax_collected)?;
            total_bookings = total_bookings.saturating_add(report.total_bookings);
        }
        let total_revenue = categories.total();
        let average_revenue = if total_bookings == 0 {
            Money::zero(currency)
        } else {
            total_revenue.divide(Decimal::from(total_bookings))?
        };
        Ok(Self {
            total_revenue,
            total_bookings,
            average_revenue,
            categories,
            payment_methods,
            tax_collected,
        })
    }
}

/// Percentage change from `previous` to `current`, two decimals; zero when
/// there is nothing to compare against
pub fn growth(current: Decimal, previous: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::ZERO;
    }
    ((current - previous) / previous * Decimal::ONE_HUNDRED).round_dp(2)
}

/// A range compared with the equally long range right before it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueTrends {
    pub period_type: PeriodType,
    pub current_range: DateRange,
    pub previous_range: DateRange,
    pub current: PeriodAggregate,
    pub previous: PeriodAggregate,
    pub revenue_growth: Decimal,
    pub booking_growth: Decimal,
    pub average_revenue_growth: Decimal,
}

/// Response of [`RevenueAggregator::generate_revenue_report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueReportData {
    pub range: DateRange,
    pub period_type: PeriodType,
    pub periods: Vec<RevenuePeriodReport>,
    pub totals: PeriodAggregate,
    pub trends: RevenueTrends,
}

/// Recomputes, reverses and compares period reports
#[derive(Clone)]
pub struct RevenueAggregator {
    ports: BillingPorts,
    settings: BillingSettings,
}

impl RevenueAggregator {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self { ports, settings }
    }

    /// Recomputes the report of the period containing `date` and upserts it
    ///
    /// Idempotent: the report is derived only from bookings currently `paid`
    /// in the period, so running it again yields the same row.
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` when source amounts mix currencies
    /// - `BillingError::UpstreamUnavailable` when bookings or reports cannot be reached
    #[instrument(skip(self))]
    pub async fn update_revenue_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
    ) -> Result<RevenuePeriodReport, BillingError> {
        let limit = self.settings.operation_timeout;
        let range = period_type.period_range(date)?;
        let (from, to) = self.settings.timezone.utc_bounds(&range);
        let paid = bounded(
            limit,
            "paid_bookings_between",
            self.ports.bookings.paid_bookings_between(from, to),
        )
        .await?;
        let outstanding = bounded(
            limit,
            "outstanding_balance",
            self.ports.bookings.outstanding_balance(from, to),
        )
        .await?;
        let report = RevenuePeriodReport::compute(
            range.start,
            period_type,
            &paid,
            outstanding,
            self.settings.currency,
            Utc::now(),
        )?;
        let stored = bounded(limit, "upsert_report", self.ports.reports.upsert_report(&report)).await?;
        info!(
            date = %stored.date,
            total_revenue = %stored.total_revenue,
            bookings = stored.total_bookings,
            "revenue report recomputed"
        );
        Ok(stored)
    }

    /// Recomputes the daily, monthly and yearly reports covering `date`
    pub async fn update_revenue_reports(&self, date: NaiveDate) -> Result<Vec<RevenuePeriodReport>, BillingError> {
        let mut reports = Vec::with_capacity(PeriodType::ALL.len());
        for period_type in PeriodType::ALL {
            reports.push(self.update_revenue_report(date, period_type).await?);
        }
        Ok(reports)
    }

    /// Subtracts reversed revenue from the report covering `date`
    ///
    /// A clamped reversal enqueues a recompute of the same period so the
    /// report is re-derived from source.
    ///
    /// # Errors
    ///
    /// Returns the store error when the report cannot be updated or the
    /// recompute cannot be enqueued
    #[instrument(skip(self, amounts), fields(amount = %amounts.total()))]
    pub async fn reverse_revenue_report(
        &self,
        date: NaiveDate,
        period_type: PeriodType,
        amounts: &CategoryRevenue,
    ) -> Result<Option<ReversalOutcome>, BillingError> {
        let limit = self.settings.operation_timeout;
        let key = period_type.normalize(date);
        let outcome = bounded(
            limit,
            "reverse_report",
            self.ports.reports.reverse_report(key, period_type, amounts),
        )
        .await?;
        match &outcome {
            None => warn!(date = %key, "no report to reverse"),
            Some(o) if o.clamped => {
                warn!(
                    date = %key,
                    requested = %amounts.total(),
                    applied = %o.applied.total(),
                    "reversal clamped at zero; scheduling recompute"
                );
                let job = OutboxJob::new(
                    OutboxJobKind::RecomputeReport {
                        date: key,
                        period_type,
                    },
                    Utc::now(),
                );
                bounded(limit, "enqueue", self.ports.outbox.enqueue(&[job])).await?;
            }
            Some(o) => info!(date = %key, applied = %o.applied.total(), "revenue report reversed"),
        }
        Ok(outcome)
    }

    async fn aggregate(&self, range: &DateRange, period_type: PeriodType) -> Result<PeriodAggregate, BillingError> {
        let reports = bounded(
            self.settings.operation_timeout,
            "list_reports",
            self.ports.reports.list_reports(
                period_type,
                period_type.normalize(range.start),
                period_type.normalize(range.end),
            ),
        )
        .await?;
        PeriodAggregate::from_reports(&reports, self.settings.currency)
    }

    /// Compares the stored reports of `range` with the equally long range before it
    ///
    /// # Errors
    ///
    /// Returns the store error when the reports cannot be listed
    pub async fn calculate_trends(&self, range: DateRange, period_type: PeriodType) -> Result<RevenueTrends, BillingError> {
        let units = period_type.units_in(&range);
        let previous_start = period_type.shift(range.start, -units)?;
        let previous_end = period_type
            .normalize(range.start)
            .pred_opt()
            .ok_or(core_kernel::TemporalError::OutOfRange)?;
        let previous_range = DateRange::new(previous_start, previous_end)?;

        let current = self.aggregate(&range, period_type).await?;
        let previous = self.aggregate(&previous_range, period_type).await?;
        Ok(RevenueTrends {
            period_type,
            current_range: range,
            previous_range,
            revenue_growth: growth(current.total_revenue.amount(), previous.total_revenue.amount()),
            booking_growth: growth(
                Decimal::from(current.total_bookings),
                Decimal::from(previous.total_bookings),
            ),
            average_revenue_growth: growth(current.average_revenue.amount(), previous.average_revenue.amount()),
            current,
            previous,
        })
    }

    /// Recomputes every period of the range and returns the rows, totals and trends
    ///
    /// # Arguments
    ///
    /// * `start` - First local date of the range
    /// * `end` - Last local date of the range, inclusive
    /// * `period_type` - Granularity of the returned rows
    ///
    /// # Errors
    ///
    /// `BillingError::Validation` when `end` is before `start` or the range spans
    /// more than `MAX_REPORT_PERIODS` periods
    #[instrument(skip(self))]
    pub async fn generate_revenue_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        period_type: PeriodType,
    ) -> Result<RevenueReportData, BillingError> {
        let range = DateRange::new(start, end)?;
        let keys = period_type.periods_in(&range)?;
        if keys.len() > MAX_REPORT_PERIODS {
            return Err(BillingError::validation(format!(
                "{} {} periods requested, at most {} allowed",
                keys.len(),
                period_type,
                MAX_REPORT_PERIODS
            )));
        }
        let mut periods = Vec::with_capacity(keys.len());
        for key in keys {
            periods.push(self.update_revenue_report(key, period_type).await?);
        }
        let totals = PeriodAggregate::from_reports(&periods, self.settings.currency)?;
        let trends = self.calculate_trends(range, period_type).await?;
        Ok(RevenueReportData {
            range,
            period_type,
            periods,
            totals,
            trends,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inr(amount: Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    fn report(accommodation: Decimal, spa: Decimal) -> RevenuePeriodReport {
        let mut categories = CategoryRevenue::zero(Currency::INR);
        categories.accommodation = inr(accommodation);
        categories.spa = inr(spa);
        RevenuePeriodReport {
            id: ReportId::new(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            period_type: PeriodType::Daily,
            total_revenue: categories.total(),
            categories,
            payment_methods: PaymentMethodTotals::zero(Currency::INR),
            source_counts: BTreeMap::new(),
            total_bookings: 2,
            tax_collected: inr(dec!(0)),
            outstanding_amount: inr(dec!(0)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_growth_against_zero_is_zero() {
        assert_eq!(growth(dec!(500), dec!(0)), dec!(0));
        assert_eq!(growth(dec!(150), dec!(100)), dec!(50));
        assert_eq!(growth(dec!(100), dec!(300)), dec!(-66.67));
    }

    #[test]
    fn test_reversal_subtracts_exact_amounts() {
        let mut r = report(dec!(3000), dec!(500));
        let outcome = r.apply_reversal(&CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1000))));
        assert!(!outcome.clamped);
        assert_eq!(r.categories.accommodation, inr(dec!(2000)));
        assert_eq!(r.total_revenue, inr(dec!(2500)));
        assert_eq!(r.total_bookings, 1);
    }

    #[test]
    fn test_reversal_clamps_at_zero() {
        let mut r = report(dec!(300), dec!(0));
        r.total_bookings = 0;
        let outcome = r.apply_reversal(&CategoryRevenue::single(RevenueCategory::Accommodation, inr(dec!(1000))));
        assert!(outcome.clamped);
        assert_eq!(outcome.applied.accommodation, inr(dec!(300)));
        assert!(r.total_revenue.is_zero());
        assert_eq!(r.total_bookings, 0);
    }

    #[test]
    fn test_aggregate_average() {
        let reports = vec![report(dec!(1000), dec!(0)), report(dec!(500), dec!(500))];
        let agg = PeriodAggregate::from_reports(&reports, Currency::INR).unwrap();
        assert_eq!(agg.total_revenue, inr(dec!(2000)));
        assert_eq!(agg.total_bookings, 4);
        assert_eq!(agg.average_revenue, inr(dec!(500)));
    }
}
