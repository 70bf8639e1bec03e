//! Calendar periods and the hotel's local timezone
//!
//! Revenue is reported per calendar day, month or year in the hotel's local
//! time. A report is keyed by the normalized start date of its period
//! (midnight, the 1st of the month, or January 1st).

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timezone wrapper for the hotel's local calendar
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tz::from_str(&s)
            .map(Timezone)
            .map_err(|_| serde::de::Error::custom(format!("Invalid timezone: {}", s)))
    }
}

impl FromStr for Timezone {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s)
            .map(Timezone)
            .map_err(|_| TemporalError::InvalidTimezone(s.to_string()))
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name())
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Converts a UTC datetime to the local timezone
    pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&self.0)
    }

    /// The local calendar date of a UTC instant
    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        self.to_local(utc).date_naive()
    }

    /// Gets the start of day (00:00:00) in this timezone as UTC
    ///
    /// When local midnight does not exist (a DST gap) the naive midnight is
    /// read as UTC.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        midnight
            .and_local_timezone(self.0)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc())
    }

    /// Half-open UTC interval `[start, end)` covering every local day of `range`
    pub fn utc_bounds(&self, range: &DateRange) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = range
            .end
            .succ_opt()
            .map(|d| self.start_of_day(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (self.start_of_day(range.start), end)
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::Asia::Kolkata)
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must not be after end {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("Date out of supported range")]
    OutOfRange,

    #[error("Unknown period type: {0}")]
    UnknownPeriodType(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Granularity of a revenue report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Daily,
    Monthly,
    Yearly,
}

impl PeriodType {
    pub const ALL: [PeriodType; 3] = [PeriodType::Daily, PeriodType::Monthly, PeriodType::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Monthly => "monthly",
            PeriodType::Yearly => "yearly",
        }
    }

    /// Start date of the period containing `date`
    pub fn normalize(&self, date: NaiveDate) -> NaiveDate {
        match self {
            PeriodType::Daily => date,
            PeriodType::Monthly => date.with_day(1).unwrap_or(date),
            PeriodType::Yearly => date.with_ordinal(1).unwrap_or(date),
        }
    }

    /// Moves the period containing `date` by `units` periods, returning the
    /// normalized start of the resulting period
    pub fn shift(&self, date: NaiveDate, units: i64) -> Result<NaiveDate, TemporalError> {
        let start = self.normalize(date);
        let months = |n: i64| -> Result<NaiveDate, TemporalError> {
            let magnitude = u32::try_from(n.unsigned_abs()).map_err(|_| TemporalError::OutOfRange)?;
            let shifted = if n >= 0 {
                start.checked_add_months(Months::new(magnitude))
            } else {
                start.checked_sub_months(Months::new(magnitude))
            };
            shifted.ok_or(TemporalError::OutOfRange)
        };
        match self {
            PeriodType::Daily => start
                .checked_add_signed(chrono::Duration::days(units))
                .ok_or(TemporalError::OutOfRange),
            PeriodType::Monthly => months(units),
            PeriodType::Yearly => months(units.checked_mul(12).ok_or(TemporalError::OutOfRange)?),
        }
    }

    /// Inclusive date range of the period containing `date`
    pub fn period_range(&self, date: NaiveDate) -> Result<DateRange, TemporalError> {
        let start = self.normalize(date);
        let end = self
            .shift(start, 1)?
            .pred_opt()
            .ok_or(TemporalError::OutOfRange)?;
        DateRange::new(start, end)
    }

    /// Normalized starts of every period touching `range`, in ascending order
    pub fn periods_in(&self, range: &DateRange) -> Result<Vec<NaiveDate>, TemporalError> {
        let mut periods = Vec::new();
        let mut cursor = self.normalize(range.start);
        while cursor <= range.end {
            periods.push(cursor);
            cursor = self.shift(cursor, 1)?;
        }
        Ok(periods)
    }

    /// Number of periods touching `range`
    pub fn units_in(&self, range: &DateRange) -> i64 {
        let (s, e) = (range.start, range.end);
        match self {
            PeriodType::Daily => (e - s).num_days() + 1,
            PeriodType::Monthly => {
                (e.year() as i64 - s.year() as i64) * 12 + (e.month() as i64 - s.month() as i64) + 1
            }
            PeriodType::Yearly => e.year() as i64 - s.year() as i64 + 1,
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(PeriodType::Daily),
            "monthly" => Ok(PeriodType::Monthly),
            "yearly" => Ok(PeriodType::Yearly),
            other => Err(TemporalError::UnknownPeriodType(other.to_string())),
        }
    }
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        if start > end {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
