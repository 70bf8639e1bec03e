//! Tests for reporting periods and the hotel timezone

use chrono::{NaiveDate, TimeZone, Utc};
use core_kernel::{DateRange, PeriodType, TemporalError, Timezone};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

mod period_type {
    use super::*;

    #[test]
    fn test_normalize_is_idempotent() {
        for period in PeriodType::ALL {
            let once = period.normalize(date(2024, 8, 19));
            assert_eq!(period.normalize(once), once);
        }
    }

    #[test]
    fn test_yearly_range() {
        let range = PeriodType::Yearly.period_range(date(2023, 7, 4)).unwrap();
        assert_eq!(range.start, date(2023, 1, 1));
        assert_eq!(range.end, date(2023, 12, 31));
        assert_eq!(range.days(), 365);
    }

    #[test]
    fn test_daily_range_is_single_day() {
        let range = PeriodType::Daily.period_range(date(2024, 2, 29)).unwrap();
        assert_eq!(range, DateRange::single(date(2024, 2, 29)));
    }

    #[test]
    fn test_monthly_shift_across_year_boundary() {
        assert_eq!(PeriodType::Monthly.shift(date(2023, 11, 30), 3).unwrap(), date(2024, 2, 1));
    }

    #[test]
    fn test_units_in_partial_years() {
        let range = DateRange::new(date(2022, 12, 31), date(2024, 1, 1)).unwrap();
        assert_eq!(PeriodType::Yearly.units_in(&range), 3);
        assert_eq!(PeriodType::Yearly.periods_in(&range).unwrap().len(), 3);
    }

    #[test]
    fn test_string_round_trip() {
        for period in PeriodType::ALL {
            assert_eq!(period.as_str().parse::<PeriodType>().unwrap(), period);
        }
        assert_eq!(
            "hourly".parse::<PeriodType>(),
            Err(TemporalError::UnknownPeriodType("hourly".to_string()))
        );
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(serde_json::to_string(&PeriodType::Monthly).unwrap(), "\"monthly\"");
    }
}

mod timezone {
    use super::*;

    #[test]
    fn test_default_is_kolkata() {
        assert_eq!(Timezone::default().0, chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let tz = Timezone::default();
        // 20:00 UTC is 01:30 the next day in Kolkata
        let instant = Utc.with_ymd_and_hms(2024, 6, 30, 20, 0, 0).unwrap();
        assert_eq!(tz.local_date(instant), date(2024, 7, 1));
    }

    #[test]
    fn test_utc_bounds_cover_whole_month() {
        let tz = Timezone::new(chrono_tz::UTC);
        let range = PeriodType::Monthly.period_range(date(2024, 6, 1)).unwrap();
        let (start, end) = tz.utc_bounds(&range);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_and_serde() {
        let tz: Timezone = "Europe/London".parse().unwrap();
        assert_eq!(serde_json::to_string(&tz).unwrap(), "\"Europe/London\"");
        assert!("Mars/Olympus".parse::<Timezone>().is_err());
    }
}
