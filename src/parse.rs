// SPDX-License-Identifier: MPL-2.0

mod dateparse;
mod reldateparse;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub use dateparse::parse_date;
pub use reldateparse::{parse_relative_date, start_of_day, start_of_week};

/// Parses a range boundary given on the command line.
///
/// Tries, in order: a relative period (`2w`, `today`, `now`), a full point in
/// time (`2024-01-05 13:00`, `yesterday 9:30am`) and a bare ISO date (start of
/// that day).  As a boundary `now` is the end of today.
pub fn parse_boundary<Tz>(input: &str, timezone: &Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>>
where
    Tz: TimeZone,
{
    let today = now.with_timezone(timezone).date_naive();
    parse_relative_date(input, timezone, today)
        .or_else(|| parse_date(input, timezone, now))
        .or_else(|| {
            NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
                .ok()
                .and_then(|day| start_of_day(timezone, day))
        })
        .ok_or_else(|| anyhow!("Could not understand the date `{input}`"))
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 5, 15, 30, 0).unwrap()
    }

    #[test]
    fn boundaries_accept_every_supported_shape() {
        assert_eq!(
            parse_boundary("2024-03-01 08:15", &Utc, now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap()
        );
        assert_eq!(
            parse_boundary("2024-03-01", &Utc, now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_boundary("2d", &Utc, now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn bare_dates_start_at_local_midnight() {
        let zone = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            parse_boundary("2024-03-01", &zone, now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn now_as_a_boundary_is_the_end_of_today() {
        assert_eq!(
            parse_boundary("now", &Utc, now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 6, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_boundary("yesterday 9:30am", &Utc, now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 4, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn oversized_periods_are_an_error() {
        let err = parse_boundary("99999999d", &Utc, now()).unwrap_err();
        assert!(err.to_string().contains("Could not understand the date"));
    }

    #[test]
    fn unknown_input_is_an_error_naming_it() {
        let err = parse_boundary("last tuesday-ish", &Utc, now()).unwrap_err();
        assert!(err.to_string().contains("last tuesday-ish"));
    }
}
