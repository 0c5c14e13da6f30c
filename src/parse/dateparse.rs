use std::{str::FromStr, sync::LazyLock};

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc, Weekday};
use regex::{Match, Regex};

static REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?xi)
^ # anchor to start of string

(?: # date part (optional, defaults to current day)
  (?: # date is in ISO format (yyyy-mm-dd)
    (\d{4})-(\d{2})-(\d{2})
    (?:\s*T?\s*) # can be either a T or nothing, with arbitrary whitespace allowed everywhere
  ) | (?: # date is a name referring to a day relative to the local date
    (yesterday | today | monday | tuesday | wednesday | thursday | friday | saturday | sunday)
    (?:\s*) # only whitespace as separator
  )
)?
# time part, either 24-hour (13:05) or 12-hour (1:05pm)
(\d{1,2}):(\d{2})(?::(\d{2}))?
(?:\s*(am|pm))?

$ # anchor to end of string
",
    )
    .expect("Could not parse Regex")
});

/// Parses a point in time typed on the command line, interpreted in `timezone`.
///
/// Accepts `2024-01-05 13:05[:07]`, `[today|yesterday|<weekday>] 1:05pm`, a
/// bare time (meaning today), or `now`.
pub fn parse_date<Tz>(
    date: &str,
    timezone: &Tz,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>>
where
    Tz: TimeZone,
{
    let date = date.trim();
    if date.eq_ignore_ascii_case("now") {
        return Some(now);
    }

    let captures = REGEX.captures(date)?;
    let today = now.with_timezone(timezone).date_naive();
    let day = parse_relative_day(captures.get(4).map(|f| f.as_str()), today)?;

    let hour = to_24_hour(
        captures[5].parse().ok()?,
        captures.get(8).map(|m| m.as_str()),
    )?;
    let date = timezone.with_ymd_and_hms(
        capture_with_default(captures.get(1), day.year()),
        capture_with_default(captures.get(2), day.month()),
        capture_with_default(captures.get(3), day.day()),
        hour,
        captures[6].parse().ok()?,
        capture_with_default(captures.get(7), 0),
    );

    Some(date.latest()?.with_timezone(&Utc))
}

fn to_24_hour(hour: u32, meridiem: Option<&str>) -> Option<u32> {
    match meridiem {
        None if hour < 24 => Some(hour),
        Some(m) if (1..=12).contains(&hour) => {
            let pm = m.eq_ignore_ascii_case("pm");
            Some(hour % 12 + if pm { 12 } else { 0 })
        }
        _ => None,
    }
}

fn parse_relative_day(relation: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    match relation {
        None => Some(today),
        Some(day) if day.eq_ignore_ascii_case("today") => Some(today),
        Some(day) if day.eq_ignore_ascii_case("yesterday") => today.pred_opt(),
        Some(day) => {
            let weekday = day.parse().ok()?;
            find_last_day(today, weekday)
        }
    }
}

fn find_last_day(today: NaiveDate, day_of_week: Weekday) -> Option<NaiveDate> {
    let current_day = today.weekday();
    match current_day.days_since(day_of_week) {
        // don't allow user to specify "monday" on a monday,
        // as it is ambiguous if they mean today or last monday
        0 => None,
        n => Some(today - (Days::new(n as u64))),
    }
}

fn capture_with_default<T: FromStr>(m: Option<Match>, default: T) -> T {
    m.and_then(|m| m.as_str().parse().ok()).unwrap_or(default)
}
