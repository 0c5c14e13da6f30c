use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Utc};
use regex::Regex;

static REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?xi)
^ # anchor to start of string

(\d+)
\s*
(?:
  (?: # days
    (d)(?:ay|ays)?
  ) | (?: # weeks
    (w)(?:k|eek|ks|eeks)?
  ) | (?: # months
    (m)(?:o|onth|os|onths)?
  ) | (?: # years
    (y)(?:r|e|ear|rs|es|ears)?
  )
)
$ # anchor to end of string
",
    )
    .expect("Could not parse Regex")
});

/// Parses a period boundary such as `3d`, `2 weeks` or `1y` into the start of
/// that period, counting the current one as the first.
///
/// `today` and `yesterday` name the start of those days, while `now` names
/// the end of today (the start of tomorrow).
pub fn parse_relative_date<Tz>(date: &str, timezone: &Tz, today: NaiveDate) -> Option<DateTime<Utc>>
where
    Tz: TimeZone,
{
    let date = date.trim();
    if date.eq_ignore_ascii_case("now") {
        let tomorrow = today.succ_opt()?;
        return start_of_day(timezone, tomorrow);
    }
    if date.eq_ignore_ascii_case("today") {
        return start_of_day(timezone, today);
    }
    if date.eq_ignore_ascii_case("yesterday") {
        return start_of_day(timezone, today.pred_opt()?);
    }

    let captures = REGEX.captures(date)?;
    let count = captures[1].parse::<u32>().ok()?.saturating_sub(1);
    let start_date = if captures.get(2).is_some() {
        today.checked_sub_days(Days::new(count.into()))?
    } else if captures.get(3).is_some() {
        let week_start = start_of_week(today);
        week_start.checked_sub_days(Days::new(count.checked_mul(7)?.into()))?
    } else if captures.get(4).is_some() {
        today.checked_sub_months(Months::new(count))?.with_day(1)?
    } else if captures.get(5).is_some() {
        let year = today.year().checked_sub(i32::try_from(count).ok()?)?;
        today.with_day(1)?.with_month(1)?.with_year(year)?
    } else {
        return None;
    };
    start_of_day(timezone, start_date)
}

/// The Monday on or before `day`.
pub fn start_of_week(day: NaiveDate) -> NaiveDate {
    day - Days::new(day.weekday().num_days_from_monday().into())
}

/// Midnight at the start of `day` in `timezone`, as a UTC instant.
pub fn start_of_day<Tz>(timezone: &Tz, day: NaiveDate) -> Option<DateTime<Utc>>
where
    Tz: TimeZone,
{
    let start = timezone
        .with_ymd_and_hms(day.year(), day.month(), day.day(), 0, 0, 0)
        .earliest()?
        .with_timezone(&Utc);
    Some(start)
}
