use chrono::{DateTime, Duration, Utc};

/// A single tracked interval of work on a project.
///
/// `ended_at` being `None` means the entry is still running.  The milestone is
/// only a label: it may name a milestone that has since been finished, renamed,
/// or that never existed at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: i32,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub description: String,
    /// Rate copied from the project configuration when the entry was created.
    pub hourly_rate: Option<f64>,
    pub milestone: Option<String>,
}

impl Entry {
    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Elapsed time, measured against `now` if the entry is still running.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration_at(Utc::now())
    }

    pub fn hours_at(&self, now: DateTime<Utc>) -> f64 {
        hours(self.duration_at(now))
    }

    /// Billable hours according to the given rounding policy.
    pub fn rounded_hours_at(&self, now: DateTime<Utc>, rounding: Rounding) -> f64 {
        rounding.apply(self.duration_at(now))
    }

    pub fn rounded_hours(&self, rounding: Rounding) -> f64 {
        self.rounded_hours_at(Utc::now(), rounding)
    }

    /// Estimated earnings for this entry, if a rate was recorded for it.
    pub fn earnings_at(&self, now: DateTime<Utc>, rounding: Rounding) -> Option<f64> {
        self.hourly_rate
            .map(|rate| self.rounded_hours_at(now, rounding) * rate)
    }
}

/// A named, time-boxed tag scoped to one project.
#[derive(Debug, Clone, PartialEq)]
pub struct Milestone {
    pub id: i32,
    pub project: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration_at(Utc::now())
    }
}

/// How durations are turned into billable hours.
///
/// The default rounds the hour value to two decimal places.  With an
/// increment set, the duration is first rounded to the nearest multiple of
/// that many minutes (e.g. 15 for quarter hours).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rounding {
    increment_minutes: Option<u32>,
}

impl Rounding {
    pub fn to_minutes(minutes: u32) -> Self {
        Self {
            increment_minutes: (minutes > 0).then_some(minutes),
        }
    }

    pub fn from_config(minutes: Option<u32>) -> Self {
        minutes.map(Self::to_minutes).unwrap_or_default()
    }

    pub fn increment_minutes(&self) -> Option<u32> {
        self.increment_minutes
    }

    pub fn apply(&self, duration: Duration) -> f64 {
        let duration = match self.increment_minutes {
            Some(minutes) => round_to_nearest(duration, minutes),
            None => duration,
        };
        round_to_hundredths(hours(duration))
    }
}

/// Converts a duration to fractional hours, keeping sub-second precision.
pub fn hours(duration: Duration) -> f64 {
    match duration.num_microseconds() {
        Some(micros) => micros as f64 / 3_600_000_000.0,
        None => duration.num_seconds() as f64 / 3_600.0,
    }
}

// f64::round rounds half away from zero
fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round_to_nearest(duration: Duration, minutes: u32) -> Duration {
    let unit = i64::from(minutes) * 60;
    let seconds = duration.num_seconds();
    let remainder = seconds.rem_euclid(unit);
    if remainder * 2 >= unit {
        Duration::seconds(seconds - remainder + unit)
    } else {
        Duration::seconds(seconds - remainder)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn dt(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 12, hour, min, sec).unwrap()
    }

    fn entry(started_at: DateTime<Utc>, ended_at: Option<DateTime<Utc>>) -> Entry {
        Entry {
            id: 1,
            project: "blob".into(),
            started_at,
            ended_at,
            description: String::new(),
            hourly_rate: Some(80.0),
            milestone: None,
        }
    }

    #[test]
    fn completed_entry_duration_ignores_now() {
        let entry = entry(dt(9, 0, 0), Some(dt(10, 30, 0)));
        assert_eq!(entry.duration_at(dt(9, 15, 0)), Duration::minutes(90));
        assert_eq!(entry.duration_at(dt(23, 0, 0)), Duration::minutes(90));
        assert!(!entry.is_running());
    }

    #[test]
    fn running_entry_duration_is_measured_against_now() {
        let entry = entry(dt(9, 0, 0), None);
        assert!(entry.is_running());
        assert_eq!(entry.duration_at(dt(9, 20, 0)), Duration::minutes(20));
        assert_eq!(entry.duration_at(dt(11, 0, 0)), Duration::hours(2));
    }

    #[test]
    fn rounded_hours_defaults_to_two_decimal_places() {
        // 1h 20m = 1.3333.. hours
        let entry = entry(dt(9, 0, 0), Some(dt(10, 20, 0)));
        assert_eq!(entry.rounded_hours(Rounding::default()), 1.33);

        // 18 seconds = 0.005 hours, rounds away from zero
        let entry = Entry {
            ended_at: Some(dt(9, 0, 18)),
            ..entry
        };
        assert_eq!(entry.rounded_hours(Rounding::default()), 0.01);
    }

    #[test]
    fn rounded_hours_can_use_minute_increments() {
        let entry = entry(dt(9, 0, 0), Some(dt(10, 8, 0)));
        assert_eq!(entry.rounded_hours(Rounding::to_minutes(15)), 1.25);

        let entry = Entry {
            ended_at: Some(dt(10, 7, 29)),
            ..entry
        };
        assert_eq!(entry.rounded_hours(Rounding::to_minutes(15)), 1.0);
    }

    #[test]
    fn zero_minute_increment_means_no_increment() {
        assert_eq!(Rounding::to_minutes(0), Rounding::default());
        assert_eq!(Rounding::from_config(None), Rounding::default());
        assert_eq!(Rounding::from_config(Some(6)).increment_minutes(), Some(6));
    }

    #[test]
    fn earnings_use_the_rate_snapshot() {
        let entry = entry(dt(9, 0, 0), Some(dt(10, 30, 0)));
        assert_eq!(entry.earnings_at(dt(12, 0, 0), Rounding::default()), Some(120.0));

        let entry = Entry {
            hourly_rate: None,
            ..entry
        };
        assert_eq!(entry.earnings_at(dt(12, 0, 0), Rounding::default()), None);
    }

    #[test]
    fn milestone_is_active_until_finished() {
        let mut milestone = Milestone {
            id: 1,
            project: "blob".into(),
            name: "Sprint 1".into(),
            started_at: dt(8, 0, 0),
            ended_at: None,
        };
        assert!(milestone.is_active());
        assert_eq!(milestone.duration_at(dt(9, 0, 0)), Duration::hours(1));

        milestone.ended_at = Some(dt(8, 30, 0));
        assert!(!milestone.is_active());
        assert_eq!(milestone.duration_at(dt(9, 0, 0)), Duration::minutes(30));
    }
}
