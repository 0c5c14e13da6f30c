use std::cmp::Reverse;

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools as _;

use crate::records::{hours, Entry, Rounding};

/// Time and estimated earnings for one project over a period.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub project: String,
    pub duration: Duration,
    pub entries: usize,
    /// Sum over the entries that carry a rate; `None` if none of them do.
    pub earnings: Option<f64>,
}

impl ProjectSummary {
    /// Percentage of `total` spent on this project.
    pub fn share_of(&self, total: Duration) -> f64 {
        if total <= Duration::zero() {
            return 0.0;
        }
        hours(self.duration) / hours(total) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total: Duration,
    pub entries: usize,
    pub earnings: Option<f64>,
    /// Longest first.
    pub projects: Vec<ProjectSummary>,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

pub fn summarize(entries: &[Entry], now: DateTime<Utc>, rounding: Rounding) -> Summary {
    let projects = entries
        .iter()
        .into_group_map_by(|entry| entry.project.clone())
        .into_iter()
        .map(|(project, entries)| ProjectSummary {
            duration: entries
                .iter()
                .fold(Duration::zero(), |sum, entry| sum + entry.duration_at(now)),
            entries: entries.len(),
            earnings: sum_earnings(entries.iter().copied(), now, rounding),
            project,
        })
        .sorted_by_key(|summary| (Reverse(summary.duration), summary.project.clone()))
        .collect::<Vec<_>>();

    Summary {
        total: projects
            .iter()
            .fold(Duration::zero(), |sum, project| sum + project.duration),
        entries: entries.len(),
        earnings: projects
            .iter()
            .filter_map(|project| project.earnings)
            .reduce(|a, b| a + b),
        projects,
    }
}

fn sum_earnings<'a>(
    entries: impl Iterator<Item = &'a Entry>,
    now: DateTime<Utc>,
    rounding: Rounding,
) -> Option<f64> {
    entries
        .filter_map(|entry| entry.earnings_at(now, rounding))
        .reduce(|a, b| a + b)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn dt(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 12, hour, min, 0).unwrap()
    }

    fn entry(project: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>, rate: Option<f64>) -> Entry {
        Entry {
            id: 0,
            project: project.into(),
            started_at: start,
            ended_at: end,
            description: String::new(),
            hourly_rate: rate,
            milestone: None,
        }
    }

    #[test]
    fn groups_by_project_longest_first() {
        let entries = vec![
            entry("web", dt(9, 0), Some(dt(10, 0)), Some(100.0)),
            entry("api", dt(10, 0), Some(dt(12, 0)), None),
            entry("web", dt(13, 0), None, Some(50.0)),
        ];

        let summary = summarize(&entries, dt(14, 30), Rounding::default());
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.total, Duration::minutes(270));
        assert_eq!(summary.earnings, Some(175.0));

        let web = &summary.projects[0];
        assert_eq!(web.project, "web");
        assert_eq!(web.duration, Duration::minutes(150));
        assert_eq!(web.entries, 2);
        assert_eq!(web.earnings, Some(175.0));

        let api = &summary.projects[1];
        assert_eq!(api.project, "api");
        assert_eq!(api.earnings, None);
        assert!((api.share_of(summary.total) - 44.444).abs() < 0.001);
    }

    #[test]
    fn earnings_follow_the_rounding_policy() {
        let entries = vec![entry("web", dt(9, 0), Some(dt(9, 8)), Some(60.0))];
        let summary = summarize(&entries, dt(12, 0), Rounding::to_minutes(15));
        assert_eq!(summary.earnings, Some(15.0));
    }

    #[test]
    fn empty_periods_have_no_projects() {
        let summary = summarize(&[], dt(12, 0), Rounding::default());
        assert!(summary.is_empty());
        assert!(summary.projects.is_empty());
        assert_eq!(summary.earnings, None);
        assert_eq!(summary.total, Duration::zero());
    }
}
