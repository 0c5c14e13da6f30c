use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::{
    config::DisplayPrefs,
    records::{Entry, Milestone},
    stats::Summary,
};

/// Prints entries as a table, newest first, showing each date once.
pub fn print_entries(
    writer: &mut impl Write,
    now: DateTime<Utc>,
    entries: &[Entry],
    prefs: &DisplayPrefs,
) -> Result<()> {
    if entries.is_empty() {
        writeln!(writer, "No time entries found.")?;
        return Ok(());
    }

    write_line(
        writer,
        format!(
            "{:10}  {:19}  {:>5}  {:>11}  {:12}  {}",
            "Date", "Times", "ID", "Duration", "Project", "Description"
        ),
    )?;
    let mut last_date = None;
    let mut total = Duration::zero();
    for entry in entries {
        let date = prefs.date(entry.started_at);
        let date_column = if last_date.as_ref() != Some(&date) {
            last_date = Some(date.clone());
            date
        } else {
            String::new()
        };

        let times = format!(
            "{}-{}",
            prefs.time(entry.started_at),
            entry.ended_at.map(|end| prefs.time(end)).unwrap_or_default()
        );
        let mut description = entry.description.clone();
        if let Some(milestone) = &entry.milestone {
            description.push_str(&format!(" [{milestone}]"));
        }

        let duration = entry.duration_at(now);
        total += duration;
        write_line(
            writer,
            format!(
                "{:10}  {:19}  {:>5}  {:>11}  {:12}  {}",
                date_column,
                times,
                entry.id,
                duration_to_string(duration),
                entry.project,
                description.trim(),
            ),
        )?;
    }
    writeln!(writer)?;
    writeln!(
        writer,
        "Total: {} ({:.2} hours)",
        duration_to_string(total),
        prefs.rounding.apply(total)
    )?;
    Ok(())
}

/// Prints what is being tracked right now.
pub fn print_status(
    writer: &mut impl Write,
    now: DateTime<Utc>,
    running: Option<&Entry>,
    prefs: &DisplayPrefs,
) -> Result<()> {
    let Some(entry) = running else {
        writeln!(writer, "Not tracking any time right now.")?;
        return Ok(());
    };

    writeln!(
        writer,
        "Tracking `{}` since {} ({})",
        entry.project,
        prefs.date_time(entry.started_at),
        duration_to_string(entry.duration_at(now))
    )?;
    if !entry.description.is_empty() {
        writeln!(writer, "    Description: {}", entry.description)?;
    }
    if let Some(milestone) = &entry.milestone {
        writeln!(writer, "    Milestone: {milestone}")?;
    }
    if let Some(earnings) = entry.earnings_at(now, prefs.rounding) {
        writeln!(writer, "    Estimated earnings: {}", prefs.money(earnings))?;
    }
    Ok(())
}

/// Prints a single entry after it was created or changed.
pub fn print_entry(
    writer: &mut impl Write,
    now: DateTime<Utc>,
    entry: &Entry,
    prefs: &DisplayPrefs,
) -> Result<()> {
    let end = entry
        .ended_at
        .map(|end| prefs.date_time(end))
        .unwrap_or_else(|| "now".into());
    writeln!(
        writer,
        "#{} {}: {} - {} ({})",
        entry.id,
        entry.project,
        prefs.date_time(entry.started_at),
        end,
        duration_to_string(entry.duration_at(now))
    )?;
    if !entry.description.is_empty() {
        writeln!(writer, "    {}", entry.description)?;
    }
    Ok(())
}

pub fn print_summary(
    writer: &mut impl Write,
    title: &str,
    summary: &Summary,
    prefs: &DisplayPrefs,
) -> Result<()> {
    if summary.is_empty() {
        writeln!(writer, "No entries for {title}.")?;
        return Ok(());
    }

    writeln!(writer, "Stats for {title}")?;
    writeln!(
        writer,
        "    Total time:  {} ({:.2} hours)",
        duration_to_string(summary.total),
        prefs.rounding.apply(summary.total)
    )?;
    writeln!(writer, "    Entries:     {}", summary.entries)?;
    if let Some(earnings) = summary.earnings {
        writeln!(writer, "    Earnings:    {}", prefs.money(earnings))?;
    }
    writeln!(writer)?;
    writeln!(writer, "    By project:")?;
    for project in &summary.projects {
        let mut line = format!(
            "        {:20}  {:>11}  ({:5.1}%)",
            project.project,
            duration_to_string(project.duration),
            project.share_of(summary.total)
        );
        if let Some(earnings) = project.earnings {
            line.push_str(&format!("  {}", prefs.money(earnings)));
        }
        write_line(writer, line)?;
    }
    Ok(())
}

pub fn print_milestones(
    writer: &mut impl Write,
    now: DateTime<Utc>,
    milestones: &[Milestone],
    prefs: &DisplayPrefs,
) -> Result<()> {
    if milestones.is_empty() {
        writeln!(writer, "No milestones found.")?;
        return Ok(());
    }

    write_line(
        writer,
        format!(
            "{:12}  {:20}  {:10}  {:10}  {:>11}",
            "Project", "Milestone", "Started", "Finished", "Duration"
        ),
    )?;
    for milestone in milestones {
        let finished = match milestone.ended_at {
            Some(end) => prefs.date(end),
            None => "active".into(),
        };
        write_line(
            writer,
            format!(
                "{:12}  {:20}  {:10}  {:10}  {:>11}",
                milestone.project,
                milestone.name,
                prefs.date(milestone.started_at),
                finished,
                duration_to_string(milestone.duration_at(now)),
            ),
        )?;
    }
    Ok(())
}

/// Prints a milestone with the time tracked against it.
pub fn print_milestone_status(
    writer: &mut impl Write,
    now: DateTime<Utc>,
    milestone: &Milestone,
    entries: &[Entry],
    prefs: &DisplayPrefs,
) -> Result<()> {
    let tracked = entries
        .iter()
        .fold(Duration::zero(), |sum, entry| sum + entry.duration_at(now));
    writeln!(
        writer,
        "Milestone `{}` for {} (started {}, {})",
        milestone.name,
        milestone.project,
        prefs.date_time(milestone.started_at),
        if milestone.is_active() { "active" } else { "finished" },
    )?;
    writeln!(writer, "    Running for: {}", duration_to_string(milestone.duration_at(now)))?;
    writeln!(writer, "    Entries:     {}", entries.len())?;
    writeln!(
        writer,
        "    Tracked:     {} ({:.2} hours)",
        duration_to_string(tracked),
        prefs.rounding.apply(tracked)
    )?;
    Ok(())
}

fn write_line(writer: &mut impl Write, line: String) -> Result<()> {
    writeln!(writer, "{}", line.trim_end())?;
    Ok(())
}

/// `1d 2h 3m 4s`, dropping leading zero units.
pub fn duration_to_string(mut duration: Duration) -> String {
    if duration < Duration::zero() {
        return format!("-{}", duration_to_string(-duration));
    }

    let mut buf = String::new();
    let days = duration.num_days();
    duration -= Duration::days(days);
    let hours = duration.num_hours();
    duration -= Duration::hours(hours);
    let minutes = duration.num_minutes();
    duration -= Duration::minutes(minutes);
    let seconds = duration.num_seconds();

    for (value, unit) in [(days, 'd'), (hours, 'h'), (minutes, 'm'), (seconds, 's')] {
        if value > 0 || !buf.is_empty() || unit == 's' {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(&value.to_string());
            buf.push(unit);
        }
    }
    buf
}
