use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::records::{hours, Entry};

const CSV_HEADER: [&str; 6] = [
    "Project",
    "Start Time",
    "End Time",
    "Duration (hours)",
    "Description",
    "Milestone",
];
const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

/// `tmpo-export-<date>.<ext>`, dated in UTC.
pub fn default_file_name(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!("tmpo-export-{}.{}", now.format("%Y-%m-%d"), format.extension())
}

/// Writes `entries` to `path`, creating its directory if needed.  Running
/// entries are measured up to `now`.
pub fn export_to_path(
    path: &Path,
    format: ExportFormat,
    entries: &[Entry],
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Could not create export directory {dir:?}"))?;
    }
    let file = File::create(path).with_context(|| format!("Could not create {path:?}"))?;
    let mut writer = BufWriter::new(file);
    match format {
        ExportFormat::Csv => write_csv(&mut writer, entries, now)?,
        ExportFormat::Json => write_json(&mut writer, entries, now)?,
    }
    writer.flush()?;
    log::info!("Exported {} entries to {path:?}", entries.len());
    Ok(path.to_path_buf())
}

pub fn write_csv(writer: &mut impl Write, entries: &[Entry], now: DateTime<Utc>) -> Result<()> {
    write_csv_row(writer, CSV_HEADER)?;
    for entry in entries {
        let end_time = entry
            .ended_at
            .map(|end| end.format(CSV_TIME_FORMAT).to_string())
            .unwrap_or_default();
        write_csv_row(
            writer,
            [
                entry.project.as_str(),
                entry.started_at.format(CSV_TIME_FORMAT).to_string().as_str(),
                end_time.as_str(),
                format!("{:.2}", entry.hours_at(now)).as_str(),
                entry.description.as_str(),
                entry.milestone.as_deref().unwrap_or_default(),
            ],
        )?;
    }
    Ok(())
}

fn write_csv_row<'a>(
    writer: &mut impl Write,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let line = fields
        .into_iter()
        .map(quote_csv_field)
        .collect::<Vec<_>>()
        .join(",");
    writeln!(writer, "{line}")?;
    Ok(())
}

fn quote_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[derive(Debug, Serialize)]
struct JsonEntry<'a> {
    project: &'a str,
    start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    duration_hours: f64,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    milestone: Option<&'a str>,
}

impl<'a> JsonEntry<'a> {
    fn new(entry: &'a Entry, now: DateTime<Utc>) -> Self {
        Self {
            project: &entry.project,
            start_time: rfc3339(entry.started_at),
            end_time: entry.ended_at.map(rfc3339),
            duration_hours: hours(entry.duration_at(now)),
            description: &entry.description,
            milestone: entry.milestone.as_deref(),
        }
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn write_json(writer: &mut impl Write, entries: &[Entry], now: DateTime<Utc>) -> Result<()> {
    let entries = entries
        .iter()
        .map(|entry| JsonEntry::new(entry, now))
        .collect::<Vec<_>>();
    serde_json::to_writer_pretty(&mut *writer, &entries)?;
    writeln!(writer)?;
    Ok(())
}
