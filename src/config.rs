// SPDX-License-Identifier: MPL-2.0

use std::{
    fs::{self, read_to_string},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context as _, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{parse, records::Rounding};

const DATA_DIR: &str = ".tmpo";
const DEV_DATA_DIR: &str = ".tmpo-dev";
pub const DEV_ENV_VAR: &str = "TMPO_DEV";
pub const DEFAULT_CURRENCY: &str = "USD";

/// The per-user data directory, `~/.tmpo` (or `~/.tmpo-dev` in development
/// mode).
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(anyhow!("Could not determine the home directory"))?;
    let dev_mode = std::env::var(DEV_ENV_VAR).ok();
    Ok(home.join(data_dir_name(dev_mode.as_deref())))
}

fn data_dir_name(dev_mode: Option<&str>) -> &'static str {
    match dev_mode {
        Some(value) if value == "1" || value.eq_ignore_ascii_case("true") => DEV_DATA_DIR,
        _ => DATA_DIR,
    }
}

/// Files living in the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub database: PathBuf,
    pub config: PathBuf,
    pub projects: PathBuf,
}

impl Paths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            database: dir.join("tmpo.db"),
            config: dir.join("config.toml"),
            projects: dir.join("projects.toml"),
        }
    }

    pub fn resolve() -> Result<Self> {
        let dir = data_dir()?;
        log::trace!("Using data directory {dir:?}");
        Ok(Self::in_dir(&dir))
    }
}

/// User-wide settings from `config.toml`.  Every field may be left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub currency: String,
    pub date_format: String,
    pub time_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub export_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rounding_minutes: Option<u32>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.into(),
            date_format: DateFormat::default().as_str().into(),
            time_format: TimeFormat::default().as_str().into(),
            timezone: None,
            export_path: String::new(),
            rounding_minutes: None,
        }
    }
}

impl GlobalConfig {
    /// Loads the configuration, falling back to defaults if the file does not
    /// exist.  A file that exists but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        log::debug!("Reading configuration at path {path:?}");
        let contents = match read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::trace!("No config at {path:?} (assuming no config file set yet)");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Could not read config at {path:?}"))
            }
        };
        toml::from_str(&contents)
            .with_context(|| format!("Could not parse config at {path:?} (check the file syntax)"))
    }

    /// Like [`GlobalConfig::load`], but a file that cannot be parsed only
    /// warns and yields the defaults, so that it can be rewritten.
    pub fn load_for_repair(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            log::warn!("{err:#}; starting from the default configuration");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create config directory {dir:?}"))?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("Could not write config to {path:?}"))?;
        log::debug!("Saved configuration to {path:?}");
        Ok(())
    }

    /// The configured ISO 4217 code in upper case, or USD if it is not a
    /// three letter code.
    pub fn currency_code(&self) -> String {
        let code = self.currency.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            code
        } else {
            if !code.is_empty() {
                log::warn!("Unknown currency `{}`, using {DEFAULT_CURRENCY}", self.currency);
            }
            DEFAULT_CURRENCY.into()
        }
    }

    /// Where exports are written unless a project overrides it.
    pub fn export_dir(&self) -> PathBuf {
        expand_path(&self.export_path)
    }

    pub fn zone(&self) -> Zone {
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => Zone::Local,
            Some(name) if name.eq_ignore_ascii_case("UTC") || name == "Etc/UTC" => Zone::Utc,
            Some(name) => match tzfile::Tz::named(name) {
                Ok(tz) => Zone::Named(tz),
                Err(err) => {
                    log::warn!("Unknown timezone `{name}` ({err}), using the local timezone");
                    Zone::Local
                }
            },
        }
    }

    pub fn rounding(&self) -> Rounding {
        Rounding::from_config(self.rounding_minutes)
    }
}

/// Expands a leading `~/` to the home directory.  An empty path means the
/// current directory.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    if path.is_empty() {
        return PathBuf::from(".");
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateFormat {
    #[default]
    MonthDayYear,
    DayMonthYear,
    Iso,
}

impl DateFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "DD/MM/YYYY" => Self::DayMonthYear,
            "YYYY-MM-DD" => Self::Iso,
            _ => Self::MonthDayYear,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MonthDayYear => "MM/DD/YYYY",
            Self::DayMonthYear => "DD/MM/YYYY",
            Self::Iso => "YYYY-MM-DD",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Self::MonthDayYear => "%m/%d/%Y",
            Self::DayMonthYear => "%d/%m/%Y",
            Self::Iso => "%Y-%m-%d",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeFormat {
    #[default]
    TwelveHour,
    TwentyFourHour,
}

impl TimeFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "24-hour" => Self::TwentyFourHour,
            _ => Self::TwelveHour,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwelveHour => "12-hour",
            Self::TwentyFourHour => "24-hour",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Self::TwelveHour => "%-I:%M %p",
            Self::TwentyFourHour => "%H:%M",
        }
    }
}

/// The zone used to show times and interpret typed ones.
pub enum Zone {
    Utc,
    Named(tzfile::Tz),
    Local,
}

impl Zone {
    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Zone::Utc => instant.fixed_offset(),
            Zone::Named(tz) => instant.with_timezone(&tz).fixed_offset(),
            Zone::Local => instant.with_timezone(&Local).fixed_offset(),
        }
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.localize(now).date_naive()
    }

    pub fn parse_date(&self, input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Zone::Utc => parse::parse_date(input, &Utc, now),
            Zone::Named(tz) => parse::parse_date(input, &tz, now),
            Zone::Local => parse::parse_date(input, &Local, now),
        }
    }

    pub fn parse_boundary(&self, input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Zone::Utc => parse::parse_boundary(input, &Utc, now),
            Zone::Named(tz) => parse::parse_boundary(input, &tz, now),
            Zone::Local => parse::parse_boundary(input, &Local, now),
        }
    }

    pub fn start_of_day(&self, day: NaiveDate) -> Option<DateTime<Utc>> {
        match self {
            Zone::Utc => parse::start_of_day(&Utc, day),
            Zone::Named(tz) => parse::start_of_day(&tz, day),
            Zone::Local => parse::start_of_day(&Local, day),
        }
    }
}

/// Everything needed to render dates, times and money, resolved once from the
/// configuration.
pub struct DisplayPrefs {
    pub date_format: DateFormat,
    pub time_format: TimeFormat,
    pub zone: Zone,
    pub currency: String,
    pub rounding: Rounding,
}

impl DisplayPrefs {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            date_format: DateFormat::parse(&config.date_format),
            time_format: TimeFormat::parse(&config.time_format),
            zone: config.zone(),
            currency: config.currency_code(),
            rounding: config.rounding(),
        }
    }

    pub fn date(&self, instant: DateTime<Utc>) -> String {
        self.zone
            .localize(instant)
            .format(self.date_format.pattern())
            .to_string()
    }

    pub fn time(&self, instant: DateTime<Utc>) -> String {
        self.zone
            .localize(instant)
            .format(self.time_format.pattern())
            .to_string()
    }

    pub fn date_time(&self, instant: DateTime<Utc>) -> String {
        format!("{} {}", self.date(instant), self.time(instant))
    }

    pub fn money(&self, amount: f64) -> String {
        format!("{amount:.2} {}", self.currency)
    }
}
