use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Days, Utc};
use clap::{Args, Parser, Subcommand};

use crate::{config::Zone, export::ExportFormat, parse::start_of_week};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    /// increase the verbosity
    ///
    /// This flag can be used multiple times to increase the amount of information
    /// produced by tmpo
    #[arg(global = true, short, long, action = clap::ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// output no logging
    ///
    /// Setting quiet disables all logging to stderr.  Data will only be printed
    /// to stdout, and only for commands that output information as their main
    /// action.
    #[arg(global = true, long, action = clap::ArgAction::SetTrue, help_heading = "Logging")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start tracking time
    ///
    /// Starts a new running entry for the current project.  The project is
    /// taken from --project if given, otherwise from the nearest .tmporc file,
    /// the enclosing git repository, or the current directory name.  Only one
    /// entry can run at a time.
    Start(Start),

    /// Stop tracking time
    Stop,

    /// Pause the running entry
    ///
    /// Stops the running entry so that it can be continued later with
    /// `tmpo resume`.
    Pause,

    /// Continue the last stopped session
    ///
    /// Starts a new entry with the project, description, rate and milestone
    /// of the most recently stopped entry of the project.
    Resume(ProjectArg),

    /// Show the running entry
    Status,

    /// List time entries
    #[clap(aliases = &["ls", "list"])]
    Log(Log),

    /// Add a completed entry for a past period
    Manual(Manual),

    /// Change an existing entry
    Edit(Edit),

    /// Delete an entry
    Delete(Delete),

    /// Show totals per project
    Stats(Stats),

    /// Export entries to CSV or JSON
    Export(Export),

    /// Manage milestones
    #[command(subcommand)]
    Milestone(MilestoneCommand),

    /// Create a project configuration
    ///
    /// By default writes a .tmporc file into the current directory.  With
    /// --global, registers a project that can be tracked from any directory
    /// using --project.
    Init(Init),

    /// Show or change global preferences
    ///
    /// Without any flags, prints the current configuration.
    Config(Config),

    /// Manage globally registered projects
    #[command(subcommand)]
    Projects(ProjectsCommand),
}

#[derive(Args, Debug)]
pub struct ProjectArg {
    /// project to use instead of the detected one
    ///
    /// The project must be registered globally (see `tmpo init --global`).
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Args, Debug)]
pub struct Start {
    /// what you are working on
    pub description: Option<String>,

    #[command(flatten)]
    pub project: ProjectArg,
}

#[derive(Args, Debug)]
pub struct Range {
    /// show entries starting from this point
    ///
    /// Accepts a date and time (`2024-01-05 13:00`, `yesterday 9:30am`), a
    /// date (`2024-01-05`), or a relative period such as `3 days`, `2w` or
    /// `1 month`, which are rounded to the start of that period.
    #[arg(short = 's', long)]
    pub since: Option<String>,

    /// show entries starting before this point
    ///
    /// Accepts the same formats as --since.  The keyword "now" means the end
    /// of today.
    #[arg(short = 'u', long)]
    pub until: Option<String>,

    /// only today's entries
    #[arg(short = 't', long, conflicts_with_all = ["since", "until", "week"])]
    pub today: bool,

    /// only this week's entries (starting on Monday)
    #[arg(short = 'w', long, conflicts_with_all = ["since", "until"])]
    pub week: bool,
}

/// A resolved time range, `start <= started_at <= end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
}

impl Range {
    /// The period selected by the flags, or `None` if no flag was given.
    pub fn resolve(&self, zone: &Zone, now: DateTime<Utc>) -> Result<Option<Period>> {
        let today = zone.today(now);
        let (start_day, days, label) = if self.today {
            (today, 1, "Today")
        } else if self.week {
            (start_of_week(today), 7, "This Week")
        } else {
            return self.resolve_bounds(zone, now);
        };

        let start = zone
            .start_of_day(start_day)
            .ok_or(anyhow!("Could not determine the start of {start_day}"))?;
        let end_day = start_day + Days::new(days);
        let end = zone
            .start_of_day(end_day)
            .ok_or(anyhow!("Could not determine the start of {end_day}"))?;
        Ok(Some(Period {
            start,
            end,
            label: label.into(),
        }))
    }

    fn resolve_bounds(&self, zone: &Zone, now: DateTime<Utc>) -> Result<Option<Period>> {
        if self.since.is_none() && self.until.is_none() {
            return Ok(None);
        }
        let start = match &self.since {
            Some(since) => zone.parse_boundary(since, now)?,
            None => DateTime::<Utc>::UNIX_EPOCH,
        };
        let until = self.until.as_deref().unwrap_or("now");
        let end = zone.parse_boundary(until, now)?;
        if end < start {
            bail!("The end of the range ({until}) is before its start");
        }
        let label = match &self.since {
            Some(since) => format!("{since} until {until}"),
            None => format!("everything until {until}"),
        };
        Ok(Some(Period { start, end, label }))
    }
}

#[derive(Args, Debug)]
pub struct Log {
    /// only show entries for this project
    #[arg(short, long)]
    pub project: Option<String>,

    /// only show entries tagged with this milestone (requires --project)
    #[arg(short, long, requires = "project")]
    pub milestone: Option<String>,

    /// maximum number of entries to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,

    #[command(flatten)]
    pub range: Range,
}

#[derive(Args, Debug)]
pub struct Manual {
    /// when the work started
    #[arg(short = 's', long)]
    pub start: String,

    /// when the work ended
    #[arg(short = 'e', long)]
    pub end: String,

    /// what was done
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// milestone to tag the entry with
    ///
    /// Defaults to the project's active milestone, if any.
    #[arg(short, long)]
    pub milestone: Option<String>,

    #[command(flatten)]
    pub project: ProjectArg,
}

#[derive(Args, Debug)]
pub struct Edit {
    /// id of the entry, as shown by `tmpo log`
    pub id: i32,

    /// new project name
    #[arg(short, long)]
    pub project: Option<String>,

    /// new description
    #[arg(short, long)]
    pub description: Option<String>,

    /// new start time
    #[arg(short = 's', long)]
    pub start: Option<String>,

    /// new end time
    #[arg(short = 'e', long)]
    pub end: Option<String>,

    /// new hourly rate
    #[arg(short, long)]
    pub rate: Option<f64>,

    /// new milestone
    #[arg(short, long, conflicts_with = "clear_milestone")]
    pub milestone: Option<String>,

    /// remove the milestone from the entry
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub clear_milestone: bool,
}

#[derive(Args, Debug)]
pub struct Delete {
    /// id of the entry, as shown by `tmpo log`
    pub id: i32,
}

#[derive(Args, Debug)]
pub struct Stats {
    /// only count entries for this project
    #[arg(short, long)]
    pub project: Option<String>,

    #[command(flatten)]
    pub range: Range,
}

#[derive(Args, Debug)]
pub struct Export {
    /// output format
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: ExportFormat,

    /// file to write
    ///
    /// Defaults to tmpo-export-<date>.<ext> in the project's export path, or
    /// the globally configured export path.
    #[arg(short, long)]
    pub output: Option<std::path::PathBuf>,

    /// only export entries for this project
    #[arg(short, long)]
    pub project: Option<String>,

    #[command(flatten)]
    pub range: Range,
}

#[derive(Subcommand, Debug)]
pub enum MilestoneCommand {
    /// Start a milestone for the current project
    ///
    /// New entries of the project are tagged with the active milestone until
    /// it is finished.
    Start(MilestoneStart),

    /// Finish the active milestone of the current project
    Finish(ProjectArg),

    /// Show the active milestone of the current project
    Status(ProjectArg),

    /// List milestones
    #[clap(aliases = &["ls"])]
    List(MilestoneList),
}

#[derive(Args, Debug)]
pub struct MilestoneStart {
    /// name of the milestone, unique within the project
    pub name: String,

    #[command(flatten)]
    pub project: ProjectArg,
}

#[derive(Args, Debug)]
pub struct MilestoneList {
    #[command(flatten)]
    pub project: ProjectArg,

    /// list milestones of every project
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct Init {
    /// register a global project instead of writing a .tmporc file
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub global: bool,

    /// project name
    ///
    /// Defaults to the detected project name for .tmporc files.  Required
    /// with --global.
    #[arg(short, long, required_if_eq("global", "true"))]
    pub name: Option<String>,

    /// hourly rate used to estimate earnings
    #[arg(short, long)]
    pub rate: Option<f64>,

    /// short description of the project
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// directory for exports of this project
    #[arg(short, long)]
    pub export_path: Option<String>,
}

#[derive(Args, Debug)]
pub struct Config {
    /// ISO 4217 currency code, e.g. USD or EUR
    #[arg(long)]
    pub currency: Option<String>,

    /// one of MM/DD/YYYY, DD/MM/YYYY or YYYY-MM-DD
    #[arg(long)]
    pub date_format: Option<String>,

    /// either 12-hour or 24-hour
    #[arg(long)]
    pub time_format: Option<String>,

    /// IANA timezone name, e.g. Europe/Berlin.  An empty value means the
    /// system timezone
    #[arg(long)]
    pub timezone: Option<String>,

    /// default directory for exports
    #[arg(long)]
    pub export_path: Option<String>,

    /// round billable time to this many minutes (0 to disable)
    #[arg(long)]
    pub rounding_minutes: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List registered projects
    #[clap(aliases = &["ls"])]
    List,

    /// Remove a project from the registry
    ///
    /// Tracked entries of the project are kept.
    Remove {
        /// name of the project
        name: String,
    },
}
