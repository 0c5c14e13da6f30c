// SPDX-License-Identifier: MPL-2.0

use std::io::Write as _;

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{DateTime, Utc};
use tmpo::{
    commands::{
        Config, Delete, Edit, Export, Init, Log, Manual, MilestoneList, MilestoneStart, Period,
        ProjectArg, Start, Stats,
    },
    config::{expand_path, DisplayPrefs, GlobalConfig, Paths, Zone},
    export::{default_file_name, export_to_path},
    print::{
        duration_to_string, print_entries, print_entry, print_milestone_status, print_milestones,
        print_status, print_summary,
    },
    project::{GlobalProject, ProjectConfig, ProjectResolver, ProjectsRegistry},
    records::{self, Entry, EntryChanges, Records},
    stats::summarize,
};

/// Everything loaded once per invocation.
pub struct Context {
    paths: Paths,
    config: GlobalConfig,
    prefs: DisplayPrefs,
    resolver: ProjectResolver,
}

impl Context {
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        let config = GlobalConfig::load(&paths.config)?;
        let prefs = DisplayPrefs::from_config(&config);
        let registry = ProjectsRegistry::load(&paths.projects)?;
        let cwd = std::env::current_dir().context("Could not determine the current directory")?;
        Ok(Self {
            resolver: ProjectResolver::new(cwd, registry),
            paths,
            config,
            prefs,
        })
    }

    fn connect(&self) -> Result<records::Conn> {
        records::establish_connection(&self.paths.database)
    }

    fn project(&self, project: &ProjectArg) -> Result<String> {
        self.resolver.detect_project(project.project.as_deref())
    }
}

fn parse_time(zone: &Zone, input: &str, now: DateTime<Utc>, what: &str) -> Result<DateTime<Utc>> {
    zone.parse_date(input, now)
        .ok_or_else(|| anyhow!("could not parse {what} time {input}"))
}

/// Entries in `period` (or all of them), optionally for one project.
fn select_entries(
    recs: &mut Records,
    period: Option<&Period>,
    project: Option<&str>,
) -> Result<Vec<Entry>> {
    let mut entries = match period {
        Some(period) => recs.between(period.start, period.end)?,
        None => recs.log(project, None)?,
    };
    if let Some(project) = project {
        entries.retain(|entry| entry.project == project);
    }
    Ok(entries)
}

pub fn start(ctx: &Context, start: Start) -> Result<()> {
    let project = ctx.project(&start.project)?;
    let settings = ctx.resolver.project_config(&project)?;
    let mut conn = ctx.connect()?;
    let mut recs = Records::new(&mut conn);

    let description = start.description.unwrap_or_default();
    let entry = recs.start(&project, description.trim(), settings.hourly_rate)?;
    log::info!(
        "Started tracking time for {} at {}",
        entry.project,
        ctx.prefs.time(entry.started_at)
    );
    if let Some(milestone) = &entry.milestone {
        log::info!("Tagged with milestone {milestone}");
    }
    Ok(())
}

pub fn stop(ctx: &Context) -> Result<()> {
    let mut conn = ctx.connect()?;
    let entry = Records::new(&mut conn).stop()?;
    log::info!(
        "Stopped tracking time for {} after {}",
        entry.project,
        duration_to_string(entry.duration())
    );
    Ok(())
}

pub fn pause(ctx: &Context) -> Result<()> {
    let mut conn = ctx.connect()?;
    let entry = Records::new(&mut conn).pause()?;
    log::info!(
        "Paused {} after {} (continue with `tmpo resume`)",
        entry.project,
        duration_to_string(entry.duration())
    );
    Ok(())
}

pub fn resume(ctx: &Context, project: ProjectArg) -> Result<()> {
    let project = ctx.project(&project)?;
    let mut conn = ctx.connect()?;
    let entry = Records::new(&mut conn).resume(&project)?;
    log::info!("Resumed tracking time for {}", entry.project);
    Ok(())
}

pub fn status(ctx: &Context) -> Result<()> {
    let mut conn = ctx.connect()?;
    let running = Records::new(&mut conn).running()?;

    let mut stdout = std::io::stdout().lock();
    print_status(&mut stdout, Utc::now(), running.as_ref(), &ctx.prefs)
}

pub fn log(ctx: &Context, log: Log) -> Result<()> {
    let now = Utc::now();
    let period = log.range.resolve(&ctx.prefs.zone, now)?;
    let mut conn = ctx.connect()?;
    let mut recs = Records::new(&mut conn);

    let mut entries = match (&log.milestone, &log.project) {
        (Some(milestone), Some(project)) => recs.milestone_entries(project, milestone)?,
        _ => select_entries(&mut recs, period.as_ref(), log.project.as_deref())?,
    };
    if let Some(period) = &period {
        entries.retain(|entry| period.start <= entry.started_at && entry.started_at <= period.end);
    }
    entries.truncate(log.limit);

    let mut stdout = std::io::stdout().lock();
    print_entries(&mut stdout, now, &entries, &ctx.prefs)
}

pub fn manual(ctx: &Context, manual: Manual) -> Result<()> {
    let now = Utc::now();
    let project = ctx.project(&manual.project)?;
    let settings = ctx.resolver.project_config(&project)?;
    let started_at = parse_time(&ctx.prefs.zone, &manual.start, now, "start")?;
    let ended_at = parse_time(&ctx.prefs.zone, &manual.end, now, "end")?;

    let mut conn = ctx.connect()?;
    let mut recs = Records::new(&mut conn);
    let milestone = match manual.milestone {
        Some(milestone) => Some(milestone),
        None => recs.active_milestone(&project)?.map(|m| m.name),
    };
    let entry = recs.manual(
        &project,
        manual.description.trim(),
        started_at,
        ended_at,
        settings.hourly_rate,
        milestone.as_deref(),
    )?;
    log::info!("Added entry #{} for {}", entry.id, entry.project);

    let mut stdout = std::io::stdout().lock();
    print_entry(&mut stdout, now, &entry, &ctx.prefs)
}

pub fn edit(ctx: &Context, edit: Edit) -> Result<()> {
    let now = Utc::now();
    let zone = &ctx.prefs.zone;
    let changes = EntryChanges {
        project: edit.project,
        description: edit.description,
        started_at: edit
            .start
            .map(|start| parse_time(zone, &start, now, "start"))
            .transpose()?,
        ended_at: edit
            .end
            .map(|end| parse_time(zone, &end, now, "end"))
            .transpose()?,
        hourly_rate: edit.rate,
        milestone: if edit.clear_milestone {
            Some(None)
        } else {
            edit.milestone.map(Some)
        },
    };
    if changes.is_empty() {
        bail!("Nothing to change (see `tmpo edit --help` for the available flags)");
    }

    let mut conn = ctx.connect()?;
    let entry = Records::new(&mut conn).edit(edit.id, changes)?;
    log::info!("Updated entry #{}", entry.id);

    let mut stdout = std::io::stdout().lock();
    print_entry(&mut stdout, now, &entry, &ctx.prefs)
}

pub fn delete(ctx: &Context, delete: Delete) -> Result<()> {
    let mut conn = ctx.connect()?;
    let entry = Records::new(&mut conn).delete(delete.id)?;
    log::info!(
        "Deleted entry #{} for {} ({})",
        entry.id,
        entry.project,
        ctx.prefs.date_time(entry.started_at)
    );
    Ok(())
}

pub fn stats(ctx: &Context, stats: Stats) -> Result<()> {
    let now = Utc::now();
    let period = stats.range.resolve(&ctx.prefs.zone, now)?;
    let mut conn = ctx.connect()?;
    let mut recs = Records::new(&mut conn);

    let entries = select_entries(&mut recs, period.as_ref(), stats.project.as_deref())?;
    let summary = summarize(&entries, now, ctx.prefs.rounding);
    let mut title = period
        .map(|period| period.label)
        .unwrap_or_else(|| "All Time".into());
    if let Some(project) = &stats.project {
        title.push_str(&format!(" ({project})"));
    }

    let mut stdout = std::io::stdout().lock();
    print_summary(&mut stdout, &title, &summary, &ctx.prefs)
}

pub fn export(ctx: &Context, export: Export) -> Result<()> {
    let now = Utc::now();
    let period = export.range.resolve(&ctx.prefs.zone, now)?;
    let mut conn = ctx.connect()?;
    let mut recs = Records::new(&mut conn);
    let entries = select_entries(&mut recs, period.as_ref(), export.project.as_deref())?;
    if entries.is_empty() {
        log::warn!("No entries match, the export will be empty");
    }

    let path = match export.output {
        Some(path) => path,
        None => {
            let project = match export.project {
                Some(project) => project,
                None => ctx.resolver.detect_project(None)?,
            };
            let dir = match ctx.resolver.project_config(&project)?.export_path {
                Some(path) => expand_path(&path),
                None => ctx.config.export_dir(),
            };
            dir.join(default_file_name(export.format, now))
        }
    };

    let path = export_to_path(&path, export.format, &entries, now)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", path.display())?;
    Ok(())
}

pub fn milestone_start(ctx: &Context, start: MilestoneStart) -> Result<()> {
    let project = ctx.project(&start.project)?;
    let mut conn = ctx.connect()?;
    let milestone = Records::new(&mut conn).start_milestone(&project, &start.name)?;
    log::info!("Started milestone {} for {}", milestone.name, milestone.project);
    Ok(())
}

pub fn milestone_finish(ctx: &Context, project: ProjectArg) -> Result<()> {
    let project = ctx.project(&project)?;
    let mut conn = ctx.connect()?;
    let milestone = Records::new(&mut conn).finish_milestone(&project)?;
    log::info!(
        "Finished milestone {} for {} after {}",
        milestone.name,
        milestone.project,
        duration_to_string(milestone.duration())
    );
    Ok(())
}

pub fn milestone_status(ctx: &Context, project: ProjectArg) -> Result<()> {
    let project = ctx.project(&project)?;
    let mut conn = ctx.connect()?;
    let status = Records::new(&mut conn).milestone_status(&project)?;

    let mut stdout = std::io::stdout().lock();
    match status {
        Some((milestone, entries)) => {
            print_milestone_status(&mut stdout, Utc::now(), &milestone, &entries, &ctx.prefs)
        }
        None => {
            writeln!(stdout, "No active milestone for project '{project}'.")?;
            Ok(())
        }
    }
}

pub fn milestone_list(ctx: &Context, list: MilestoneList) -> Result<()> {
    let project = if list.all {
        None
    } else {
        Some(ctx.project(&list.project)?)
    };
    let mut conn = ctx.connect()?;
    let milestones = Records::new(&mut conn).milestones(project.as_deref())?;

    let mut stdout = std::io::stdout().lock();
    print_milestones(&mut stdout, Utc::now(), &milestones, &ctx.prefs)
}

pub fn init(ctx: &Context, init: Init) -> Result<()> {
    if init.rate.is_some_and(|rate| rate < 0.0) {
        bail!("Hourly rate cannot be negative");
    }

    if init.global {
        let name = init
            .name
            .ok_or(anyhow!("A project name is required with --global"))?;
        let mut registry = ProjectsRegistry::load(&ctx.paths.projects)?;
        registry.add(GlobalProject {
            name: name.clone(),
            hourly_rate: init.rate.filter(|rate| *rate > 0.0),
            description: init.description,
            export_path: init.export_path,
        })?;
        registry.save(&ctx.paths.projects)?;
        log::info!(
            "Registered global project {}; track it from any directory with `tmpo start --project \"{}\"`",
            name.trim(),
            name.trim()
        );
    } else {
        let project_name = match init.name {
            Some(name) => name,
            None => ctx.resolver.detect_project(None)?,
        };
        let config = ProjectConfig {
            project_name,
            hourly_rate: init.rate,
            description: init.description,
            export_path: init.export_path,
        };
        config.create(ctx.resolver.cwd())?;
        log::info!("Initialised project {}", config.project_name);
    }
    Ok(())
}

const DATE_FORMATS: [&str; 3] = ["MM/DD/YYYY", "DD/MM/YYYY", "YYYY-MM-DD"];
const TIME_FORMATS: [&str; 2] = ["12-hour", "24-hour"];

/// Runs without a [`Context`] so that a broken config file can be fixed.
pub fn config(changes: Config) -> Result<()> {
    let paths = Paths::resolve()?;
    let mut config = GlobalConfig::load_for_repair(&paths.config);
    let mut changed = false;

    if let Some(currency) = changes.currency {
        let code = currency.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            bail!("`{currency}` is not an ISO 4217 currency code (e.g. USD, EUR)");
        }
        config.currency = code;
        changed = true;
    }
    if let Some(date_format) = changes.date_format {
        if !DATE_FORMATS.contains(&date_format.as_str()) {
            bail!("Date format must be one of {}", DATE_FORMATS.join(", "));
        }
        config.date_format = date_format;
        changed = true;
    }
    if let Some(time_format) = changes.time_format {
        if !TIME_FORMATS.contains(&time_format.as_str()) {
            bail!("Time format must be one of {}", TIME_FORMATS.join(", "));
        }
        config.time_format = time_format;
        changed = true;
    }
    if let Some(timezone) = changes.timezone {
        let timezone = timezone.trim();
        if timezone.is_empty() {
            config.timezone = None;
        } else {
            if !timezone.eq_ignore_ascii_case("UTC") {
                tzfile::Tz::named(timezone)
                    .with_context(|| format!("Unknown timezone `{timezone}`"))?;
            }
            config.timezone = Some(timezone.to_string());
        }
        changed = true;
    }
    if let Some(export_path) = changes.export_path {
        config.export_path = export_path;
        changed = true;
    }
    if let Some(minutes) = changes.rounding_minutes {
        config.rounding_minutes = (minutes > 0).then_some(minutes);
        changed = true;
    }

    if !changed {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{}", toml::to_string_pretty(&config)?)?;
        return Ok(());
    }

    config.save(&paths.config)?;
    log::info!("Saved configuration to {:?}", paths.config);
    Ok(())
}

pub fn projects_list(ctx: &Context) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let projects = ctx.resolver.registry().list();
    if projects.is_empty() {
        writeln!(stdout, "No global projects registered (add one with `tmpo init --global`).")?;
        return Ok(());
    }

    writeln!(stdout, "{:20}  {:>12}  {:20}  Description", "Project", "Rate", "Export path")?;
    for project in projects {
        let rate = project
            .hourly_rate
            .map(|rate| ctx.prefs.money(rate))
            .unwrap_or_default();
        let line = format!(
            "{:20}  {:>12}  {:20}  {}",
            project.name,
            rate,
            project.export_path.as_deref().unwrap_or_default(),
            project.description
        );
        writeln!(stdout, "{}", line.trim_end())?;
    }
    Ok(())
}

pub fn projects_remove(ctx: &Context, name: &str) -> Result<()> {
    let mut registry = ProjectsRegistry::load(&ctx.paths.projects)?;
    let removed = registry.remove(name)?;
    registry.save(&ctx.paths.projects)?;
    log::info!("Removed global project {} (tracked entries are kept)", removed.name);
    Ok(())
}
