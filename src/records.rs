pub mod db;
mod migrations;
mod model;
mod schema;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};

pub use db::{establish_connection, establish_in_memory, Conn};
pub use model::{hours, Entry, Milestone, Rounding};

/// Business rules layered on top of the store.
///
/// The store itself will happily hold several running entries or several
/// active milestones for one project.  Every flow that could create one goes
/// through here and checks first.
pub struct Records<'a> {
    db: &'a mut Conn,
}

/// Fields to change on an existing entry.  `None` leaves a field as it is;
/// for the milestone, `Some(None)` clears it.
#[derive(Debug, Default, Clone)]
pub struct EntryChanges {
    pub project: Option<String>,
    pub description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub hourly_rate: Option<f64>,
    pub milestone: Option<Option<String>>,
}

impl EntryChanges {
    pub fn is_empty(&self) -> bool {
        self.project.is_none()
            && self.description.is_none()
            && self.started_at.is_none()
            && self.ended_at.is_none()
            && self.hourly_rate.is_none()
            && self.milestone.is_none()
    }
}

impl<'a> Records<'a> {
    pub fn new(db: &'a mut Conn) -> Self {
        Self { db }
    }

    pub fn running(&mut self) -> Result<Option<Entry>> {
        db::get_running_entry(self.db)
    }

    fn ensure_nothing_running(&mut self) -> Result<()> {
        if let Some(running) = db::get_running_entry(self.db)? {
            bail!(
                "Already tracking time for `{}` (use `tmpo stop` to stop the current session first)",
                running.project
            );
        }
        Ok(())
    }

    /// Starts tracking a new entry now.  The project's active milestone, if
    /// any, is attached to the entry.
    pub fn start(
        &mut self,
        project: &str,
        description: &str,
        hourly_rate: Option<f64>,
    ) -> Result<Entry> {
        if project.trim().is_empty() {
            bail!("Project name cannot be empty");
        }
        self.ensure_nothing_running()?;

        let milestone = db::get_active_milestone_for_project(self.db, project)?;
        let entry = db::create_entry(
            self.db,
            project,
            description,
            hourly_rate,
            milestone.as_ref().map(|m| m.name.as_str()),
        )?;
        log::debug!("Started entry {} for {}", entry.id, entry.project);
        Ok(entry)
    }

    /// Stops the running entry and returns it in its completed state.
    pub fn stop(&mut self) -> Result<Entry> {
        let running = db::get_running_entry(self.db)?
            .ok_or_else(|| anyhow!("No time entry is currently running"))?;
        db::stop_entry(self.db, running.id)?;
        db::get_entry(self.db, running.id)?
            .ok_or_else(|| anyhow!("Time entry {} disappeared while stopping it", running.id))
    }

    pub fn pause(&mut self) -> Result<Entry> {
        self.stop()
    }

    /// Starts a new entry that continues the last stopped session of
    /// `project`.  The stopped entry itself is never reopened.
    pub fn resume(&mut self, project: &str) -> Result<Entry> {
        self.ensure_nothing_running()?;

        let last = db::get_last_stopped_entry(self.db, Some(project))?.ok_or_else(|| {
            anyhow!("No previous session found for project '{project}' to resume")
        })?;
        db::create_entry(
            self.db,
            &last.project,
            &last.description,
            last.hourly_rate,
            last.milestone.as_deref(),
        )
    }

    /// Records a completed entry for a period in the past.
    pub fn manual(
        &mut self,
        project: &str,
        description: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        hourly_rate: Option<f64>,
        milestone: Option<&str>,
    ) -> Result<Entry> {
        if project.trim().is_empty() {
            bail!("Project name cannot be empty");
        }
        if ended_at <= started_at {
            bail!("End time must be after start time");
        }
        if ended_at > Utc::now() {
            bail!("End time cannot be in the future");
        }
        db::create_manual_entry(
            self.db,
            project,
            description,
            started_at,
            ended_at,
            hourly_rate,
            milestone,
        )
    }

    pub fn edit(&mut self, entry_id: i32, changes: EntryChanges) -> Result<Entry> {
        let mut entry = db::get_entry(self.db, entry_id)?
            .ok_or_else(|| anyhow!("No time entry found with id {entry_id}"))?;

        if let Some(project) = changes.project {
            if project.trim().is_empty() {
                bail!("Project name cannot be empty");
            }
            entry.project = project;
        }
        if let Some(description) = changes.description {
            entry.description = description;
        }
        if let Some(started_at) = changes.started_at {
            entry.started_at = started_at;
        }
        if let Some(ended_at) = changes.ended_at {
            if entry.is_running() {
                bail!("Entry {entry_id} is still running; stop it before setting an end time");
            }
            entry.ended_at = Some(ended_at);
        }
        if let Some(hourly_rate) = changes.hourly_rate {
            if hourly_rate < 0.0 {
                bail!("Hourly rate cannot be negative");
            }
            entry.hourly_rate = Some(hourly_rate);
        }
        if let Some(milestone) = changes.milestone {
            entry.milestone = milestone;
        }

        if let Some(ended_at) = entry.ended_at {
            if ended_at < entry.started_at {
                bail!("End time must be after start time");
            }
        }

        db::update_time_entry(self.db, entry_id, &entry)?;
        Ok(entry)
    }

    pub fn delete(&mut self, entry_id: i32) -> Result<Entry> {
        let entry = db::get_entry(self.db, entry_id)?
            .ok_or_else(|| anyhow!("No time entry found with id {entry_id}"))?;
        db::delete_time_entry(self.db, entry_id)?;
        Ok(entry)
    }

    pub fn entry(&mut self, entry_id: i32) -> Result<Option<Entry>> {
        db::get_entry(self.db, entry_id)
    }

    /// Most recent entries first, optionally restricted to one project.
    pub fn log(&mut self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Entry>> {
        match project {
            Some(project) => {
                let mut entries = db::get_entries_by_project(self.db, project)?;
                if let Some(limit) = limit {
                    entries.truncate(limit);
                }
                Ok(entries)
            }
            None => db::get_entries(self.db, limit.map(|l| l as i64)),
        }
    }

    pub fn between(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Entry>> {
        db::get_entries_by_date_range(self.db, start, end)
    }

    pub fn projects(&mut self) -> Result<Vec<String>> {
        db::get_all_projects(self.db)
    }

    pub fn start_milestone(&mut self, project: &str, name: &str) -> Result<Milestone> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Milestone name cannot be empty");
        }
        if let Some(active) = db::get_active_milestone_for_project(self.db, project)? {
            bail!(
                "Milestone '{}' is already active for project '{project}' (finish it before starting another)",
                active.name
            );
        }
        db::create_milestone(self.db, project, name)
    }

    pub fn finish_milestone(&mut self, project: &str) -> Result<Milestone> {
        let active = db::get_active_milestone_for_project(self.db, project)?
            .ok_or_else(|| anyhow!("No active milestone for project '{project}'"))?;
        db::finish_milestone(self.db, active.id)?;
        db::get_milestone(self.db, active.id)?
            .ok_or_else(|| anyhow!("Milestone {} disappeared while finishing it", active.id))
    }

    pub fn active_milestone(&mut self, project: &str) -> Result<Option<Milestone>> {
        db::get_active_milestone_for_project(self.db, project)
    }

    /// The active milestone of a project with the entries tagged with it.
    pub fn milestone_status(&mut self, project: &str) -> Result<Option<(Milestone, Vec<Entry>)>> {
        match self.active_milestone(project)? {
            Some(milestone) => {
                let entries = db::get_entries_by_milestone(self.db, project, &milestone.name)?;
                Ok(Some((milestone, entries)))
            }
            None => Ok(None),
        }
    }

    pub fn milestones(&mut self, project: Option<&str>) -> Result<Vec<Milestone>> {
        match project {
            Some(project) => db::get_milestones_by_project(self.db, project),
            None => db::get_all_milestones(self.db),
        }
    }

    pub fn milestone_entries(&mut self, project: &str, name: &str) -> Result<Vec<Entry>> {
        db::get_entries_by_milestone(self.db, project, name)
    }
}
