use std::fs::create_dir_all;
use std::path::Path;

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use diesel::connection::SimpleConnection as _;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{prelude::*, sql_query};
use diesel::{Connection, SqliteConnection};

use super::migrations::run_migrations;
use super::model::{Entry, Milestone};

pub struct Conn(pub(super) SqliteConnection);

impl Drop for Conn {
    fn drop(&mut self) {
        // if this fails, we don't really care at this point
        // the goal is just to have the optimize pragma run when the program
        // ends, so that it can potentially update some of the tables based on
        // the queries used during this session.
        // See: https://sqlite.org/pragma.html#pragma_optimize
        let _ = sql_query("PRAGMA optimize;").execute(&mut self.0);
    }
}

pub fn establish_connection(database_url: impl AsRef<Path>) -> Result<Conn> {
    let database_url = database_url.as_ref();

    // The database and potentially its parent folders may not yet exist.  SQLite can handle
    // creating the file fine, but we need to make sure all of the parent folders also exist.
    if let Some(parent) = database_url.parent() {
        create_dir_all(parent)?;
    }

    // SQLite only accepts utf-8 or utf-16 paths, so a lossy conversion is the best we can do here.
    // See: https://github.com/diesel-rs/diesel/discussions/3069
    connect(&database_url.to_string_lossy())
}

/// Opens a private in-memory store with the full schema applied.
pub fn establish_in_memory() -> Result<Conn> {
    connect(":memory:")
}

fn connect(database_url: &str) -> Result<Conn> {
    log::trace!("Connecting to SQLite DB at {database_url}");
    let mut conn = SqliteConnection::establish(database_url)?;
    // application_id spells "tmpo" in ASCII
    conn.batch_execute("PRAGMA application_id = 1953329263;")?;
    log::trace!("Connection to SQLite DB successful");

    let applied = run_migrations(&mut conn)?;
    if !applied.is_empty() {
        // a migration has occurred, so the data may be in a different format to when the last
        // analysis was done.  Run optimize now to update that analysis.
        sql_query("PRAGMA optimize;").execute(&mut conn)?;
        log::trace!(
            "Ran {} migration(s) to update SQLite DB to latest version",
            applied.len()
        );
    }
    Ok(Conn(conn))
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = super::schema::time_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct EntryRow {
    id: i32,
    project_name: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    description: Option<String>,
    hourly_rate: Option<f64>,
    milestone_name: Option<String>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: row.id,
            project: row.project_name,
            started_at: row.start_time,
            ended_at: row.end_time,
            description: row.description.unwrap_or_default(),
            hourly_rate: row.hourly_rate,
            milestone: row.milestone_name,
        }
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = super::schema::time_entries)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct EntryChangeset<'a> {
    project_name: &'a str,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    description: Option<&'a str>,
    hourly_rate: Option<f64>,
    milestone_name: Option<&'a str>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = super::schema::milestones)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct MilestoneRow {
    id: i32,
    project_name: String,
    name: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl From<MilestoneRow> for Milestone {
    fn from(row: MilestoneRow) -> Self {
        Milestone {
            id: row.id,
            project: row.project_name,
            name: row.name,
            started_at: row.start_time,
            ended_at: row.end_time,
        }
    }
}

fn into_entries(rows: Vec<EntryRow>) -> Vec<Entry> {
    rows.into_iter().map(Entry::from).collect()
}

fn into_milestones(rows: Vec<MilestoneRow>) -> Vec<Milestone> {
    rows.into_iter().map(Milestone::from).collect()
}

pub fn create_entry(
    conn: &mut Conn,
    project: &str,
    description: &str,
    hourly_rate: Option<f64>,
    milestone: Option<&str>,
) -> Result<Entry> {
    use super::schema::time_entries;
    let row = diesel::insert_into(time_entries::table)
        .values((
            time_entries::project_name.eq(project),
            time_entries::start_time.eq(Utc::now()),
            time_entries::description.eq(Some(description)),
            time_entries::hourly_rate.eq(hourly_rate),
            time_entries::milestone_name.eq(milestone),
        ))
        .returning(EntryRow::as_returning())
        .get_result(&mut conn.0)?;
    Ok(row.into())
}

/// Inserts a completed entry with caller-supplied bounds.  The bounds are
/// stored in UTC whatever zone they arrive in; their order is not checked.
pub fn create_manual_entry<Tz: TimeZone>(
    conn: &mut Conn,
    project: &str,
    description: &str,
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    hourly_rate: Option<f64>,
    milestone: Option<&str>,
) -> Result<Entry> {
    use super::schema::time_entries;
    let row = diesel::insert_into(time_entries::table)
        .values((
            time_entries::project_name.eq(project),
            time_entries::start_time.eq(start.with_timezone(&Utc)),
            time_entries::end_time.eq(Some(end.with_timezone(&Utc))),
            time_entries::description.eq(Some(description)),
            time_entries::hourly_rate.eq(hourly_rate),
            time_entries::milestone_name.eq(milestone),
        ))
        .returning(EntryRow::as_returning())
        .get_result(&mut conn.0)?;
    Ok(row.into())
}

/// Sets the end time of an entry to now.  Stopping an already stopped entry
/// simply moves its end time.
pub fn stop_entry(conn: &mut Conn, entry_id: i32) -> Result<()> {
    use super::schema::time_entries;
    let count = diesel::update(time_entries::table.find(entry_id))
        .set(time_entries::end_time.eq(Some(Utc::now())))
        .execute(&mut conn.0)?;
    if count < 1 {
        bail!("No time entry found with id {entry_id}")
    }
    Ok(())
}

pub fn get_entry(conn: &mut Conn, entry_id: i32) -> Result<Option<Entry>> {
    use super::schema::time_entries;
    Ok(time_entries::table
        .find(entry_id)
        .select(EntryRow::as_select())
        .first(&mut conn.0)
        .optional()?
        .map(Entry::from))
}

/// The most recently started entry without an end time.  Should several exist,
/// only the newest is returned.
pub fn get_running_entry(conn: &mut Conn) -> Result<Option<Entry>> {
    use super::schema::time_entries;
    Ok(time_entries::table
        .filter(time_entries::end_time.is_null())
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .first(&mut conn.0)
        .optional()?
        .map(Entry::from))
}

pub fn get_last_stopped_entry(conn: &mut Conn, project: Option<&str>) -> Result<Option<Entry>> {
    use super::schema::time_entries;
    let mut query = time_entries::table
        .filter(time_entries::end_time.is_not_null())
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .into_boxed();
    if let Some(project) = project {
        query = query.filter(time_entries::project_name.eq(project));
    }
    Ok(query.first(&mut conn.0).optional()?.map(Entry::from))
}

/// All entries, newest first, optionally capped at `limit` rows.
pub fn get_entries(conn: &mut Conn, limit: Option<i64>) -> Result<Vec<Entry>> {
    use super::schema::time_entries;
    let mut query = time_entries::table
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .into_boxed();
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    Ok(into_entries(query.load(&mut conn.0)?))
}

pub fn get_entries_by_project(conn: &mut Conn, project: &str) -> Result<Vec<Entry>> {
    use super::schema::time_entries;
    let rows = time_entries::table
        .filter(time_entries::project_name.eq(project))
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .load(&mut conn.0)?;
    Ok(into_entries(rows))
}

/// Entries that started within `[start, end]`, newest first.
///
/// Bounds are compared as text, so rows must be stored in diesel's
/// `YYYY-MM-DD HH:MM:SS+00:00` layout to be found.
pub fn get_entries_by_date_range(
    conn: &mut Conn,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Entry>> {
    use super::schema::time_entries;
    let rows = time_entries::table
        .filter(time_entries::start_time.between(start, end))
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .load(&mut conn.0)?;
    Ok(into_entries(rows))
}

pub fn get_entries_by_milestone(
    conn: &mut Conn,
    project: &str,
    milestone: &str,
) -> Result<Vec<Entry>> {
    use super::schema::time_entries;
    let rows = time_entries::table
        .filter(time_entries::project_name.eq(project))
        .filter(time_entries::milestone_name.eq(milestone))
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .load(&mut conn.0)?;
    Ok(into_entries(rows))
}

pub fn get_completed_entries_by_project(conn: &mut Conn, project: &str) -> Result<Vec<Entry>> {
    use super::schema::time_entries;
    let rows = time_entries::table
        .filter(time_entries::project_name.eq(project))
        .filter(time_entries::end_time.is_not_null())
        .order((time_entries::start_time.desc(), time_entries::id.desc()))
        .select(EntryRow::as_select())
        .load(&mut conn.0)?;
    Ok(into_entries(rows))
}

pub fn get_all_projects(conn: &mut Conn) -> Result<Vec<String>> {
    use super::schema::time_entries;
    Ok(time_entries::table
        .select(time_entries::project_name)
        .distinct()
        .order(time_entries::project_name)
        .load(&mut conn.0)?)
}

pub fn get_projects_with_completed_entries(conn: &mut Conn) -> Result<Vec<String>> {
    use super::schema::time_entries;
    Ok(time_entries::table
        .filter(time_entries::end_time.is_not_null())
        .select(time_entries::project_name)
        .distinct()
        .order(time_entries::project_name)
        .load(&mut conn.0)?)
}

/// Replaces every stored field of the entry with the values in `entry`.  The
/// `id` field of `entry` is ignored in favour of `entry_id`.
pub fn update_time_entry(conn: &mut Conn, entry_id: i32, entry: &Entry) -> Result<()> {
    use super::schema::time_entries;
    let count = diesel::update(time_entries::table.find(entry_id))
        .set(&EntryChangeset {
            project_name: &entry.project,
            start_time: entry.started_at,
            end_time: entry.ended_at,
            description: Some(entry.description.as_str()),
            hourly_rate: entry.hourly_rate,
            milestone_name: entry.milestone.as_deref(),
        })
        .execute(&mut conn.0)?;
    if count < 1 {
        bail!("No time entry found with id {entry_id}")
    }
    Ok(())
}

pub fn delete_time_entry(conn: &mut Conn, entry_id: i32) -> Result<()> {
    use super::schema::time_entries;
    let count = diesel::delete(time_entries::table.find(entry_id)).execute(&mut conn.0)?;
    if count < 1 {
        bail!("No time entry found with id {entry_id}")
    }
    Ok(())
}

/// Starts a new milestone now.  Names are unique per project, so a second
/// milestone with the same name fails and leaves the existing one untouched.
pub fn create_milestone(conn: &mut Conn, project: &str, name: &str) -> Result<Milestone> {
    use super::schema::milestones;
    let result = diesel::insert_into(milestones::table)
        .values((
            milestones::project_name.eq(project),
            milestones::name.eq(name),
            milestones::start_time.eq(Utc::now()),
        ))
        .returning(MilestoneRow::as_returning())
        .get_result(&mut conn.0);

    match result {
        Ok(row) => Ok(row.into()),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            bail!("Milestone '{name}' already exists for project '{project}'")
        }
        Err(err) => Err(err.into()),
    }
}

pub fn get_milestone(conn: &mut Conn, milestone_id: i32) -> Result<Option<Milestone>> {
    use super::schema::milestones;
    Ok(milestones::table
        .find(milestone_id)
        .select(MilestoneRow::as_select())
        .first(&mut conn.0)
        .optional()?
        .map(Milestone::from))
}

pub fn get_active_milestone_for_project(
    conn: &mut Conn,
    project: &str,
) -> Result<Option<Milestone>> {
    use super::schema::milestones;
    Ok(milestones::table
        .filter(milestones::project_name.eq(project))
        .filter(milestones::end_time.is_null())
        .order((milestones::start_time.desc(), milestones::id.desc()))
        .select(MilestoneRow::as_select())
        .first(&mut conn.0)
        .optional()?
        .map(Milestone::from))
}

pub fn get_milestone_by_name(
    conn: &mut Conn,
    project: &str,
    name: &str,
) -> Result<Option<Milestone>> {
    use super::schema::milestones;
    Ok(milestones::table
        .filter(milestones::project_name.eq(project))
        .filter(milestones::name.eq(name))
        .select(MilestoneRow::as_select())
        .first(&mut conn.0)
        .optional()?
        .map(Milestone::from))
}

pub fn get_milestones_by_project(conn: &mut Conn, project: &str) -> Result<Vec<Milestone>> {
    use super::schema::milestones;
    let rows = milestones::table
        .filter(milestones::project_name.eq(project))
        .order((milestones::start_time.desc(), milestones::id.desc()))
        .select(MilestoneRow::as_select())
        .load(&mut conn.0)?;
    Ok(into_milestones(rows))
}

pub fn get_all_milestones(conn: &mut Conn) -> Result<Vec<Milestone>> {
    use super::schema::milestones;
    let rows = milestones::table
        .order((milestones::start_time.desc(), milestones::id.desc()))
        .select(MilestoneRow::as_select())
        .load(&mut conn.0)?;
    Ok(into_milestones(rows))
}

pub fn finish_milestone(conn: &mut Conn, milestone_id: i32) -> Result<()> {
    use super::schema::milestones;
    let count = diesel::update(milestones::table.find(milestone_id))
        .set(milestones::end_time.eq(Some(Utc::now())))
        .execute(&mut conn.0)?;
    if count < 1 {
        bail!("No milestone found with id {milestone_id}")
    }
    Ok(())
}
