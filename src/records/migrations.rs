//! Keyed, run-once migrations tracked in the `settings` ledger table.
//!
//! Every migration runs inside its own transaction together with the write of
//! its ledger marker, so a failed migration leaves neither partial data nor a
//! marker behind and is retried in full on the next launch.  Once the marker
//! exists the migration is skipped without touching any other table.

use anyhow::{Context as _, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection as _;
use diesel::sql_types::{Integer, Nullable, Text};
use diesel::{prelude::*, sql_query};

use super::schema::settings;

pub const BASE_TABLES: &str = "schema_001_base_tables";
pub const ENTRY_HOURLY_RATE: &str = "schema_002_entry_hourly_rate";
pub const ENTRY_MILESTONE_NAME: &str = "schema_003_entry_milestone_name";
pub const UTC_TIMESTAMPS: &str = "001_utc_timestamps";

const COMPLETED: &str = "completed";

/// The format timestamps are written in.  Matches what diesel writes for
/// `TimestamptzSqlite` columns.
const STORED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub(super) struct Migration {
    pub key: &'static str,
    /// Returns the number of rows changed.
    pub apply: fn(&mut SqliteConnection) -> Result<usize>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        key: BASE_TABLES,
        apply: create_base_tables,
    },
    Migration {
        key: ENTRY_HOURLY_RATE,
        apply: add_entry_hourly_rate,
    },
    Migration {
        key: ENTRY_MILESTONE_NAME,
        apply: add_entry_milestone_name,
    },
    Migration {
        key: UTC_TIMESTAMPS,
        apply: normalize_timestamps_to_utc,
    },
];

/// Brings the store up to date, returning the keys of the migrations that
/// were applied during this call.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<Vec<&'static str>> {
    run_migration_list(conn, MIGRATIONS)
}

pub(super) fn run_migration_list(
    conn: &mut SqliteConnection,
    migrations: &[Migration],
) -> Result<Vec<&'static str>> {
    create_ledger(conn)?;

    let mut applied = Vec::new();
    for migration in migrations {
        if has_migration_run(conn, migration.key)? {
            continue;
        }

        let changed = conn
            .transaction::<_, anyhow::Error, _>(|conn| {
                let changed = (migration.apply)(conn)?;
                mark_migration_complete(conn, migration.key)?;
                Ok(changed)
            })
            .with_context(|| format!("Migration {} failed", migration.key))?;
        log::trace!("Applied migration {} ({changed} row(s) changed)", migration.key);
        applied.push(migration.key);
    }
    Ok(applied)
}

fn create_ledger(conn: &mut SqliteConnection) -> Result<()> {
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        );",
    )
    .context("Could not create migration ledger")?;
    Ok(())
}

pub fn has_migration_run(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let value = settings::table
        .find(key)
        .select(settings::value)
        .first::<String>(conn)
        .optional()
        .context("Could not check migration status")?;
    Ok(value.as_deref() == Some(COMPLETED))
}

pub fn mark_migration_complete(conn: &mut SqliteConnection, key: &str) -> Result<()> {
    diesel::replace_into(settings::table)
        .values((
            settings::key.eq(key),
            settings::value.eq(COMPLETED),
            settings::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .context("Could not mark migration complete")?;
    Ok(())
}

fn create_base_tables(conn: &mut SqliteConnection) -> Result<usize> {
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS time_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_name TEXT NOT NULL,
            start_time DATETIME NOT NULL,
            end_time DATETIME,
            description TEXT
        );
        CREATE TABLE IF NOT EXISTS milestones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_name TEXT NOT NULL,
            name TEXT NOT NULL,
            start_time DATETIME NOT NULL,
            end_time DATETIME,
            UNIQUE(project_name, name)
        );",
    )?;
    Ok(0)
}

// Stores created by older releases may already carry these columns without
// having a ledger, so the column list is consulted before altering the table.

fn add_entry_hourly_rate(conn: &mut SqliteConnection) -> Result<usize> {
    if !column_exists(conn, "time_entries", "hourly_rate")? {
        conn.batch_execute("ALTER TABLE time_entries ADD COLUMN hourly_rate REAL;")?;
    }
    Ok(0)
}

fn add_entry_milestone_name(conn: &mut SqliteConnection) -> Result<usize> {
    if !column_exists(conn, "time_entries", "milestone_name")? {
        conn.batch_execute("ALTER TABLE time_entries ADD COLUMN milestone_name TEXT;")?;
    }
    conn.batch_execute(
        "CREATE INDEX IF NOT EXISTS idx_time_entries_milestone ON time_entries(milestone_name);
        CREATE INDEX IF NOT EXISTS idx_milestones_project_active ON milestones(project_name, end_time);",
    )?;
    Ok(0)
}

#[derive(QueryableByName)]
struct ColumnName {
    #[diesel(sql_type = Text)]
    name: String,
}

fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> Result<bool> {
    let columns = sql_query("SELECT name FROM pragma_table_info(?)")
        .bind::<Text, _>(table)
        .load::<ColumnName>(conn)?;
    Ok(columns.iter().any(|c| c.name == column))
}

#[derive(QueryableByName, Debug)]
struct StoredInterval {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = Text)]
    start_time: String,
    #[diesel(sql_type = Nullable<Text>)]
    end_time: Option<String>,
}

/// Rewrites every timestamp stored with a non-UTC offset to the same instant
/// in UTC.  Timestamps already in UTC are not rewritten at all.
fn normalize_timestamps_to_utc(conn: &mut SqliteConnection) -> Result<usize> {
    let entries = normalize_table(conn, "time_entries").context("Could not migrate time entries")?;
    let milestones = normalize_table(conn, "milestones").context("Could not migrate milestones")?;
    log::debug!("Converted {entries} time entries and {milestones} milestones to UTC");
    Ok(entries + milestones)
}

fn normalize_table(conn: &mut SqliteConnection, table: &str) -> Result<usize> {
    let rows = sql_query(format!("SELECT id, start_time, end_time FROM {table}"))
        .load::<StoredInterval>(conn)?;

    let mut updates = Vec::new();
    for row in rows {
        let start_time = to_utc_text(&row.start_time)
            .with_context(|| format!("Unreadable start time in {table} row {}", row.id))?;
        let end_time = row
            .end_time
            .as_deref()
            .map(to_utc_text)
            .transpose()
            .with_context(|| format!("Unreadable end time in {table} row {}", row.id))?
            .flatten();

        if start_time.is_some() || end_time.is_some() {
            updates.push(StoredInterval {
                id: row.id,
                start_time: start_time.unwrap_or(row.start_time),
                end_time: end_time.or(row.end_time),
            });
        }
    }

    for update in &updates {
        sql_query(format!(
            "UPDATE {table} SET start_time = ?, end_time = ? WHERE id = ?"
        ))
        .bind::<Text, _>(&update.start_time)
        .bind::<Nullable<Text>, _>(&update.end_time)
        .bind::<Integer, _>(update.id)
        .execute(conn)
        .with_context(|| format!("Could not update {table} row {}", update.id))?;
    }

    Ok(updates.len())
}

/// Returns the UTC rendering of `stored` if it carries a non-UTC offset, or
/// `None` if it can stay as it is.
///
/// UTC rows in another layout (`2024-05-01T09:00:00Z`) are kept as they are,
/// so only rows in the `STORED_FORMAT` layout order correctly against the
/// text comparisons of range queries.
fn to_utc_text(stored: &str) -> Result<Option<String>> {
    let parsed = parse_stored_timestamp(stored)?;
    if parsed.offset().local_minus_utc() == 0 {
        return Ok(None);
    }
    Ok(Some(
        parsed.with_timezone(&Utc).format(STORED_FORMAT).to_string(),
    ))
}

/// Parses a timestamp as written by this or any earlier release.  Values
/// without any offset were always written in UTC.
pub(super) fn parse_stored_timestamp(stored: &str) -> Result<DateTime<FixedOffset>> {
    let stored = stored.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(stored) {
        return Ok(parsed);
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(stored, format) {
            return Ok(parsed);
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(stored, format) {
            return Ok(parsed.and_utc().fixed_offset());
        }
    }
    anyhow::bail!("Unrecognised timestamp {stored:?}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;
    use crate::records::db::{get_entries_by_date_range, Conn};

    fn empty_conn() -> SqliteConnection {
        SqliteConnection::establish(":memory:").unwrap()
    }

    /// A store with the current schema but without the UTC migration applied.
    fn legacy_conn() -> SqliteConnection {
        let mut conn = empty_conn();
        run_migration_list(&mut conn, &MIGRATIONS[..3]).unwrap();
        conn
    }

    fn insert_entry(conn: &mut SqliteConnection, start: &str, end: Option<&str>) {
        sql_query("INSERT INTO time_entries (project_name, start_time, end_time, description) VALUES ('P', ?, ?, '')")
            .bind::<Text, _>(start)
            .bind::<Nullable<Text>, _>(end)
            .execute(conn)
            .unwrap();
    }

    fn insert_milestone(conn: &mut SqliteConnection, name: &str, start: &str, end: Option<&str>) {
        sql_query("INSERT INTO milestones (project_name, name, start_time, end_time) VALUES ('P', ?, ?, ?)")
            .bind::<Text, _>(name)
            .bind::<Text, _>(start)
            .bind::<Nullable<Text>, _>(end)
            .execute(conn)
            .unwrap();
    }

    fn stored(conn: &mut SqliteConnection, table: &str) -> Vec<(String, Option<String>)> {
        sql_query(format!("SELECT id, start_time, end_time FROM {table} ORDER BY id"))
            .load::<StoredInterval>(conn)
            .unwrap()
            .into_iter()
            .map(|row| (row.start_time, row.end_time))
            .collect()
    }

    fn instant(text: &str) -> DateTime<Utc> {
        parse_stored_timestamp(text).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn fresh_store_applies_every_migration_once() {
        let mut conn = empty_conn();
        let applied = run_migrations(&mut conn).unwrap();
        assert_eq!(
            applied,
            vec![BASE_TABLES, ENTRY_HOURLY_RATE, ENTRY_MILESTONE_NAME, UTC_TIMESTAMPS]
        );
        for key in applied {
            assert!(has_migration_run(&mut conn, key).unwrap());
        }

        assert!(run_migrations(&mut conn).unwrap().is_empty());
        assert!(column_exists(&mut conn, "time_entries", "hourly_rate").unwrap());
        assert!(column_exists(&mut conn, "time_entries", "milestone_name").unwrap());
    }

    #[test]
    fn ledger_only_reports_completed_markers() {
        let mut conn = empty_conn();
        create_ledger(&mut conn).unwrap();
        assert!(!has_migration_run(&mut conn, "001_test_migration").unwrap());

        mark_migration_complete(&mut conn, "001_test_migration").unwrap();
        assert!(has_migration_run(&mut conn, "001_test_migration").unwrap());
        assert!(!has_migration_run(&mut conn, "002_another_migration").unwrap());

        // marking twice replaces the row rather than failing
        mark_migration_complete(&mut conn, "001_test_migration").unwrap();
    }

    #[test]
    fn local_offsets_are_converted_to_the_same_instant_in_utc() {
        let mut conn = legacy_conn();
        insert_entry(
            &mut conn,
            "2024-01-15 10:30:00-05:00",
            Some("2024-01-15 12:45:30.5-05:00"),
        );
        insert_milestone(&mut conn, "Sprint 1", "2024-01-15 09:00:00+09:00", None);

        run_migrations(&mut conn).unwrap();

        let entries = stored(&mut conn, "time_entries");
        let (start, end) = &entries[0];
        assert_eq!(instant(start), Utc.with_ymd_and_hms(2024, 1, 15, 15, 30, 0).unwrap());
        assert_eq!(parse_stored_timestamp(start).unwrap().offset().local_minus_utc(), 0);
        let end = end.as_deref().unwrap();
        assert_eq!(instant(end), instant("2024-01-15 12:45:30.5-05:00"));
        assert_eq!(parse_stored_timestamp(end).unwrap().offset().local_minus_utc(), 0);

        let milestones = stored(&mut conn, "milestones");
        assert_eq!(
            instant(&milestones[0].0),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn utc_rows_are_left_byte_identical() {
        let mut conn = legacy_conn();
        insert_entry(&mut conn, "2024-01-15 10:30:00.123+00:00", None);
        insert_entry(&mut conn, "2024-01-15T10:30:00Z", Some("2024-01-15 11:30:00"));
        insert_entry(&mut conn, "2024-01-16 10:30:00+01:00", None);
        let before = stored(&mut conn, "time_entries");

        let changed = conn
            .transaction::<_, anyhow::Error, _>(normalize_timestamps_to_utc)
            .unwrap();
        assert_eq!(changed, 1);

        let after = stored(&mut conn, "time_entries");
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[1]);
        assert_ne!(after[2], before[2]);
    }

    #[test]
    fn converted_rows_fall_inside_range_queries() {
        let mut conn = legacy_conn();
        insert_entry(&mut conn, "2024-01-15 10:30:00-05:00", None);
        run_migrations(&mut conn).unwrap();

        let mut conn = Conn(conn);
        let found = get_entries_by_date_range(
            &mut conn,
            Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].started_at, Utc.with_ymd_and_hms(2024, 1, 15, 15, 30, 0).unwrap());
    }

    #[test]
    fn null_end_times_survive_migration() {
        let mut conn = legacy_conn();
        insert_entry(&mut conn, "2024-01-15 10:30:00+02:00", None);
        insert_milestone(&mut conn, "Sprint 1", "2024-01-15 10:30:00+02:00", None);

        run_migrations(&mut conn).unwrap();

        assert_eq!(stored(&mut conn, "time_entries")[0].1, None);
        assert_eq!(stored(&mut conn, "milestones")[0].1, None);
    }

    #[test]
    fn completed_migration_does_not_rescan_rows() {
        let mut conn = legacy_conn();
        insert_entry(&mut conn, "2024-01-15 10:30:00+02:00", None);
        run_migrations(&mut conn).unwrap();
        let first_run = stored(&mut conn, "time_entries");

        // rows written after the migration are not looked at again
        insert_entry(&mut conn, "2024-02-01 08:00:00+02:00", None);
        assert!(run_migrations(&mut conn).unwrap().is_empty());

        let second_run = stored(&mut conn, "time_entries");
        assert_eq!(second_run[0], first_run[0]);
        assert_eq!(second_run[1].0, "2024-02-01 08:00:00+02:00");
    }

    fn failing_after_normalizing(conn: &mut SqliteConnection) -> Result<usize> {
        normalize_timestamps_to_utc(conn)?;
        anyhow::bail!("simulated failure")
    }

    #[test]
    fn failed_migration_rolls_back_data_and_marker() {
        let mut conn = legacy_conn();
        insert_entry(&mut conn, "2024-01-15 10:30:00+02:00", None);
        let before = stored(&mut conn, "time_entries");

        let failing = [Migration {
            key: UTC_TIMESTAMPS,
            apply: failing_after_normalizing,
        }];
        let err = run_migration_list(&mut conn, &failing).unwrap_err();
        assert!(format!("{err:#}").contains("simulated failure"));

        assert_eq!(stored(&mut conn, "time_entries"), before);
        assert!(!has_migration_run(&mut conn, UTC_TIMESTAMPS).unwrap());

        // the real migration then runs in full on the next attempt
        assert_eq!(run_migrations(&mut conn).unwrap(), vec![UTC_TIMESTAMPS]);
        assert_ne!(stored(&mut conn, "time_entries"), before);
    }

    #[test]
    fn unreadable_timestamps_abort_the_migration() {
        let mut conn = legacy_conn();
        insert_entry(&mut conn, "2024-01-15 10:30:00+02:00", None);
        insert_entry(&mut conn, "last tuesday", None);

        assert!(run_migrations(&mut conn).is_err());
        assert_eq!(stored(&mut conn, "time_entries")[0].0, "2024-01-15 10:30:00+02:00");
        assert!(!has_migration_run(&mut conn, UTC_TIMESTAMPS).unwrap());
    }

    #[test]
    fn stores_from_older_releases_keep_their_existing_columns() {
        let mut conn = empty_conn();
        conn.batch_execute(
            "CREATE TABLE time_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_name TEXT NOT NULL,
                start_time DATETIME NOT NULL,
                end_time DATETIME,
                description TEXT,
                hourly_rate REAL,
                milestone_name TEXT
            );
            INSERT INTO time_entries (project_name, start_time, hourly_rate, milestone_name)
            VALUES ('P', '2024-01-15 10:30:00-08:00', 25.5, 'M1');",
        )
        .unwrap();

        run_migrations(&mut conn).unwrap();

        let entries = stored(&mut conn, "time_entries");
        assert_eq!(entries[0].0, "2024-01-15 18:30:00+00:00");
    }

    #[test]
    fn missing_columns_are_added_to_old_tables() {
        let mut conn = empty_conn();
        conn.batch_execute(
            "CREATE TABLE time_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_name TEXT NOT NULL,
                start_time DATETIME NOT NULL,
                end_time DATETIME,
                description TEXT
            );",
        )
        .unwrap();
        assert!(!column_exists(&mut conn, "time_entries", "hourly_rate").unwrap());

        run_migrations(&mut conn).unwrap();

        assert!(column_exists(&mut conn, "time_entries", "hourly_rate").unwrap());
        assert!(column_exists(&mut conn, "time_entries", "milestone_name").unwrap());
    }

    #[test]
    fn parses_timestamps_from_every_known_layout() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        for text in [
            "2024-01-15 10:30:00+00:00",
            "2024-01-15T10:30:00Z",
            "2024-01-15 12:30:00+0200",
            "2024-01-15 05:30:00 -0500",
            "2024-01-15 10:30:00",
            "2024-01-15T10:30:00",
        ] {
            assert_eq!(instant(text), expected, "parsing {text}");
        }
    }
}
