use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, ErrorCode, OpenFlags, OptionalExtension};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub const CURRENT_SCHEMA_VERSION: i64 = 3;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 3] = [
    Migration {
        version: 1,
        name: "dedup_ledger_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dedup_ledger (
    record_key TEXT NOT NULL,
    document_name TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    annotation_key TEXT,
    last_seen_at TEXT NOT NULL,
    PRIMARY KEY (record_key, document_name)
);
"#,
    },
    Migration {
        version: 2,
        name: "projection_manifest_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS projection_manifest (
    record_key TEXT NOT NULL,
    file_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (record_key, file_name)
);

CREATE INDEX IF NOT EXISTS idx_projection_manifest_kind
    ON projection_manifest(kind);
"#,
    },
    Migration {
        version: 3,
        name: "run_history_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS run_history (
    run_id TEXT PRIMARY KEY,
    direction TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    status TEXT NOT NULL,
    summary_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_history_finished_at
    ON run_history(finished_at);
"#,
    },
];

#[derive(Debug)]
pub enum StateError {
    Io(std::io::Error),
    Db(rusqlite::Error),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Io(err) => write!(f, "state directory error: {}", err),
            StateError::Db(err) => write!(f, "state database error: {}", err),
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StateError::Io(err) => Some(err),
            StateError::Db(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(value: std::io::Error) -> Self {
        StateError::Io(value)
    }
}

impl From<rusqlite::Error> for StateError {
    fn from(value: rusqlite::Error) -> Self {
        StateError::Db(value)
    }
}

/// Opens the engine state database.
///
/// A preview never touches the filesystem: an existing database is opened
/// read-only, anything else is replaced by an empty in-memory one. A live
/// run creates the database on demand and moves an unreadable file aside
/// before starting fresh.
pub fn open_state(path: &Path, dry_run: bool) -> Result<Connection, StateError> {
    if dry_run {
        return open_preview(path);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match open_connection(path) {
        Ok(conn) => Ok(conn),
        Err(err) if is_corruption(&err) => {
            let aside = quarantine(path)?;
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                "state database unreadable; starting with an empty ledger"
            );
            Ok(open_connection(path)?)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn open_preview(path: &Path) -> Result<Connection, StateError> {
    if path.is_file() {
        match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) if schema_is_current(&conn) => return Ok(conn),
            Ok(_) => warn!(
                path = %path.display(),
                "state database unreadable or outdated; previewing with an empty ledger"
            ),
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "state database unreadable; previewing with an empty ledger"
            ),
        }
    } else {
        debug!(path = %path.display(), "no state database yet; previewing with an empty ledger");
    }

    let mut conn = Connection::open_in_memory()?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    // Rollback journal keeps the state directory free of -wal/-shm siblings.
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "DELETE")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "FULL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

fn schema_is_current(conn: &Connection) -> bool {
    get_meta(conn, "schema_version")
        .ok()
        .flatten()
        .is_some_and(|version| version == CURRENT_SCHEMA_VERSION.to_string())
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(inner.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn quarantine(path: &Path) -> std::io::Result<PathBuf> {
    let stamp = OffsetDateTime::now_utc().unix_timestamp();
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", stamp));
    let aside = path.with_file_name(name);
    fs::rename(path, &aside)?;
    let journal = path.with_extension("sqlite-journal");
    if journal.exists() {
        let _ = fs::remove_file(journal);
    }
    Ok(aside)
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub direction: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub summary: serde_json::Value,
}

pub fn record_run(conn: &Connection, run: &RunRecord) -> rusqlite::Result<()> {
    conn.execute(
        r#"
INSERT INTO run_history (run_id, direction, started_at, finished_at, status, summary_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
        params![
            run.run_id,
            run.direction,
            run.started_at,
            run.finished_at,
            run.status,
            run.summary.to_string()
        ],
    )?;
    Ok(())
}

/// Most recent runs first.
pub fn list_runs(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT run_id, direction, started_at, finished_at, status, summary_json
FROM run_history
ORDER BY finished_at DESC, run_id DESC
LIMIT ?1
"#,
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut rows = stmt.query(params![limit])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let summary_json: String = row.get(5)?;
        result.push(RunRecord {
            run_id: row.get(0)?,
            direction: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            status: row.get(4)?,
            summary: serde_json::from_str(&summary_json).unwrap_or(serde_json::Value::Null),
        });
    }
    Ok(result)
}
