use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ResolvedConfig};
use crate::db::{self, now_utc_rfc3339, RunRecord, StateError};
use crate::imports::{ImportError, ImportReport, ImportService};
use crate::layout::VaultLayout;
use crate::store::{StoreError, ZoteroStore};
use crate::sync::{SyncError, SyncReport, SyncService};

/// Wires the Zotero store, the vault layout and the state database together
/// for one invocation.
pub struct App {
    layout: VaultLayout,
    zotero_dir: PathBuf,
    busy_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Sync,
    Import,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Sync => "sync",
            Direction::Import => "sync-notes",
        }
    }
}

impl App {
    pub fn open(config: &ResolvedConfig) -> Result<Self, AppError> {
        let vault = config.vault_path.clone().ok_or_else(|| {
            AppError::FatalConfiguration(
                "no vault configured; pass --vault or run `papermind configure --vault <dir>`"
                    .to_string(),
            )
        })?;
        let zotero_dir = config.zotero_dir.clone().ok_or_else(|| {
            AppError::FatalConfiguration(
                "no Zotero data directory found; pass --zotero-dir or run `papermind configure`"
                    .to_string(),
            )
        })?;
        Ok(Self {
            layout: VaultLayout::new(vault),
            zotero_dir,
            busy_timeout: config.busy_timeout(),
        })
    }

    pub fn forward_sync(&self, dry_run: bool) -> Result<SyncReport, AppError> {
        let started_at = now_utc_rfc3339();
        self.prepare_root(dry_run)?;
        let store = ZoteroStore::open(&self.zotero_dir, self.busy_timeout)?;
        let conn = self.open_state(dry_run)?;

        let report = SyncService::new(&store, &conn, &self.layout).run(dry_run)?;
        if !dry_run {
            let status = run_status(report.cancelled, report.has_failures());
            record_run(&conn, Direction::Sync, started_at, status, &report);
        }
        Ok(report)
    }

    pub fn reverse_import(&self, overwrite: bool, dry_run: bool) -> Result<ImportReport, AppError> {
        let started_at = now_utc_rfc3339();
        self.prepare_root(dry_run)?;
        let store = ZoteroStore::open(&self.zotero_dir, self.busy_timeout)?;
        let conn = self.open_state(dry_run)?;

        let report =
            ImportService::new(&store, &conn, &self.layout).run(overwrite, dry_run)?;
        if !dry_run {
            let status = run_status(report.cancelled, report.has_failures());
            record_run(&conn, Direction::Import, started_at, status, &report);
        }
        Ok(report)
    }

    /// Recent sync and import runs, newest first. Never creates the state
    /// database.
    pub fn run_history(&self, limit: usize) -> Result<Vec<RunRecord>, AppError> {
        let conn = db::open_state(&self.layout.state_db_path(), true)?;
        Ok(db::list_runs(&conn, limit)?)
    }

    fn prepare_root(&self, dry_run: bool) -> Result<(), AppError> {
        let root = self.layout.root();
        if root.is_dir() {
            return Ok(());
        }
        if root.exists() {
            return Err(AppError::FatalConfiguration(format!(
                "vault '{}' is not a directory",
                root.display()
            )));
        }
        if dry_run {
            info!(vault = %root.display(), "vault does not exist yet; previewing against an empty tree");
            return Ok(());
        }
        std::fs::create_dir_all(root).map_err(|err| {
            AppError::FatalConfiguration(format!(
                "vault '{}' does not exist and cannot be created: {}",
                root.display(),
                err
            ))
        })
    }

    fn open_state(&self, dry_run: bool) -> Result<Connection, AppError> {
        let path = self.layout.state_db_path();
        db::open_state(&path, dry_run).map_err(|err| {
            AppError::FatalConfiguration(format!(
                "state database '{}' is not writable: {}",
                path.display(),
                err
            ))
        })
    }
}

fn run_status(cancelled: bool, has_failures: bool) -> &'static str {
    if cancelled {
        "cancelled"
    } else if has_failures {
        "partial"
    } else {
        "completed"
    }
}

fn record_run<T: Serialize>(
    conn: &Connection,
    direction: Direction,
    started_at: String,
    status: &str,
    report: &T,
) {
    let summary = match serde_json::to_value(report) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "run summary not serializable");
            serde_json::Value::Null
        }
    };
    let run = RunRecord {
        run_id: Uuid::now_v7().to_string(),
        direction: direction.as_str().to_string(),
        started_at,
        finished_at: now_utc_rfc3339(),
        status: status.to_string(),
        summary,
    };
    if let Err(err) = db::record_run(conn, &run) {
        warn!(error = %err, "run history not recorded");
    }
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    InvalidArgument(String),
    Config(ConfigError),
    FatalConfiguration(String),
    State(StateError),
    Db(rusqlite::Error),
    Store(StoreError),
    Sync(SyncError),
    Import(ImportError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::FatalConfiguration(message) => write!(f, "{}", message),
            AppError::State(err) => write!(f, "{}", err),
            AppError::Db(err) => write!(f, "state database error: {}", err),
            AppError::Store(err) => write!(f, "{}", err),
            AppError::Sync(err) => write!(f, "sync error: {}", err),
            AppError::Import(err) => write!(f, "import error: {}", err),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::InvalidArgument(_) => None,
            AppError::Config(err) => Some(err),
            AppError::FatalConfiguration(_) => None,
            AppError::State(err) => Some(err),
            AppError::Db(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Sync(err) => Some(err),
            AppError::Import(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<StateError> for AppError {
    fn from(value: StateError) -> Self {
        AppError::State(value)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::Store(value)
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        AppError::Sync(value)
    }
}

impl From<ImportError> for AppError {
    fn from(value: ImportError) -> Self {
        AppError::Import(value)
    }
}
