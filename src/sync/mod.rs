use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::ErrorKind;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::domain::record::Record;
use crate::layout::VaultLayout;
use crate::manifest;
use crate::report::FailedItem;
use crate::store::{CanonicalStore, StoreError};

pub mod projector;
pub mod views;

use projector::{ChangeKind, MetadataProjector};
use views::CollectionViewBuilder;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecordChange {
    pub key: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub views_changed: u64,
    pub failures: Vec<FailedItem>,
    /// Projection directories with no matching record. Never modified.
    pub orphans: Vec<String>,
    /// Records that were (or, in a dry run, would be) written.
    pub changes: Vec<RecordChange>,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct SyncService<'a, S: CanonicalStore + ?Sized> {
    store: &'a S,
    conn: &'a Connection,
    layout: &'a VaultLayout,
    cancel: CancelFlag,
}

impl<'a, S: CanonicalStore + ?Sized> SyncService<'a, S> {
    pub fn new(store: &'a S, conn: &'a Connection, layout: &'a VaultLayout) -> Self {
        Self {
            store,
            conn,
            layout,
            cancel: CancelFlag::new(),
        }
    }

    #[cfg(test)]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rebuilds every projection and collection view from the canonical store.
    /// Only store and vault-root failures are returned as errors; everything
    /// scoped to one record or view ends up in the report.
    pub fn run(&self, dry_run: bool) -> Result<SyncReport, SyncError> {
        let mut records = self.store.list_records()?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        let collections = self.store.list_collections()?;

        if !dry_run {
            fs::create_dir_all(self.layout.projections_dir())?;
        }

        let mut report = SyncReport {
            dry_run,
            ..SyncReport::default()
        };
        let projector = MetadataProjector::new(self.layout);
        for record in &records {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.sync_record(&projector, record, dry_run) {
                Ok(change) => {
                    match change {
                        ChangeKind::Unchanged => report.unchanged += 1,
                        ChangeKind::Created => report.created += 1,
                        ChangeKind::MetadataUpdated | ChangeKind::AttachmentUpdated => {
                            report.updated += 1
                        }
                    }
                    if change != ChangeKind::Unchanged {
                        report.changes.push(RecordChange {
                            key: record.key.clone(),
                            change,
                        });
                    }
                }
                Err(failure) => {
                    warn!(record = %failure.item, reason = %failure.reason, "record skipped");
                    report.failed += 1;
                    report.failures.push(failure);
                }
            }
        }

        if !report.cancelled {
            let views = CollectionViewBuilder::new(self.layout).build(&records, &collections, dry_run);
            report.views_changed = views.changed;
            report.failed += views.failures.len() as u64;
            report.failures.extend(views.failures);
        }
        report.orphans = self.find_orphans(&records)?;

        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            views_changed = report.views_changed,
            orphans = report.orphans.len(),
            dry_run,
            "forward sync finished"
        );
        Ok(report)
    }

    fn sync_record(
        &self,
        projector: &MetadataProjector<'_>,
        record: &Record,
        dry_run: bool,
    ) -> Result<ChangeKind, FailedItem> {
        let fail = |reason: &dyn fmt::Display| FailedItem::record_skipped(record.key.clone(), reason);
        let previous = manifest::load(self.conn, &record.key).map_err(|err| fail(&err))?;
        let projection = projector
            .project(record, previous.as_ref(), dry_run)
            .map_err(|err| fail(&err))?;
        if !dry_run && !manifest::matches(previous.as_ref(), &projection.generated) {
            manifest::replace(self.conn, &record.key, &projection.generated)
                .map_err(|err| fail(&err))?;
        }
        Ok(projection.change)
    }

    fn find_orphans(&self, records: &[Record]) -> Result<Vec<String>, SyncError> {
        let known = records
            .iter()
            .map(|record| record.key.as_str())
            .collect::<BTreeSet<_>>();
        let entries = match fs::read_dir(self.layout.projections_dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut orphans = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(key) = self.layout.record_key_of(&path) {
                if !known.contains(key.as_str()) {
                    orphans.push(key);
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }
}

#[derive(Debug)]
pub enum SyncError {
    Io(std::io::Error),
    Store(StoreError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Io(err) => write!(f, "vault I/O error: {}", err),
            SyncError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Io(err) => Some(err),
            SyncError::Store(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(value: std::io::Error) -> Self {
        SyncError::Io(value)
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        SyncError::Store(value)
    }
}
