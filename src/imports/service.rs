use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelFlag;
use crate::document::split_regions;
use crate::files::{is_temp_file_name, sha256_hex};
use crate::layout::VaultLayout;
use crate::manifest;
use crate::report::FailedItem;
use crate::store::CanonicalStore;

use super::errors::ImportError;
use super::ledger::DedupLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Import,
    Reimport,
    SkipUnchanged,
    SkipModified,
    SkipEmpty,
    SkipNotFound,
    Failed,
}

impl ImportAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportAction::Import => "import",
            ImportAction::Reimport => "reimport",
            ImportAction::SkipUnchanged => "skip-unchanged",
            ImportAction::SkipModified => "skip-modified",
            ImportAction::SkipEmpty => "skip-empty",
            ImportAction::SkipNotFound => "skip-not-found",
            ImportAction::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentAction {
    pub record_key: String,
    /// `None` when the whole directory was skipped.
    pub document: Option<String>,
    pub action: ImportAction,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: u64,
    pub skipped_unchanged: u64,
    pub skipped_modified: u64,
    pub skipped_empty: u64,
    pub skipped_not_found: u64,
    pub failed: u64,
    pub failures: Vec<FailedItem>,
    pub actions: Vec<DocumentAction>,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn push(&mut self, record_key: &str, document: Option<&str>, action: ImportAction) {
        match action {
            ImportAction::Import | ImportAction::Reimport => self.imported += 1,
            ImportAction::SkipUnchanged => self.skipped_unchanged += 1,
            ImportAction::SkipModified => self.skipped_modified += 1,
            ImportAction::SkipEmpty => self.skipped_empty += 1,
            ImportAction::SkipNotFound => self.skipped_not_found += 1,
            ImportAction::Failed => self.failed += 1,
        }
        self.actions.push(DocumentAction {
            record_key: record_key.to_string(),
            document: document.map(str::to_string),
            action,
        });
    }

    fn fail(&mut self, record_key: &str, document: Option<&str>, reason: impl ToString) {
        let item = match document {
            Some(name) => format!("{}/{}", record_key, name),
            None => record_key.to_string(),
        };
        let failure = FailedItem::import_skipped(item, reason);
        warn!(item = %failure.item, reason = %failure.reason, "document skipped");
        self.failures.push(failure);
        self.push(record_key, document, ImportAction::Failed);
    }
}

pub struct ImportService<'a, S: CanonicalStore + ?Sized> {
    store: &'a S,
    conn: &'a Connection,
    layout: &'a VaultLayout,
    cancel: CancelFlag,
}

impl<'a, S: CanonicalStore + ?Sized> ImportService<'a, S> {
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

    /// Pushes user-authored documents from every projection directory into
    /// the canonical store as annotations.
    pub fn run(&self, overwrite: bool, dry_run: bool) -> Result<ImportReport, ImportError> {
        let mut report = ImportReport {
            dry_run,
            ..ImportReport::default()
        };
        let ledger = DedupLedger::new(self.conn);

        'records: for dir in record_dirs(&self.layout.projections_dir())? {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let name = dir_name(&dir);
            if name.starts_with('.') {
                continue;
            }
            let Some(record_key) = self.layout.record_key_of(&dir) else {
                report.push(&name, None, ImportAction::SkipNotFound);
                continue;
            };
            match self.store.contains_record(&record_key) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(record = %record_key, "directory has no matching record");
                    report.push(&record_key, None, ImportAction::SkipNotFound);
                    continue;
                }
                Err(err) => {
                    report.fail(&record_key, None, err);
                    continue;
                }
            }

            let documents = match self.user_documents(&record_key, &dir) {
                Ok(documents) => documents,
                Err(err) => {
                    report.fail(&record_key, None, err);
                    continue;
                }
            };
            for (document, path) in documents {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'records;
                }
                match self.import_document(&ledger, &record_key, &document, &path, overwrite, dry_run)
                {
                    Ok(action) => {
                        if action == ImportAction::SkipModified {
                            warn!(
                                record = %record_key,
                                document = %document,
                                "document changed since its last import; pass --overwrite to import it again"
                            );
                        }
                        report.push(&record_key, Some(&document), action);
                    }
                    Err(reason) => report.fail(&record_key, Some(&document), reason),
                }
            }
        }

        info!(
            imported = report.imported,
            skipped_unchanged = report.skipped_unchanged,
            skipped_modified = report.skipped_modified,
            skipped_not_found = report.skipped_not_found,
            failed = report.failed,
            dry_run,
            "reverse import finished"
        );
        Ok(report)
    }

    /// Markdown files directly inside `dir` that the last forward sync did
    /// not generate, sorted by name.
    fn user_documents(
        &self,
        record_key: &str,
        dir: &Path,
    ) -> Result<Vec<(String, PathBuf)>, ImportError> {
        let generated = manifest::load(self.conn, record_key)?
            .map(|files| files.into_keys().collect::<BTreeSet<_>>());
        let is_generated = |name: &str| match &generated {
            Some(names) => names.contains(name),
            None => manifest::looks_generated(name),
        };

        let mut documents = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !name.ends_with(".md")
                || name.starts_with('.')
                || is_temp_file_name(name)
                || is_generated(name)
            {
                continue;
            }
            documents.push((name.to_string(), entry.path().to_path_buf()));
        }
        Ok(documents)
    }

    fn import_document(
        &self,
        ledger: &DedupLedger<'_>,
        record_key: &str,
        document: &str,
        path: &Path,
        overwrite: bool,
        dry_run: bool,
    ) -> Result<ImportAction, String> {
        let bytes = std::fs::read(path).map_err(|err| format!("unreadable: {}", err))?;
        let fingerprint = sha256_hex(&bytes);
        let action = match ledger.get(record_key, document).map_err(|err| err.to_string())? {
            None => ImportAction::Import,
            Some(entry) if entry.fingerprint == fingerprint => return Ok(ImportAction::SkipUnchanged),
            Some(_) if overwrite => ImportAction::Reimport,
            Some(entry) => {
                debug!(
                    record = %record_key,
                    document = %document,
                    last_import = %entry.last_seen_at,
                    annotation = ?entry.annotation_key,
                    "document differs from its last import"
                );
                return Ok(ImportAction::SkipModified);
            }
        };

        let text = String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?;
        let body = split_regions(&text).body.trim();
        if body.is_empty() {
            return Ok(ImportAction::SkipEmpty);
        }
        if dry_run {
            return Ok(action);
        }

        let title = document.strip_suffix(".md").unwrap_or(document);
        let annotation_key = self
            .store
            .append_annotation(record_key, title, body)
            .map_err(|err| err.to_string())?;
        ledger
            .put(record_key, document, &fingerprint, Some(&annotation_key))
            .map_err(|err| {
                format!(
                    "imported as annotation {} but the ledger was not updated: {}",
                    annotation_key, err
                )
            })?;
        debug!(record = %record_key, document = %document, annotation = %annotation_key, "imported document");
        Ok(action)
    }
}

fn record_dirs(root: &Path) -> Result<Vec<PathBuf>, ImportError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
