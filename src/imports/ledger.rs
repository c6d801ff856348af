use rusqlite::{params, Connection, OptionalExtension};

use crate::db::now_utc_rfc3339;

use super::errors::ImportError;

/// What the last import (or adopted baseline) of one document looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub annotation_key: Option<String>,
    pub last_seen_at: String,
}

/// Fingerprints of documents already pushed into the canonical store,
/// keyed by (record key, document name).
pub struct DedupLedger<'a> {
    conn: &'a Connection,
}

impl<'a> DedupLedger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(
        &self,
        record_key: &str,
        document_name: &str,
    ) -> Result<Option<LedgerEntry>, ImportError> {
        let entry = self
            .conn
            .query_row(
                r#"
SELECT fingerprint, annotation_key, last_seen_at
FROM dedup_ledger
WHERE record_key = ?1 AND document_name = ?2
"#,
                params![record_key, document_name],
                |row| {
                    Ok(LedgerEntry {
                        fingerprint: row.get(0)?,
                        annotation_key: row.get(1)?,
                        last_seen_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Replaces any previous entry for the document.
    pub fn put(
        &self,
        record_key: &str,
        document_name: &str,
        fingerprint: &str,
        annotation_key: Option<&str>,
    ) -> Result<(), ImportError> {
        self.conn.execute(
            r#"
INSERT INTO dedup_ledger (record_key, document_name, fingerprint, annotation_key, last_seen_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(record_key, document_name) DO UPDATE SET
    fingerprint = excluded.fingerprint,
    annotation_key = excluded.annotation_key,
    last_seen_at = excluded.last_seen_at
"#,
            params![
                record_key,
                document_name,
                fingerprint,
                annotation_key,
                now_utc_rfc3339()
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> Result<usize, ImportError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dedup_ledger", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
