//! Per-record list of files the last applied forward sync generated. Reverse
//! import treats everything else in a projection directory as user-authored.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};

use crate::db::now_utc_rfc3339;
use crate::layout::PRIMARY_DOCUMENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    Primary,
    Attachment,
    Annotation,
}

impl GeneratedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GeneratedKind::Primary => "primary",
            GeneratedKind::Attachment => "attachment",
            GeneratedKind::Annotation => "annotation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub name: String,
    pub kind: GeneratedKind,
    pub fingerprint: String,
}

pub fn replace(
    conn: &Connection,
    record_key: &str,
    files: &[GeneratedFile],
) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM projection_manifest WHERE record_key = ?1",
        params![record_key],
    )?;
    let synced_at = now_utc_rfc3339();
    {
        let mut insert = tx.prepare_cached(
            r#"
INSERT INTO projection_manifest (record_key, file_name, kind, fingerprint, synced_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
        )?;
        for file in files {
            insert.execute(params![
                record_key,
                file.name,
                file.kind.as_str(),
                file.fingerprint,
                synced_at
            ])?;
        }
    }
    tx.commit()
}

/// File name to fingerprint, or `None` when no forward sync has been applied
/// to the record yet.
pub fn load(
    conn: &Connection,
    record_key: &str,
) -> rusqlite::Result<Option<BTreeMap<String, String>>> {
    let mut stmt = conn.prepare_cached(
        "SELECT file_name, fingerprint FROM projection_manifest WHERE record_key = ?1",
    )?;
    let mut rows = stmt.query(params![record_key])?;
    let mut files = BTreeMap::new();
    while let Some(row) = rows.next()? {
        files.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
    }
    Ok(if files.is_empty() { None } else { Some(files) })
}

/// True when `files` is exactly what `previous` already records.
pub fn matches(previous: Option<&BTreeMap<String, String>>, files: &[GeneratedFile]) -> bool {
    previous.is_some_and(|previous| {
        previous.len() == files.len()
            && files
                .iter()
                .all(|file| previous.get(&file.name) == Some(&file.fingerprint))
    })
}

pub fn annotation_file_name(index: usize) -> String {
    format!("note-{:03}.md", index)
}

/// Fallback classification for records without a manifest.
pub fn looks_generated(file_name: &str) -> bool {
    if file_name == PRIMARY_DOCUMENT {
        return true;
    }
    file_name
        .strip_prefix("note-")
        .and_then(|rest| rest.strip_suffix(".md"))
        .is_some_and(|digits| digits.len() >= 3 && digits.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{
        annotation_file_name, load, looks_generated, matches, replace, GeneratedFile,
        GeneratedKind,
    };

    fn state() -> Connection {
        crate::db::open_in_memory().expect("in-memory state should migrate")
    }

    fn file(name: &str, kind: GeneratedKind) -> GeneratedFile {
        GeneratedFile {
            name: name.to_string(),
            kind,
            fingerprint: "00".to_string(),
        }
    }

    #[test]
    fn replace_drops_previous_names() {
        let conn = state();
        assert_eq!(load(&conn, "R1").expect("load should succeed"), None);

        replace(
            &conn,
            "R1",
            &[
                file("paper.md", GeneratedKind::Primary),
                file("old.pdf", GeneratedKind::Attachment),
            ],
        )
        .expect("replace should succeed");
        replace(
            &conn,
            "R1",
            &[
                file("paper.md", GeneratedKind::Primary),
                file("note-001.md", GeneratedKind::Annotation),
            ],
        )
        .expect("replace should succeed");

        let files = load(&conn, "R1")
            .expect("load should succeed")
            .expect("manifest should exist");
        assert_eq!(
            files.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["note-001.md", "paper.md"]
        );
        assert_eq!(files["paper.md"], "00");
        assert_eq!(load(&conn, "R2").expect("load should succeed"), None);

        let current = [
            file("paper.md", GeneratedKind::Primary),
            file("note-001.md", GeneratedKind::Annotation),
        ];
        assert!(matches(Some(&files), &current));
        assert!(!matches(Some(&files), &current[..1]));
        assert!(!matches(None, &current));
    }

    #[test]
    fn annotation_names_are_zero_padded() {
        assert_eq!(annotation_file_name(1), "note-001.md");
        assert_eq!(annotation_file_name(1234), "note-1234.md");
    }

    #[test]
    fn fallback_pattern_matches_generated_names_only() {
        assert!(looks_generated("paper.md"));
        assert!(looks_generated("note-007.md"));
        assert!(!looks_generated("note-7.md"));
        assert!(!looks_generated("notes.md"));
        assert!(!looks_generated("note-abc.md"));
    }
}
