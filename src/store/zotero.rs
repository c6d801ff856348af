use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};
use time::format_description::FormatItem;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::domain::record::{
    AnnotationDescriptor, AttachmentDescriptor, AttachmentSource, Identifiers, Record,
};

use super::{CanonicalStore, StoreError};

pub const DATABASE_FILE: &str = "zotero.sqlite";
const STORAGE_DIR: &str = "storage";
const STORAGE_PREFIX: &str = "storage:";
const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";
const KEY_LEN: usize = 8;
const NON_RECORD_TYPES: &str = "('attachment', 'note', 'annotation')";
const ZOTERO_TIMESTAMP: &[FormatItem<'static>] = time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

/// Zotero's `zotero.sqlite`. Reads go through a read-only connection so a
/// running Zotero instance is never disturbed; each annotation append opens
/// its own read-write connection and commits in one transaction.
pub struct ZoteroStore {
    db_path: PathBuf,
    storage_dir: PathBuf,
    busy_timeout: Duration,
    read: Connection,
}

impl ZoteroStore {
    pub fn open(data_dir: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let db_path = data_dir.join(DATABASE_FILE);
        if !db_path.is_file() {
            return Err(StoreError::Unavailable(format!(
                "no {} found in {}",
                DATABASE_FILE,
                data_dir.display()
            )));
        }
        let read = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        read.busy_timeout(busy_timeout)?;
        Ok(Self {
            db_path,
            storage_dir: data_dir.join(STORAGE_DIR),
            busy_timeout,
            read,
        })
    }

    fn open_write(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn load_record(&self, item_id: i64, key: String) -> Result<Record, StoreError> {
        let fields = self.item_fields(item_id)?;
        let field = |name: &str| {
            fields
                .get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Record {
            title: field("title").unwrap_or_default(),
            year: field("date").as_deref().and_then(parse_year),
            identifiers: Identifiers {
                doi: field("DOI"),
                url: field("url"),
                isbn: field("ISBN"),
                publication: field("publicationTitle"),
            },
            abstract_note: field("abstractNote"),
            authors: self.item_authors(item_id)?,
            collections: self.item_collections(item_id)?,
            tags: self.item_tags(item_id)?,
            attachments: self.item_attachments(item_id)?,
            annotations: self.item_notes(item_id)?,
            key,
        })
    }

    fn item_fields(&self, item_id: i64) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = self.read.prepare_cached(
            r#"
SELECT f.fieldName, CAST(v.value AS TEXT)
FROM itemData d
JOIN fields f ON f.fieldID = d.fieldID
JOIN itemDataValues v ON v.valueID = d.valueID
WHERE d.itemID = ?1
"#,
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (name, value) = row?;
            if let Some(value) = value {
                out.insert(name, value);
            }
        }
        Ok(out)
    }

    fn item_authors(&self, item_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.read.prepare_cached(
            r#"
SELECT c.firstName, c.lastName
FROM itemCreators ic
JOIN creators c ON c.creatorID = ic.creatorID
WHERE ic.itemID = ?1
ORDER BY ic.orderIndex
"#,
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (first, last) = row?;
            let name = format!(
                "{} {}",
                first.unwrap_or_default().trim(),
                last.unwrap_or_default().trim()
            );
            let name = name.trim();
            if !name.is_empty() {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }

    fn item_collections(&self, item_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.read.prepare_cached(
            r#"
SELECT c.collectionName
FROM collectionItems ci
JOIN collections c ON c.collectionID = ci.collectionID
WHERE ci.itemID = ?1
  AND c.collectionID NOT IN (SELECT collectionID FROM deletedCollections)
ORDER BY c.collectionName
"#,
        )?;
        let rows = stmt.query_map(params![item_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn item_tags(&self, item_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.read.prepare_cached(
            r#"
SELECT t.name
FROM itemTags it
JOIN tags t ON t.tagID = it.tagID
WHERE it.itemID = ?1
ORDER BY t.name
"#,
        )?;
        let rows = stmt.query_map(params![item_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn item_attachments(&self, item_id: i64) -> Result<Vec<AttachmentDescriptor>, StoreError> {
        let mut stmt = self.read.prepare_cached(
            r#"
SELECT i.key, a.path, a.contentType
FROM itemAttachments a
JOIN items i ON i.itemID = a.itemID
WHERE a.parentItemID = ?1
  AND a.itemID NOT IN (SELECT itemID FROM deletedItems)
ORDER BY i.key
"#,
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (attachment_key, path, media_type) = row?;
            // Linked URLs have no file behind them.
            let Some(path) = path.filter(|value| !value.trim().is_empty()) else {
                continue;
            };
            let resolved = self.resolve_attachment_path(&attachment_key, &path);
            let Some(name) = resolved
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            out.push(AttachmentDescriptor {
                name,
                source: AttachmentSource::Path(resolved),
                media_type,
            });
        }
        Ok(out)
    }

    fn resolve_attachment_path(&self, attachment_key: &str, raw: &str) -> PathBuf {
        match raw.strip_prefix(STORAGE_PREFIX) {
            Some(file_name) => self.storage_dir.join(attachment_key).join(file_name),
            None => PathBuf::from(raw),
        }
    }

    fn item_notes(&self, item_id: i64) -> Result<Vec<AnnotationDescriptor>, StoreError> {
        let mut stmt = self.read.prepare_cached(
            r#"
SELECT i.key, n.note, CAST(i.dateAdded AS TEXT)
FROM itemNotes n
JOIN items i ON i.itemID = n.itemID
WHERE n.parentItemID = ?1
  AND n.itemID NOT IN (SELECT itemID FROM deletedItems)
"#,
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, note, created_at) = row?;
            let body = note_text(note.as_deref().unwrap_or_default());
            if body.is_empty() {
                continue;
            }
            out.push(AnnotationDescriptor {
                id,
                body,
                created_at: created_at.unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

impl CanonicalStore for ZoteroStore {
    fn list_records(&self) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            r#"
SELECT i.itemID, i.key
FROM items i
JOIN itemTypes t ON t.itemTypeID = i.itemTypeID
WHERE t.typeName NOT IN {NON_RECORD_TYPES}
  AND i.itemID NOT IN (SELECT itemID FROM deletedItems)
ORDER BY i.key
"#
        );
        let items = {
            let mut stmt = self.read.prepare(&sql)?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<(i64, String)>, _>>()?
        };

        let mut records = Vec::with_capacity(items.len());
        for (item_id, key) in items {
            records.push(self.load_record(item_id, key)?);
        }
        debug!(count = records.len(), "loaded records from zotero");
        Ok(records)
    }

    fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.read.prepare(
            r#"
SELECT DISTINCT collectionName
FROM collections
WHERE collectionID NOT IN (SELECT collectionID FROM deletedCollections)
ORDER BY collectionName
"#,
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn contains_record(&self, key: &str) -> Result<bool, StoreError> {
        let sql = format!(
            r#"
SELECT 1
FROM items i
JOIN itemTypes t ON t.itemTypeID = i.itemTypeID
WHERE i.key = ?1
  AND t.typeName NOT IN {NON_RECORD_TYPES}
  AND i.itemID NOT IN (SELECT itemID FROM deletedItems)
LIMIT 1
"#
        );
        let found: Option<i64> = self
            .read
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn append_annotation(&self, key: &str, title: &str, body: &str) -> Result<String, StoreError> {
        let mut conn = self.open_write()?;
        let tx = conn.transaction()?;

        let parent: Option<(i64, i64)> = tx
            .query_row(
                r#"
SELECT itemID, libraryID
FROM items
WHERE key = ?1 AND itemID NOT IN (SELECT itemID FROM deletedItems)
"#,
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (parent_id, library_id) = parent.ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let note_type: i64 = tx
            .query_row(
                "SELECT itemTypeID FROM itemTypes WHERE typeName = 'note'",
                [],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::Write("zotero schema has no 'note' item type".to_string()))?;

        let mut note_key = generate_item_key();
        for _ in 0..16 {
            let taken: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM items WHERE libraryID = ?1 AND key = ?2",
                    params![library_id, note_key],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_none() {
                break;
            }
            note_key = generate_item_key();
        }

        let now = zotero_timestamp();
        tx.execute(
            r#"
INSERT INTO items (itemTypeID, libraryID, dateAdded, dateModified, clientDateModified, key)
VALUES (?1, ?2, ?3, ?3, ?3, ?4)
"#,
            params![note_type, library_id, now, note_key],
        )?;
        let note_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO itemNotes (itemID, parentItemID, note, title) VALUES (?1, ?2, ?3, ?4)",
            params![note_id, parent_id, format!("{}\n\n{}", title, body), title],
        )?;
        tx.commit()?;
        debug!(record = key, note = %note_key, "appended note to zotero item");
        Ok(note_key)
    }
}

fn parse_year(date: &str) -> Option<i32> {
    let bytes = date.as_bytes();
    bytes.windows(4).enumerate().find_map(|(index, window)| {
        let starts_run = index == 0 || !bytes[index - 1].is_ascii_digit();
        let ends_run = bytes
            .get(index + 4)
            .map_or(true, |next| !next.is_ascii_digit());
        if starts_run && ends_run && window.iter().all(u8::is_ascii_digit) {
            date[index..index + 4].parse().ok()
        } else {
            None
        }
    })
}

fn generate_item_key() -> String {
    let digest = Sha256::digest(Uuid::now_v7().as_bytes());
    digest
        .iter()
        .take(KEY_LEN)
        .map(|byte| KEY_ALPHABET[*byte as usize % KEY_ALPHABET.len()] as char)
        .collect()
}

fn zotero_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(ZOTERO_TIMESTAMP)
        .expect("zotero timestamp formatting for UTC should never fail")
}

/// Reduces a Zotero HTML note to plain text: block boundaries become line
/// breaks, remaining tags are dropped, common entities are decoded.
pub fn note_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('>') else {
            text.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let tag = rest[open + 1..open + close].trim().to_ascii_lowercase();
        if is_line_break_tag(&tag) {
            text.push('\n');
        }
        rest = &rest[open + close + 1..];
    }
    text.push_str(rest);

    let decoded = decode_entities(&text);
    let mut lines = Vec::new();
    let mut blank_run = 0;
    for line in decoded.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

fn is_line_break_tag(tag: &str) -> bool {
    let name = tag
        .trim_start_matches('/')
        .split(|ch: char| ch.is_whitespace() || ch == '/')
        .next()
        .unwrap_or_default();
    let closing = tag.starts_with('/');
    match name {
        "br" => true,
        "p" | "div" | "li" | "tr" | "blockquote" | "pre" => closing,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => closing,
        _ => false,
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
