use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use super::zotero::DATABASE_FILE;

const SCHEMA: &str = include_str!("../../tests/fixtures/zotero_schema.sql");

/// Builds a throwaway Zotero data directory with just enough schema for the
/// store queries.
pub struct ZoteroFixture {
    pub data_dir: PathBuf,
    conn: Connection,
}

impl ZoteroFixture {
    pub fn create(data_dir: &Path) -> Self {
        std::fs::create_dir_all(data_dir).expect("zotero data dir should be creatable");
        let conn = Connection::open(data_dir.join(DATABASE_FILE)).expect("fixture db should open");
        conn.execute_batch(SCHEMA).expect("fixture schema should apply");
        Self {
            data_dir: data_dir.to_path_buf(),
            conn,
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn add_item(&self, key: &str, title: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO items (itemTypeID, libraryID, key) VALUES (2, 1, ?1)",
                params![key],
            )
            .expect("item should insert");
        let item_id = self.conn.last_insert_rowid();
        self.set_field(item_id, "title", title);
        item_id
    }

    pub fn set_field(&self, item_id: i64, field: &str, value: &str) {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO itemDataValues (value) VALUES (?1)",
                params![value],
            )
            .expect("value should insert");
        self.conn
            .execute(
                r#"
INSERT OR REPLACE INTO itemData (itemID, fieldID, valueID)
SELECT ?1, f.fieldID, v.valueID
FROM fields f, itemDataValues v
WHERE f.fieldName = ?2 AND v.value = ?3
"#,
                params![item_id, field, value],
            )
            .expect("item data should insert");
    }

    pub fn add_author(&self, item_id: i64, first: &str, last: &str, order: i64) {
        self.conn
            .execute(
                "INSERT INTO creators (firstName, lastName, fieldMode) VALUES (?1, ?2, 0)",
                params![first, last],
            )
            .expect("creator should insert");
        let creator_id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO itemCreators (itemID, creatorID, creatorTypeID, orderIndex) VALUES (?1, ?2, 1, ?3)",
                params![item_id, creator_id, order],
            )
            .expect("item creator should insert");
    }

    pub fn add_tag(&self, item_id: i64, tag: &str) {
        self.conn
            .execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![tag])
            .expect("tag should insert");
        self.conn
            .execute(
                "INSERT INTO itemTags (itemID, tagID) SELECT ?1, tagID FROM tags WHERE name = ?2",
                params![item_id, tag],
            )
            .expect("item tag should insert");
    }

    pub fn add_collection(&self, name: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO collections (collectionName) VALUES (?1)",
                params![name],
            )
            .expect("collection should insert");
        self.conn.last_insert_rowid()
    }

    pub fn add_to_collection(&self, collection_id: i64, item_id: i64) {
        self.conn
            .execute(
                "INSERT INTO collectionItems (collectionID, itemID) VALUES (?1, ?2)",
                params![collection_id, item_id],
            )
            .expect("collection item should insert");
    }

    /// Stores `content` under `storage/<attachment key>/<file name>`.
    pub fn add_stored_attachment(
        &self,
        parent_id: i64,
        attachment_key: &str,
        file_name: &str,
        content: &[u8],
    ) -> PathBuf {
        let dir = self.data_dir.join("storage").join(attachment_key);
        std::fs::create_dir_all(&dir).expect("storage dir should be creatable");
        let path = dir.join(file_name);
        std::fs::write(&path, content).expect("attachment should be writable");

        self.conn
            .execute(
                "INSERT INTO items (itemTypeID, libraryID, key) VALUES (3, 1, ?1)",
                params![attachment_key],
            )
            .expect("attachment item should insert");
        let item_id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                r#"
INSERT INTO itemAttachments (itemID, parentItemID, linkMode, contentType, path)
VALUES (?1, ?2, 1, 'application/pdf', ?3)
"#,
                params![item_id, parent_id, format!("storage:{}", file_name)],
            )
            .expect("attachment row should insert");
        path
    }

    pub fn add_note(&self, parent_id: i64, note_key: &str, html: &str, date_added: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO items (itemTypeID, libraryID, key, dateAdded) VALUES (1, 1, ?1, ?2)",
                params![note_key, date_added],
            )
            .expect("note item should insert");
        let item_id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO itemNotes (itemID, parentItemID, note, title) VALUES (?1, ?2, ?3, '')",
                params![item_id, parent_id, html],
            )
            .expect("note row should insert");
        item_id
    }

    pub fn delete_item(&self, item_id: i64) {
        self.conn
            .execute(
                "INSERT INTO deletedItems (itemID) VALUES (?1)",
                params![item_id],
            )
            .expect("deleted item should insert");
    }

    pub fn delete_collection(&self, collection_id: i64) {
        self.conn
            .execute(
                "INSERT INTO deletedCollections (collectionID) VALUES (?1)",
                params![collection_id],
            )
            .expect("deleted collection should insert");
    }
}
