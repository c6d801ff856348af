use std::error::Error;
use std::fmt;

use crate::domain::record::Record;

#[cfg(test)]
pub mod fixture;
#[cfg(test)]
pub mod memory;
pub mod zotero;

pub use zotero::ZoteroStore;

/// The reference manager the vault mirrors. Forward sync only reads from it;
/// reverse import only ever appends annotations to existing records.
pub trait CanonicalStore {
    /// Every live record, ordered by key.
    fn list_records(&self) -> Result<Vec<Record>, StoreError>;

    /// Every live collection name, including collections with no members.
    fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    fn contains_record(&self, key: &str) -> Result<bool, StoreError>;

    /// Appends a note to the record and returns the new annotation's key.
    fn append_annotation(&self, key: &str, title: &str, body: &str)
        -> Result<String, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Db(rusqlite::Error),
    Unavailable(String),
    NotFound(String),
    Write(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Db(err) => write!(f, "canonical store error: {}", err),
            StoreError::Unavailable(message) => write!(f, "canonical store unavailable: {}", message),
            StoreError::NotFound(key) => write!(f, "record '{}' not found in canonical store", key),
            StoreError::Write(message) => write!(f, "canonical store write failed: {}", message),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Db(value)
    }
}
