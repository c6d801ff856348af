use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

pub const VAULT_BASE_DIR: &str = "Zotero";
pub const PROJECTIONS_DIR: &str = "repo";
pub const VIEWS_DIR: &str = "collections";
pub const STATE_DIR: &str = ".papermind";
pub const STATE_DB_FILE: &str = "state.sqlite";
pub const PRIMARY_DOCUMENT: &str = "paper.md";

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILE_STEM_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    EmptyKey,
    UnsafeKey(String),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::EmptyKey => write!(f, "record key is empty"),
            LayoutError::UnsafeKey(key) => {
                write!(f, "record key '{}' is not safe to use as a directory name", key)
            }
        }
    }
}

impl Error for LayoutError {}

/// Fixed on-disk layout of a vault:
///
/// ```text
/// <root>/Zotero/repo/<record key>/paper.md
/// <root>/Zotero/collections/<collection>.md
/// <root>/Zotero/.papermind/state.sqlite
/// ```
///
/// Record directories are named by the canonical key itself, so the mapping
/// is deterministic and collision-free without any lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join(VAULT_BASE_DIR)
    }

    pub fn projections_dir(&self) -> PathBuf {
        self.base_dir().join(PROJECTIONS_DIR)
    }

    pub fn views_dir(&self) -> PathBuf {
        self.base_dir().join(VIEWS_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir().join(STATE_DIR)
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.state_dir().join(STATE_DB_FILE)
    }

    /// Vault-relative folder the collection views query against.
    pub fn projections_query_root(&self) -> String {
        format!("{}/{}", VAULT_BASE_DIR, PROJECTIONS_DIR)
    }

    pub fn locate(&self, record_key: &str) -> Result<PathBuf, LayoutError> {
        validate_record_key(record_key)?;
        Ok(self.projections_dir().join(record_key))
    }

    pub fn record_key_of(&self, directory: &Path) -> Option<String> {
        if directory.parent()? != self.projections_dir() {
            return None;
        }
        let name = directory.file_name()?.to_str()?;
        validate_record_key(name).ok()?;
        Some(name.to_string())
    }
}

pub fn validate_record_key(key: &str) -> Result<(), LayoutError> {
    if key.trim().is_empty() {
        return Err(LayoutError::EmptyKey);
    }
    let unsafe_key = key == "."
        || key == ".."
        || key.starts_with('.')
        || key != key.trim()
        || key
            .chars()
            .any(|ch| ch.is_control() || UNSAFE_CHARS.contains(&ch));
    if unsafe_key {
        return Err(LayoutError::UnsafeKey(key.to_string()));
    }
    Ok(())
}

/// Makes an arbitrary display name usable as a file stem on every platform
/// the note tool runs on.
pub fn sanitize_file_stem(name: &str) -> String {
    let replaced = name
        .chars()
        .map(|ch| {
            if ch.is_control() || UNSAFE_CHARS.contains(&ch) {
                '_'
            } else {
                ch
            }
        })
        .collect::<String>();
    let trimmed = replaced.trim_matches(|ch| ch == '.' || ch == ' ');
    let truncated = trimmed.chars().take(MAX_FILE_STEM_CHARS).collect::<String>();
    let truncated = truncated.trim_end_matches(['.', ' ']);
    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated.to_string()
    }
}
