use std::error::Error;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::files::atomic_write;
use crate::store::zotero::DATABASE_FILE;

pub const CONFIG_ENV: &str = "PAPERMIND_CONFIG";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Where Zotero keeps its data directory on the platforms we know about,
/// relative to `$HOME`, in lookup order.
const ZOTERO_CANDIDATES: &[&str] = &["Zotero", ".zotero", "snap/zotero-snap/common/Zotero"];

#[derive(Debug)]
pub enum ConfigError {
    MissingHome,
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Serialize(toml::ser::Error),
    InvalidPath(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingHome => {
                write!(f, "HOME is not set; set {} to choose a config file", CONFIG_ENV)
            }
            ConfigError::Io { path, source } => {
                write!(f, "cannot access config '{}': {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config '{}': {}", path.display(), source)
            }
            ConfigError::Serialize(err) => write!(f, "cannot serialize config: {}", err),
            ConfigError::InvalidPath(message) => write!(f, "{}", message),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(err) => Some(err),
            ConfigError::MissingHome | ConfigError::InvalidPath(_) => None,
        }
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        ConfigError::Serialize(value)
    }
}

/// Contents of `config.toml`. Every field is optional; absent fields fall
/// through to discovery or defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zotero_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
}

impl UserConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        atomic_write(path, rendered.as_bytes()).map_err(io_error)
    }

    /// Validates and stores new locations. Paths are stored absolute.
    pub fn update_paths(
        &mut self,
        zotero_dir: Option<&Path>,
        vault: Option<&Path>,
        home: Option<&Path>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = zotero_dir {
            let dir = absolute(&expand_home(dir, home))?;
            validate_zotero_dir(&dir)?;
            self.zotero_dir = Some(dir);
        }
        if let Some(vault) = vault {
            let vault = absolute(&expand_home(vault, home))?;
            validate_vault(&vault)?;
            self.vault_path = Some(vault);
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = home_dir().ok_or(ConfigError::MissingHome)?;
    Ok(home.join(".config").join("papermind").join("config.toml"))
}

/// Deletes the config file. Returns false when there was nothing to delete.
pub fn remove_config(path: &Path) -> Result<bool, ConfigError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Locations after applying flags (which already carry environment values)
/// over the config file over discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub config_path: PathBuf,
    pub zotero_dir: Option<PathBuf>,
    pub vault_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl ResolvedConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

pub fn resolve(
    config_path: PathBuf,
    file: &UserConfig,
    zotero_flag: Option<&Path>,
    vault_flag: Option<&Path>,
    home: Option<&Path>,
) -> ResolvedConfig {
    let zotero_dir = zotero_flag
        .map(Path::to_path_buf)
        .or_else(|| file.zotero_dir.clone())
        .map(|dir| expand_home(&dir, home))
        .or_else(|| home.and_then(discover_zotero_dir));
    let vault_path = vault_flag
        .map(Path::to_path_buf)
        .or_else(|| file.vault_path.clone())
        .map(|vault| expand_home(&vault, home));
    ResolvedConfig {
        config_path,
        zotero_dir,
        vault_path,
        busy_timeout_ms: file.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
    }
}

pub fn discover_zotero_dir(home: &Path) -> Option<PathBuf> {
    ZOTERO_CANDIDATES
        .iter()
        .map(|candidate| home.join(candidate))
        .find(|dir| dir.join(DATABASE_FILE).is_file())
}

pub fn validate_zotero_dir(dir: &Path) -> Result<(), ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::InvalidPath(format!(
            "Zotero directory '{}' does not exist",
            dir.display()
        )));
    }
    if !dir.join(DATABASE_FILE).is_file() {
        return Err(ConfigError::InvalidPath(format!(
            "'{}' has no {}; point --zotero-dir at the Zotero data directory",
            dir.display(),
            DATABASE_FILE
        )));
    }
    Ok(())
}

pub fn validate_vault(vault: &Path) -> Result<(), ConfigError> {
    if !vault.is_dir() {
        return Err(ConfigError::InvalidPath(format!(
            "vault '{}' is not a directory",
            vault.display()
        )));
    }
    Ok(())
}

pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
