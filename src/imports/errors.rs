use std::error::Error;
use std::fmt;

use crate::store::StoreError;

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Store(StoreError),
    Walk(walkdir::Error),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "I/O error: {}", err),
            ImportError::Db(err) => write!(f, "ledger error: {}", err),
            ImportError::Store(err) => write!(f, "{}", err),
            ImportError::Walk(err) => write!(f, "vault walk failed: {}", err),
        }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Db(err) => Some(err),
            ImportError::Store(err) => Some(err),
            ImportError::Walk(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(value: std::io::Error) -> Self {
        ImportError::Io(value)
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(value: rusqlite::Error) -> Self {
        ImportError::Db(value)
    }
}

impl From<StoreError> for ImportError {
    fn from(value: StoreError) -> Self {
        ImportError::Store(value)
    }
}

impl From<walkdir::Error> for ImportError {
    fn from(value: walkdir::Error) -> Self {
        ImportError::Walk(value)
    }
}
