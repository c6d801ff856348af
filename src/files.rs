use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Unchanged,
    Created,
    Updated,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        self != WriteOutcome::Unchanged
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Replaces `path` with `bytes` so that readers only ever observe the old or
/// the new content. The temporary file lives in the destination directory so
/// the final rename never crosses filesystems.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path_for(path)?;
    let result = write_and_rename(&tmp, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, path)
}

fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("cannot write to path without a file name: {}", path.display()),
        )
    })?;
    let tmp_name = format!(".{}.tmp-{}", name, Uuid::now_v7().simple());
    Ok(path.with_file_name(tmp_name))
}

pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".tmp-")
}

/// Compares `bytes` with what is on disk and writes only when they differ.
/// With `dry_run` the comparison still happens but nothing is written.
pub fn write_if_changed(path: &Path, bytes: &[u8], dry_run: bool) -> io::Result<WriteOutcome> {
    let outcome = match fs::metadata(path) {
        Ok(meta) if meta.len() != bytes.len() as u64 => WriteOutcome::Updated,
        Ok(_) => {
            if fs::read(path)? == bytes {
                WriteOutcome::Unchanged
            } else {
                WriteOutcome::Updated
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => WriteOutcome::Created,
        Err(err) => return Err(err),
    };

    if outcome.changed() && !dry_run {
        atomic_write(path, bytes)?;
    }
    Ok(outcome)
}

pub fn read_optional_string(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
