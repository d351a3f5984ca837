//! Filesystem helpers shared by the file manager and the engine's path
//! handling.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Normalizes a tree path: ensures a `.db` extension and makes it absolute,
/// defaulting to `nexustree.db` in the current directory when unset.
#[must_use]
pub fn normalize_db_path(name_or_path: Option<&str>) -> PathBuf {
    let raw = match name_or_path {
        Some(s) if !s.trim().is_empty() => PathBuf::from(s),
        _ => PathBuf::from("nexustree"),
    };
    let pb = if raw.extension().is_none() {
        let mut p = raw;
        p.set_extension("db");
        p
    } else {
        raw
    };
    if pb.is_absolute() {
        pb
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(pb)
    }
}

/// Opens (creating if absent) a read/write file without truncating existing
/// contents, restricted to the owner where the platform supports it.
///
/// # Errors
/// Returns an error if the file cannot be created or opened.
pub fn create_secure(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new().read(true).write(true).create(true).truncate(false).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)
    }
}
