//! Owns the main data file and the WAL file, and mediates every page read
//! and write between them.

use crate::errors::{EngineError, Result};
use crate::wal::Wal;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Reads exactly `buf.len()` bytes starting at `offset`, without touching
/// the file's shared cursor. Lets readers proceed concurrently: the tree
/// level lock governs writer exclusion, not this I/O.
#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total = 0usize;
    while total < buf.len() {
        let n = file.seek_read(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        }
        total += n;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)
}

#[must_use]
pub fn derive_wal_path(main_path: &Path) -> PathBuf {
    let mut name = main_path.file_name().unwrap_or_default().to_os_string();
    name.push(".wal");
    main_path.with_file_name(name)
}

pub struct FileManager {
    main: File,
    wal: Wal,
    page_size: usize,
}

impl FileManager {
    /// Opens (creating if absent) the main file and its companion WAL file,
    /// replaying any committed-but-uncheckpointed transactions left from an
    /// unclean shutdown.
    ///
    /// # Errors
    /// Returns [`EngineError::CorruptWal`] or [`EngineError::IoError`] per
    /// [`Wal::open`]'s contract.
    pub fn open(main_path: &Path, page_size: usize) -> Result<Self> {
        let main = crate::fsutil::create_secure(main_path)?;
        let wal_path = derive_wal_path(main_path);
        let wal = Wal::open(&wal_path, page_size)?;
        let mut manager = Self { main, wal, page_size };
        if manager.wal.committed_len() > 0 {
            log::warn!("replaying {} page(s) recovered from write-ahead log", manager.wal.committed_len());
            manager.checkpoint()?;
        }
        Ok(manager)
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of distinct pages committed to the WAL since the last checkpoint.
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.wal.committed_len()
    }

    /// Reads the most recent image of `page_id`, preferring the WAL's view
    /// over the main file's.
    ///
    /// Takes `&self`: the WAL's in-memory index is read-only here, and the
    /// main file read is a positional `pread`, so concurrent readers never
    /// contend on a shared cursor or need exclusive access.
    ///
    /// # Errors
    /// Returns [`EngineError::CorruptPage`] if the page has never been
    /// written, or [`EngineError::IoError`] on underlying I/O failure.
    pub fn read_page(&self, page_id: u64) -> Result<Vec<u8>> {
        if let Some(bytes) = self.wal.read(page_id) {
            return Ok(bytes.to_vec());
        }
        let offset = page_id * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size];
        match read_at(&self.main, &mut buf, offset) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(EngineError::CorruptPage { page_id, reason: "page past end of file".into() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stages `frame` for `page_id` within the currently open transaction.
    pub fn write_page(&mut self, page_id: u64, frame: Vec<u8>) {
        self.wal.stage(page_id, frame);
    }

    pub fn begin_transaction(&mut self) {
        self.wal.begin_transaction();
    }

    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure.
    pub fn commit_transaction(&mut self) -> Result<()> {
        self.wal.commit()
    }

    pub fn discard_transaction(&mut self) {
        self.wal.discard_open();
    }

    /// Grows the main file by exactly one page and returns its id. This is a
    /// structural allocation, distinct from writing the new page's content,
    /// which still goes through the WAL like any other write.
    ///
    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure.
    pub fn extend(&mut self) -> Result<u64> {
        let len = self.main.metadata()?.len();
        let new_id = len / self.page_size as u64;
        self.main.set_len(len + self.page_size as u64)?;
        Ok(new_id)
    }

    /// Applies every page the WAL has committed since the last checkpoint to
    /// the main file, fsyncs it, then truncates the WAL.
    ///
    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure.
    pub fn checkpoint(&mut self) -> Result<()> {
        for (page_id, bytes) in self.wal.committed_frames().to_vec() {
            let offset = page_id * self.page_size as u64;
            self.main.seek(SeekFrom::Start(offset))?;
            self.main.write_all(&bytes)?;
        }
        self.main.sync_all()?;
        self.wal.reset_after_checkpoint()?;
        Ok(())
    }

    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure.
    pub fn close(&mut self) -> Result<()> {
        self.checkpoint()?;
        self.main.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extend_then_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.db");
        let mut fm = FileManager::open(&path, 32).unwrap();
        let id = fm.extend().unwrap();
        fm.begin_transaction();
        fm.write_page(id, vec![42u8; 32]);
        fm.commit_transaction().unwrap();
        assert_eq!(fm.read_page(id).unwrap(), vec![42u8; 32]);
    }

    #[test]
    fn checkpoint_persists_pages_to_main_file_and_empties_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.db");
        let mut fm = FileManager::open(&path, 32).unwrap();
        let id = fm.extend().unwrap();
        fm.begin_transaction();
        fm.write_page(id, vec![7u8; 32]);
        fm.commit_transaction().unwrap();
        fm.checkpoint().unwrap();
        drop(fm);

        let mut fm2 = FileManager::open(&path, 32).unwrap();
        assert_eq!(fm2.read_page(id).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn reopen_recovers_committed_but_uncheckpointed_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.db");
        {
            let mut fm = FileManager::open(&path, 32).unwrap();
            let id = fm.extend().unwrap();
            fm.begin_transaction();
            fm.write_page(id, vec![3u8; 32]);
            fm.commit_transaction().unwrap();
            // no explicit checkpoint: simulates a crash after commit
        }
        let mut fm = FileManager::open(&path, 32).unwrap();
        assert_eq!(fm.read_page(0).unwrap(), vec![3u8; 32]);
    }
}
