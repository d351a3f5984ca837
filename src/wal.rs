//! Write-ahead log: frames grouped into transactions terminated by a
//! checksummed commit record. Durability is achieved by fsyncing the WAL
//! file on commit; the main file is only ever touched during a checkpoint.

use crate::errors::{EngineError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// All-ones page id marks a commit record rather than a page frame.
const COMMIT_SENTINEL: u64 = u64::MAX;
const FRAME_ID_LEN: usize = 8;
const COMMIT_RECORD_LEN: usize = FRAME_ID_LEN + 4 + 4;

pub struct Wal {
    file: File,
    page_size: usize,
    /// Latest committed image of each page touched since the last checkpoint.
    committed: Vec<(u64, Vec<u8>)>,
    /// Frames staged by the transaction currently in progress, not yet committed.
    open_txn: Vec<(u64, Vec<u8>)>,
}

impl Wal {
    /// Opens (creating if absent) the WAL file at `path` and replays any
    /// committed transactions left over from an unclean shutdown.
    ///
    /// Torn trailing data (an incomplete frame or commit record at end of
    /// file) is silently discarded. A bad commit record followed by more
    /// data is reported as [`EngineError::CorruptWal`].
    ///
    /// # Errors
    /// Returns [`EngineError::CorruptWal`] on non-tail corruption, or
    /// [`EngineError::IoError`] on underlying I/O failure.
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let mut file = crate::fsutil::create_secure(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (committed, valid_len) = Self::scan(&bytes, page_size)?;
        if valid_len < bytes.len() as u64 {
            log::warn!(
                "discarding {} torn byte(s) at the tail of the write-ahead log",
                bytes.len() as u64 - valid_len
            );
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self { file, page_size, committed, open_txn: Vec::new() })
    }

    /// Parses well-formed transactions out of `bytes`, returning the
    /// accumulated committed frames (in commit order, later entries for the
    /// same page id superseding earlier ones) and the byte length through
    /// the end of the last well-formed transaction.
    fn scan(bytes: &[u8], page_size: usize) -> Result<(Vec<(u64, Vec<u8>)>, u64)> {
        let frame_len = FRAME_ID_LEN + page_size;
        let mut pos = 0usize;
        let mut valid_len = 0u64;
        let mut committed = Vec::new();
        let mut pending: Vec<(u64, Vec<u8>)> = Vec::new();

        loop {
            if pos + FRAME_ID_LEN > bytes.len() {
                break; // torn tail: not even a full page id present
            }
            let page_id = u64::from_le_bytes(bytes[pos..pos + FRAME_ID_LEN].try_into().unwrap());

            if page_id == COMMIT_SENTINEL {
                if pos + COMMIT_RECORD_LEN > bytes.len() {
                    break; // torn tail: incomplete commit record
                }
                let count = u32::from_le_bytes(
                    bytes[pos + FRAME_ID_LEN..pos + FRAME_ID_LEN + 4].try_into().unwrap(),
                ) as usize;
                let stored_crc = u32::from_le_bytes(
                    bytes[pos + FRAME_ID_LEN + 4..pos + COMMIT_RECORD_LEN].try_into().unwrap(),
                );

                let txn_start = pos - pending.len() * frame_len;
                let ok = count == pending.len() && {
                    let mut hasher = crc32fast::Hasher::new();
                    hasher.update(&bytes[txn_start..pos]);
                    hasher.finalize() == stored_crc
                };

                if !ok {
                    let remainder = bytes.len() - pos;
                    if remainder <= COMMIT_RECORD_LEN {
                        break; // torn/garbled tail
                    }
                    return Err(EngineError::CorruptWal(
                        "bad commit record followed by further data".into(),
                    ));
                }

                committed.extend(pending.drain(..));
                pos += COMMIT_RECORD_LEN;
                valid_len = pos as u64;
                continue;
            }

            if pos + frame_len > bytes.len() {
                break; // torn tail: incomplete page frame
            }
            let page_bytes = bytes[pos + FRAME_ID_LEN..pos + frame_len].to_vec();
            pending.push((page_id, page_bytes));
            pos += frame_len;
        }

        Ok((committed, valid_len))
    }

    /// Clears any staged-but-uncommitted frames, starting a fresh transaction.
    pub fn begin_transaction(&mut self) {
        self.open_txn.clear();
    }

    /// Stages a page image into the currently open transaction.
    pub fn stage(&mut self, page_id: u64, frame: Vec<u8>) {
        debug_assert_eq!(frame.len(), self.page_size);
        self.open_txn.push((page_id, frame));
    }

    /// Returns the most recent image of `page_id` visible to a reader: the
    /// open transaction first, then the committed set.
    #[must_use]
    pub fn read(&self, page_id: u64) -> Option<&[u8]> {
        self.open_txn
            .iter()
            .rev()
            .find(|(id, _)| *id == page_id)
            .or_else(|| self.committed.iter().rev().find(|(id, _)| *id == page_id))
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Discards the open transaction without writing anything.
    pub fn discard_open(&mut self) {
        self.open_txn.clear();
    }

    /// Writes the open transaction's frames and a checksummed commit record,
    /// fsyncs, then folds the frames into the committed set.
    ///
    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure.
    pub fn commit(&mut self) -> Result<()> {
        if self.open_txn.is_empty() {
            return Ok(());
        }

        let mut txn_bytes = Vec::with_capacity(self.open_txn.len() * (FRAME_ID_LEN + self.page_size));
        for (page_id, frame) in &self.open_txn {
            txn_bytes.extend_from_slice(&page_id.to_le_bytes());
            txn_bytes.extend_from_slice(frame);
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&txn_bytes);
        let crc = hasher.finalize();

        self.file.write_all(&txn_bytes)?;
        self.file.write_all(&COMMIT_SENTINEL.to_le_bytes())?;
        self.file.write_all(&(self.open_txn.len() as u32).to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.sync_data()?;

        self.committed.append(&mut self.open_txn);
        Ok(())
    }

    /// Returns every page touched since the last checkpoint, in commit order.
    #[must_use]
    pub fn committed_frames(&self) -> &[(u64, Vec<u8>)] {
        &self.committed
    }

    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Clears the committed set and truncates the WAL file to empty. Callers
    /// must have already durably applied `committed_frames()` to the main
    /// file before calling this.
    ///
    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure.
    pub fn reset_after_checkpoint(&mut self) -> Result<()> {
        self.committed.clear();
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn page(page_size: usize, fill: u8) -> Vec<u8> {
        vec![fill; page_size]
    }

    #[test]
    fn commit_then_read_back_from_memory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path, 16).unwrap();
        wal.begin_transaction();
        wal.stage(3, page(16, 7));
        wal.commit().unwrap();
        assert_eq!(wal.read(3), Some(page(16, 7).as_slice()));
    }

    #[test]
    fn reopen_replays_committed_transaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        {
            let mut wal = Wal::open(&path, 16).unwrap();
            wal.begin_transaction();
            wal.stage(1, page(16, 1));
            wal.stage(2, page(16, 2));
            wal.commit().unwrap();
        }
        let wal = Wal::open(&path, 16).unwrap();
        assert_eq!(wal.committed_len(), 2);
        assert_eq!(wal.read(1), Some(page(16, 1).as_slice()));
        assert_eq!(wal.read(2), Some(page(16, 2).as_slice()));
    }

    #[test]
    fn torn_tail_transaction_is_discarded_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        {
            let mut wal = Wal::open(&path, 16).unwrap();
            wal.begin_transaction();
            wal.stage(1, page(16, 1));
            wal.commit().unwrap();
            wal.begin_transaction();
            wal.stage(2, page(16, 2));
            // simulate a crash mid-commit: frames written, no commit record
            let mut txn_bytes = Vec::new();
            txn_bytes.extend_from_slice(&2u64.to_le_bytes());
            txn_bytes.extend_from_slice(&page(16, 2));
            wal.file.write_all(&txn_bytes).unwrap();
        }
        let wal = Wal::open(&path, 16).unwrap();
        assert_eq!(wal.committed_len(), 1);
        assert_eq!(wal.read(1), Some(page(16, 1).as_slice()));
        assert_eq!(wal.read(2), None);
    }

    #[test]
    fn discard_open_drops_uncommitted_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path, 16).unwrap();
        wal.begin_transaction();
        wal.stage(9, page(16, 9));
        wal.discard_open();
        assert_eq!(wal.read(9), None);
    }

    #[test]
    fn reset_after_checkpoint_empties_committed_set_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path, 16).unwrap();
        wal.begin_transaction();
        wal.stage(4, page(16, 4));
        wal.commit().unwrap();
        wal.reset_after_checkpoint().unwrap();
        assert_eq!(wal.committed_len(), 0);
        assert_eq!(wal.read(4), None);
    }
}
