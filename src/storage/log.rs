//! Append-only record log
//!
//! Single-file log holding serialized [`CacheRecord`]s back to back. Offsets
//! returned by [`RecordLog::append`] are the locators handed to the secondary
//! index. The log supports three access paths: append, random read at a known
//! offset, and sequential scan from an offset (used by startup recovery and
//! index rebuild).
//!
//! Writes are flushed synchronously by default; `SyncPolicy::OnClose` defers
//! the flush to `sync()`/close. That switch changes durability in a crash,
//! never the visible behavior of the cache.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};
use super::record::{CacheRecord, MIN_RECORD_SIZE};

/// When appended records are flushed to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync after every append
    #[default]
    Always,
    /// fsync only on explicit `sync()` and at close
    OnClose,
}

/// Append-only log of cache records.
pub struct RecordLog {
    /// Path to the log file
    path: PathBuf,
    /// Underlying file handle (read + append)
    file: File,
    /// Offset one past the last intact record
    end_offset: u64,
    /// Flush policy for appends
    sync_policy: SyncPolicy,
}

impl RecordLog {
    /// Opens or creates the log file at `path`.
    pub fn open(path: &Path, sync_policy: SyncPolicy) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                StorageError::io_error(format!("failed to open record log: {}", path.display()), e)
            })?;

        let end_offset = file
            .metadata()
            .map_err(|e| StorageError::io_error("failed to read log metadata", e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            end_offset,
            sync_policy,
        })
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the offset one past the last intact record.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Appends a record and returns its locator.
    ///
    /// A failed append can leave a fraction of the record on disk past
    /// `end_offset`. Those bytes are dropped, here and before the next
    /// append, so a locator handed out later never points into the residue
    /// and a reopen scan never mistakes it for a torn tail.
    pub fn append(&mut self, record: &CacheRecord) -> StorageResult<u64> {
        let physical = self
            .file
            .metadata()
            .map_err(|e| StorageError::io_error("failed to read log metadata", e))?
            .len();
        if physical != self.end_offset {
            self.truncate_to(self.end_offset)?;
        }

        let serialized = record.serialize();
        let offset = self.end_offset;

        if let Err(e) = self.file.write_all(&serialized) {
            let _ = self.file.set_len(self.end_offset);
            return Err(StorageError::write_failed(
                format!("failed to append record: {}", record.key),
                e,
            ));
        }

        if self.sync_policy == SyncPolicy::Always {
            if let Err(e) = self.file.sync_all() {
                let _ = self.file.set_len(self.end_offset);
                return Err(StorageError::write_failed(
                    format!("fsync failed after append: {}", record.key),
                    e,
                ));
            }
        }

        self.end_offset += serialized.len() as u64;
        Ok(offset)
    }

    /// Flushes all pending appends to disk.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::write_failed("fsync failed", e))
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns `Ok(None)` when the offset is at or past the end of the log.
    /// A checksum failure at a valid offset is a corruption error.
    pub fn read_at(&mut self, offset: u64) -> StorageResult<Option<CacheRecord>> {
        Ok(self.read_from(offset)?.map(|(record, _)| record))
    }

    /// Reads the record at `offset` and returns it with the offset of the
    /// following record. The sequential-scan primitive.
    pub fn read_from(&mut self, offset: u64) -> StorageResult<Option<(CacheRecord, u64)>> {
        if offset >= self.end_offset {
            return Ok(None);
        }

        let remaining = self.end_offset - offset;
        if remaining < MIN_RECORD_SIZE as u64 {
            return Err(StorageError::corruption_at_offset(
                offset,
                format!(
                    "truncated log: {} bytes remaining, minimum record size is {}",
                    remaining, MIN_RECORD_SIZE
                ),
            ));
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::read_failed(format!("failed to seek to {}", offset), e))?;

        let mut len_buf = [0u8; 4];
        self.file.read_exact(&mut len_buf).map_err(|e| {
            StorageError::corruption_at_offset(offset, format!("failed to read record length: {}", e))
        })?;
        let record_length = u32::from_le_bytes(len_buf) as u64;

        if record_length < MIN_RECORD_SIZE as u64 || record_length > remaining {
            return Err(StorageError::corruption_at_offset(
                offset,
                format!(
                    "invalid record length {} ({} bytes remain)",
                    record_length, remaining
                ),
            ));
        }

        let mut record_buf = vec![0u8; record_length as usize];
        record_buf[0..4].copy_from_slice(&len_buf);
        self.file.read_exact(&mut record_buf[4..]).map_err(|e| {
            StorageError::corruption_at_offset(offset, format!("failed to read record body: {}", e))
        })?;

        let (record, consumed) = CacheRecord::deserialize(&record_buf)
            .map_err(|e| StorageError::corruption_at_offset(offset, e.to_string()))?;

        Ok(Some((record, offset + consumed as u64)))
    }

    /// Discards everything at and after `offset`.
    ///
    /// Used at startup to drop a torn tail left by a crash mid-append.
    pub fn truncate_to(&mut self, offset: u64) -> StorageResult<()> {
        self.file
            .set_len(offset)
            .map_err(|e| StorageError::write_failed(format!("failed to truncate to {}", offset), e))?;
        self.end_offset = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str, payload: &[u8]) -> CacheRecord {
        CacheRecord::new(key, payload.to_vec(), 1_700_000_000_000, 30_000)
    }

    fn open_log(dir: &TempDir) -> RecordLog {
        RecordLog::open(&dir.path().join("records.dat"), SyncPolicy::Always).unwrap()
    }

    #[test]
    fn test_append_and_read_at() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);

        let off1 = log.append(&record("peers/a", b"first")).unwrap();
        let off2 = log.append(&record("peers/b", b"second")).unwrap();
        assert_eq!(off1, 0);
        assert!(off2 > off1);

        let rec = log.read_at(off2).unwrap().unwrap();
        assert_eq!(rec.key, "peers/b");
        assert_eq!(rec.payload, b"second");
    }

    #[test]
    fn test_read_past_end_is_absent() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);
        log.append(&record("peers/a", b"x")).unwrap();

        assert!(log.read_at(log.end_offset()).unwrap().is_none());
        assert!(log.read_at(log.end_offset() + 100).unwrap().is_none());
    }

    #[test]
    fn test_sequential_scan() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);
        log.append(&record("peers/a", b"1")).unwrap();
        log.append(&record("peers/b", b"2")).unwrap();
        log.append(&record("peers/c", b"3")).unwrap();

        let mut keys = Vec::new();
        let mut offset = 0;
        while let Some((rec, next)) = log.read_from(offset).unwrap() {
            keys.push(rec.key);
            offset = next;
        }
        assert_eq!(keys, vec!["peers/a", "peers/b", "peers/c"]);
    }

    #[test]
    fn test_reopen_preserves_end_offset() {
        let dir = TempDir::new().unwrap();
        let end;
        {
            let mut log = open_log(&dir);
            log.append(&record("peers/a", b"x")).unwrap();
            end = log.end_offset();
        }
        let log = open_log(&dir);
        assert_eq!(log.end_offset(), end);
    }

    #[test]
    fn test_corrupt_record_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.dat");
        let offset;
        {
            let mut log = RecordLog::open(&path, SyncPolicy::Always).unwrap();
            offset = log.append(&record("peers/a", b"payload bytes")).unwrap();
        }

        // Flip a byte in the middle of the record
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(12)).unwrap();
            file.write_all(&[0xFF]).unwrap();
        }

        let mut log = RecordLog::open(&path, SyncPolicy::Always).unwrap();
        let err = log.read_at(offset).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code().code(), "ADV_DATA_CORRUPTION");
    }

    #[test]
    fn test_truncate_to_drops_tail() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);
        log.append(&record("peers/a", b"1")).unwrap();
        let off2 = log.append(&record("peers/b", b"2")).unwrap();

        log.truncate_to(off2).unwrap();
        assert_eq!(log.end_offset(), off2);
        assert!(log.read_at(off2).unwrap().is_none());

        let rec = log.read_at(0).unwrap().unwrap();
        assert_eq!(rec.key, "peers/a");
    }

    #[test]
    fn test_append_realigns_after_partial_write_residue() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.dat");
        let mut log = RecordLog::open(&path, SyncPolicy::Always).unwrap();
        log.append(&record("peers/a", b"first")).unwrap();

        // Leftover bytes of a failed append: on disk past end_offset, with
        // the in-memory offset not advanced
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]).unwrap();
        }

        // The next append must not hand out a locator pointing at the residue
        let off = log.append(&record("peers/b", b"second")).unwrap();
        let rec = log.read_at(off).unwrap().unwrap();
        assert_eq!(rec.payload, b"second");

        // A reopen scan sees both records and no torn region
        let mut reopened = RecordLog::open(&path, SyncPolicy::Always).unwrap();
        let mut keys = Vec::new();
        let mut offset = 0;
        while let Some((rec, next)) = reopened.read_from(offset).unwrap() {
            keys.push(rec.key);
            offset = next;
        }
        assert_eq!(keys, vec!["peers/a", "peers/b"]);
    }

    #[test]
    fn test_deferred_sync_still_readable() {
        let dir = TempDir::new().unwrap();
        let mut log = RecordLog::open(&dir.path().join("records.dat"), SyncPolicy::OnClose).unwrap();
        let off = log.append(&record("peers/a", b"unflushed")).unwrap();
        let rec = log.read_at(off).unwrap().unwrap();
        assert_eq!(rec.payload, b"unflushed");
        log.sync().unwrap();
    }
}
