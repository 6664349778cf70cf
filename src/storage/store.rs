//! Keyed record store built on the append-only log
//!
//! Maintains the in-memory key map (`key -> locator`) over [`RecordLog`] and
//! rebuilds it by scanning the log at open. A torn tail left by a crash is
//! truncated at open; everything before it is preserved.
//!
//! The key map is ordered, so namespace listings and index rebuilds are
//! prefix scans over it rather than file scans.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::logger::Logger;

use super::errors::{StorageError, StorageResult};
use super::log::{RecordLog, SyncPolicy};
use super::record::CacheRecord;
use super::Locator;

/// Name of the record log file inside the cache directory.
const LOG_FILE: &str = "records.dat";

/// Durable ordered key -> record store.
pub struct RecordStore {
    /// Underlying append-only log
    log: RecordLog,
    /// key -> locator of the latest live record
    offsets: BTreeMap<String, Locator>,
    /// Set by `close()`; all later operations fail
    closed: bool,
}

impl RecordStore {
    /// Opens or creates the store under `<data_dir>/cache/`.
    ///
    /// Scans the log to rebuild the key map. Tombstones erase earlier
    /// records for their key; the latest record for a key wins.
    pub fn open(data_dir: &Path, sync_policy: SyncPolicy) -> StorageResult<Self> {
        let cache_dir = data_dir.join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                StorageError::io_error(
                    format!("failed to create cache directory: {}", cache_dir.display()),
                    e,
                )
            })?;
        }

        let mut log = RecordLog::open(&cache_dir.join(LOG_FILE), sync_policy)?;
        let mut offsets = BTreeMap::new();

        let mut offset = 0u64;
        while offset < log.end_offset() {
            match log.read_from(offset) {
                Ok(Some((record, next))) => {
                    if record.is_tombstone {
                        offsets.remove(&record.key);
                    } else {
                        offsets.insert(record.key, offset);
                    }
                    offset = next;
                }
                Ok(None) => break,
                Err(e) => {
                    // Torn tail from a crash mid-append. Keep everything
                    // before it and drop the rest.
                    Logger::warn(
                        "STORE_TAIL_TRUNCATED",
                        &[
                            ("offset", &offset.to_string()),
                            ("reason", e.message()),
                        ],
                    );
                    log.truncate_to(offset)?;
                    break;
                }
            }
        }

        Ok(Self {
            log,
            offsets,
            closed: false,
        })
    }

    fn ensure_open(&self, operation: &str) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::closed(operation));
        }
        Ok(())
    }

    /// Inserts or overwrites the record for `key` and returns its locator.
    ///
    /// Overwrites leave the previous record in the log; the key map makes the
    /// new one authoritative. Lifetime/expiration rules are the caller's.
    pub fn write(
        &mut self,
        key: &str,
        payload: Vec<u8>,
        lifetime: u64,
        expiration: u64,
    ) -> StorageResult<Locator> {
        self.ensure_open("write")?;

        let record = CacheRecord::new(key, payload, lifetime, expiration);
        let locator = self.log.append(&record)?;
        self.offsets.insert(key.to_string(), locator);
        Ok(locator)
    }

    /// Reads the latest live record for `key`.
    pub fn read(&mut self, key: &str) -> StorageResult<Option<CacheRecord>> {
        self.ensure_open("read")?;

        let Some(&locator) = self.offsets.get(key) else {
            return Ok(None);
        };
        self.log.read_at(locator)
    }

    /// Reads the record at `locator`.
    ///
    /// Tolerates stale locators: if the record there has been overwritten or
    /// deleted since the locator was handed out, returns `None` rather than
    /// resurrecting old data.
    pub fn read_at(&mut self, locator: Locator) -> StorageResult<Option<CacheRecord>> {
        self.ensure_open("read_at")?;

        let Some(record) = self.log.read_at(locator)? else {
            return Ok(None);
        };
        if record.is_tombstone || self.offsets.get(&record.key) != Some(&locator) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Deletes `key`, returning the previous record if there was one.
    ///
    /// Deleting an absent key is a no-op and appends nothing.
    pub fn delete(&mut self, key: &str) -> StorageResult<Option<CacheRecord>> {
        self.ensure_open("delete")?;

        let Some(&locator) = self.offsets.get(key) else {
            return Ok(None);
        };
        let previous = self.log.read_at(locator)?;

        self.log.append(&CacheRecord::tombstone(key))?;
        self.offsets.remove(key);
        Ok(previous)
    }

    /// Returns the locator of the latest live record for `key`.
    pub fn locator_of(&self, key: &str) -> Option<Locator> {
        self.offsets.get(key).copied()
    }

    /// Lazy scan of all live records whose key starts with `prefix`.
    ///
    /// Finite and restartable: each call captures the current key set and a
    /// fresh iteration starts from the beginning.
    pub fn scan_prefix(&mut self, prefix: &str) -> StorageResult<PrefixScan<'_>> {
        self.ensure_open("scan_prefix")?;

        let pending: Vec<(String, Locator)> = self
            .offsets
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, &locator)| (key.clone(), locator))
            .collect();

        Ok(PrefixScan {
            store: self,
            pending: pending.into_iter(),
        })
    }

    /// Number of live keys.
    pub fn record_count(&self) -> usize {
        self.offsets.len()
    }

    /// Flushes and marks the store closed. Later operations fail with
    /// `ADV_STORE_CLOSED`.
    pub fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.log.sync()?;
        self.closed = true;
        Ok(())
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Lazy iterator over the live records under a key prefix.
pub struct PrefixScan<'a> {
    store: &'a mut RecordStore,
    pending: std::vec::IntoIter<(String, Locator)>,
}

impl Iterator for PrefixScan<'_> {
    type Item = StorageResult<(CacheRecord, Locator)>;

    fn next(&mut self) -> Option<Self::Item> {
        for (_, locator) in self.pending.by_ref() {
            match self.store.log.read_at(locator) {
                Ok(Some(record)) if !record.is_tombstone => {
                    return Some(Ok((record, locator)));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
