//! Cache state guarded by the coarse lock
//!
//! `CacheInner` owns the primary store, the secondary index, the delta
//! tracker, and the GC schedule state. Every public cache operation runs
//! against it with the lock held, so each is its own atomic unit; there are
//! no cross-call transactions.

use std::sync::Arc;

use crate::delta::{DeltaEntry, DeltaTracker};
use crate::extract::IndexValueExtractor;
use crate::index::{AttributeIndex, ValuePattern};
use crate::logger::Logger;
use crate::storage::{RecordStore, StorageError};
use crate::time::Clock;

use super::gc::{effective_expiration, is_expired, GcState};
use super::{CacheResult, Hit};

/// Store + index + deltas + GC state, one lock domain.
pub(crate) struct CacheInner {
    pub(crate) store: RecordStore,
    pub(crate) index: AttributeIndex,
    pub(crate) deltas: DeltaTracker,
    pub(crate) extractor: Box<dyn IndexValueExtractor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) gc: GcState,
    pub(crate) gc_max_interval_ms: u64,
    pub(crate) pressure_threshold: u64,
}

/// Composite store key for an advertisement.
fn record_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Namespace part of a composite key.
fn namespace_of(key: &str) -> &str {
    key.split('/').next().unwrap_or(key)
}

impl CacheInner {
    fn ensure_open(&self, operation: &str) -> CacheResult<()> {
        if self.store.is_closed() {
            return Err(StorageError::closed(operation).into());
        }
        Ok(())
    }

    /// Inserts or overwrites one advertisement.
    ///
    /// Extraction runs before any mutation: a malformed payload fails the
    /// whole save and leaves neither an unindexed record nor a partial
    /// index entry behind.
    pub fn save(
        &mut self,
        namespace: &str,
        name: &str,
        payload: Vec<u8>,
        lifetime_ms: u64,
        expiration_ms: u64,
    ) -> CacheResult<()> {
        self.ensure_open("save")?;

        let attrs = self.extractor.extract(namespace, &payload)?;

        let key = record_key(namespace, name);
        let now = self.clock.now_ms();
        let old_locator = self.store.locator_of(&key);
        let prior = self.store.read(&key)?;

        // Lifetime never decreases across repeated writes of the same key
        let mut lifetime = now.saturating_add(lifetime_ms);
        if let Some(prior) = &prior {
            if !is_expired(prior, now) {
                lifetime = lifetime.max(prior.lifetime);
            }
        }

        // Shareable freshness can never outlive local retention
        let expiration = expiration_ms.min(lifetime.saturating_sub(now));

        let locator = self.store.write(&key, payload, lifetime, expiration)?;
        if let Some(old) = old_locator {
            self.index.purge_locator(old);
        }
        self.index.add(namespace, &attrs, locator);

        // Only shareable records are announced; expiration 0 means "local only"
        if expiration > 0 {
            self.deltas.record_change(namespace, &attrs, expiration);
        }

        Ok(())
    }

    /// Removes one advertisement. Returns whether it existed.
    pub fn remove(&mut self, namespace: &str, name: &str) -> CacheResult<bool> {
        self.ensure_open("remove")?;

        let key = record_key(namespace, name);
        let Some(locator) = self.store.locator_of(&key) else {
            return Ok(false);
        };
        let Some(previous) = self.store.delete(&key)? else {
            return Ok(false);
        };
        self.index.purge_locator(locator);

        // Announce the deletion with the attributes the record carried.
        // With tracking off nothing would be queued, so skip the extraction.
        if self.deltas.is_enabled() {
            match self.extractor.extract(namespace, &previous.payload) {
                Ok(attrs) => self.deltas.record_change(namespace, &attrs, 0),
                Err(e) => Logger::warn(
                    "REMOVE_DELTA_SKIPPED",
                    &[("key", key.as_str()), ("error", &e.to_string())],
                ),
            }
        }

        Ok(true)
    }

    /// Returns the payload for one advertisement, or `None` when absent or
    /// locally expired.
    pub fn restore(&mut self, namespace: &str, name: &str) -> CacheResult<Option<Vec<u8>>> {
        self.ensure_open("restore")?;

        let key = record_key(namespace, name);
        let Some(record) = self.store.read(&key)? else {
            return Ok(None);
        };
        if is_expired(&record, self.clock.now_ms()) {
            self.gc.pressure += 1;
            return Ok(None);
        }
        Ok(Some(record.payload))
    }

    /// Remaining local lifetime in ms, or -1 when absent.
    ///
    /// Purges the record as a side effect when it is found expired.
    pub fn get_lifetime(&mut self, namespace: &str, name: &str) -> CacheResult<i64> {
        self.ensure_open("get_lifetime")?;

        let key = record_key(namespace, name);
        let now = self.clock.now_ms();
        match self.store.read(&key)? {
            None => Ok(-1),
            Some(record) if is_expired(&record, now) => {
                self.purge_record(&key)?;
                Ok(-1)
            }
            Some(record) => Ok(clamp_ms(record.lifetime.saturating_sub(now))),
        }
    }

    /// Remaining shareable expiration in ms, or -1 when absent.
    ///
    /// Purges the record as a side effect when it is found expired.
    pub fn get_expiration(&mut self, namespace: &str, name: &str) -> CacheResult<i64> {
        self.ensure_open("get_expiration")?;

        let key = record_key(namespace, name);
        let now = self.clock.now_ms();
        match self.store.read(&key)? {
            None => Ok(-1),
            Some(record) if is_expired(&record, now) => {
                self.purge_record(&key)?;
                Ok(-1)
            }
            Some(record) => Ok(clamp_ms(effective_expiration(&record, now))),
        }
    }

    /// Lists live payloads in a namespace, up to `threshold`.
    ///
    /// Expired records encountered are purged when `purge` is set, otherwise
    /// they feed the GC pressure counter.
    pub fn get_records(
        &mut self,
        namespace: &str,
        threshold: usize,
        purge: bool,
    ) -> CacheResult<Vec<Hit>> {
        self.ensure_open("get_records")?;

        let now = self.clock.now_ms();
        let prefix = format!("{}/", namespace);
        let mut hits = Vec::new();
        let mut expired_keys = Vec::new();

        {
            let scan = self.store.scan_prefix(&prefix)?;
            for item in scan {
                let (record, _) = item?;
                if is_expired(&record, now) {
                    if purge {
                        expired_keys.push(record.key);
                    } else {
                        self.gc.pressure += 1;
                    }
                    continue;
                }
                if hits.len() >= threshold {
                    break;
                }
                let expiration = effective_expiration(&record, now);
                hits.push(Hit {
                    payload: record.payload,
                    expiration,
                });
            }
        }

        for key in expired_keys {
            self.purge_record(&key)?;
        }

        Ok(hits)
    }

    /// Queries the index and dereferences live records, stopping index
    /// production at `threshold`.
    pub fn search(
        &mut self,
        namespace: &str,
        attribute: &str,
        pattern: Option<&str>,
        threshold: usize,
    ) -> CacheResult<Vec<Hit>> {
        self.ensure_open("search")?;

        let pattern = ValuePattern::parse(pattern);
        let locators = self.index.query(namespace, attribute, &pattern, threshold);
        let now = self.clock.now_ms();

        let mut hits = Vec::new();
        for locator in locators {
            // A stale locator reads as absent; skip it
            let Some(record) = self.store.read_at(locator)? else {
                continue;
            };
            if is_expired(&record, now) {
                self.gc.pressure += 1;
                continue;
            }
            let expiration = effective_expiration(&record, now);
            hits.push(Hit {
                payload: record.payload,
                expiration,
            });
        }
        Ok(hits)
    }

    /// Full index listing for a namespace, as replication entries with live
    /// expirations. Optionally clears the pending delta queue afterwards.
    pub fn get_entries(&mut self, namespace: &str, clear_deltas: bool) -> CacheResult<Vec<DeltaEntry>> {
        self.ensure_open("get_entries")?;

        let now = self.clock.now_ms();
        let mut entries = Vec::new();
        for (attr, value, locator) in self.index.entry_list(namespace) {
            let Some(record) = self.store.read_at(locator)? else {
                continue;
            };
            if is_expired(&record, now) {
                self.gc.pressure += 1;
                continue;
            }
            let expiration = effective_expiration(&record, now);
            if expiration > 0 {
                entries.push(DeltaEntry::new(attr, value, expiration));
            }
        }

        if clear_deltas {
            self.deltas.clear(namespace);
        }
        Ok(entries)
    }

    /// Drains the pending delta queue for a namespace.
    pub fn get_deltas(&mut self, namespace: &str) -> CacheResult<Vec<DeltaEntry>> {
        self.ensure_open("get_deltas")?;
        Ok(self.deltas.drain(namespace))
    }

    /// Enables or disables delta tracking. Disabling drops pending queues.
    pub fn set_track_deltas(&mut self, enabled: bool) -> CacheResult<()> {
        self.ensure_open("set_track_deltas")?;
        self.deltas.set_enabled(enabled);
        Ok(())
    }

    /// Regenerates the whole secondary index from the primary store.
    ///
    /// Expired records found during the scan are deleted outright. A record
    /// whose attributes cannot be extracted is logged and skipped, never
    /// aborting the rebuild. Runs with the lock held for its full duration;
    /// intended for startup.
    pub fn rebuild_index(&mut self) -> CacheResult<()> {
        self.ensure_open("rebuild_index")?;

        self.index = AttributeIndex::new();
        let now = self.clock.now_ms();
        let mut expired_keys = Vec::new();
        let mut indexed = 0usize;
        let mut skipped = 0usize;

        {
            let scan = self.store.scan_prefix("")?;
            for item in scan {
                let (record, locator) = item?;
                if is_expired(&record, now) {
                    expired_keys.push(record.key);
                    continue;
                }
                let namespace = namespace_of(&record.key);
                match self.extractor.extract(namespace, &record.payload) {
                    Ok(attrs) => {
                        self.index.add(namespace, &attrs, locator);
                        indexed += 1;
                    }
                    Err(e) => {
                        skipped += 1;
                        Logger::warn(
                            "REBUILD_SKIP_MALFORMED",
                            &[("key", record.key.as_str()), ("error", &e.to_string())],
                        );
                    }
                }
            }
        }

        let purged = expired_keys.len();
        for key in expired_keys {
            self.store.delete(&key)?;
        }

        Logger::info(
            "INDEX_REBUILT",
            &[
                ("indexed", &indexed.to_string()),
                ("purged", &purged.to_string()),
                ("skipped", &skipped.to_string()),
            ],
        );
        Ok(())
    }

    /// Removes one record from the store and every index mapping to it.
    pub(crate) fn purge_record(&mut self, key: &str) -> CacheResult<bool> {
        let Some(locator) = self.store.locator_of(key) else {
            return Ok(false);
        };
        self.store.delete(key)?;
        self.index.purge_locator(locator);
        Ok(true)
    }

    /// Purges expired records reachable through one (namespace, attribute)
    /// index chunk. Returns how many were purged.
    pub(crate) fn sweep_chunk(&mut self, namespace: &str, attribute: &str) -> CacheResult<usize> {
        let locators = self.index.chunk_locators(namespace, attribute);
        let now = self.clock.now_ms();
        let mut purged = 0;
        for locator in locators {
            if let Some(record) = self.store.read_at(locator)? {
                if is_expired(&record, now) {
                    self.purge_record(&record.key)?;
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }

    /// Purges expired records by primary-store scan; reaches records that
    /// carry no index entries.
    pub(crate) fn sweep_primary(&mut self) -> CacheResult<usize> {
        let now = self.clock.now_ms();
        let mut expired_keys = Vec::new();
        {
            let scan = self.store.scan_prefix("")?;
            for item in scan {
                let (record, _) = item?;
                if is_expired(&record, now) {
                    expired_keys.push(record.key);
                }
            }
        }
        let purged = expired_keys.len();
        for key in expired_keys {
            self.purge_record(&key)?;
        }
        Ok(purged)
    }

    /// Flushes and closes the store.
    pub fn close(&mut self) -> CacheResult<()> {
        self.store.close()?;
        Ok(())
    }
}

/// Saturates a millisecond count into the non-negative `i64` range.
fn clamp_ms(ms: u64) -> i64 {
    ms.min(i64::MAX as u64) as i64
}
