//! Advertisement cache facade
//!
//! [`AdvertisementCache`] is the single entry point: a durable, indexed
//! store for peer-to-peer advertisements keyed by `namespace/name`. All
//! state lives behind one coarse mutex; every operation is its own atomic
//! unit and there are no cross-call transactions.
//!
//! Each record carries two horizons. The *lifetime* bounds how long this
//! node keeps the record at all; the *expiration duration* bounds how long
//! a copy handed to another peer may be considered fresh. Reads that report
//! an expiration always report `min(time_until(lifetime), expiration)`.
//!
//! Expired records are reclaimed by a background sweep driven by an
//! injected [`TaskScheduler`]: at every tick the sweep runs if the maximum
//! interval has elapsed or enough expired records have been observed by
//! read paths since the last sweep.

mod gc;
mod inner;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;

use crate::delta::{DeltaEntry, DeltaTracker};
use crate::extract::{ExtractError, IndexValueExtractor};
use crate::index::AttributeIndex;
use crate::sched::{ScheduledHandle, TaskScheduler};
use crate::storage::{RecordStore, StorageError, SyncPolicy, LIFETIME_UNBOUNDED};
use crate::time::{Clock, SystemClock};

use gc::GcState;
use inner::CacheInner;

/// How often the scheduler tick checks whether a sweep is due.
pub const DEFAULT_GC_TICK: Duration = Duration::from_secs(60);
/// Longest a full sweep may be deferred.
pub const DEFAULT_GC_MAX_INTERVAL_MS: u64 = 3_600_000;
/// Expired-record observations that force a sweep early.
pub const DEFAULT_PRESSURE_THRESHOLD: u64 = 1_000;

/// Cache-level error.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Primary store fault.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A payload could not be decoded into indexable attributes.
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// Internal invariant failure, such as a poisoned lock.
    #[error("internal cache error: {0}")]
    Internal(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// One live search or listing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// Advertisement payload bytes.
    pub payload: Vec<u8>,
    /// Remaining shareable freshness in ms at read time.
    pub expiration: u64,
}

/// Cache construction parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory the record log lives under.
    pub data_dir: PathBuf,
    /// Whether writes flush before returning.
    pub sync_policy: SyncPolicy,
    /// Scheduler tick interval.
    pub gc_tick: Duration,
    /// Longest a sweep may be deferred, in ms.
    pub gc_max_interval_ms: u64,
    /// Expired-record observations that force an early sweep.
    pub pressure_threshold: u64,
    /// Whether delta tracking starts enabled.
    pub track_deltas: bool,
}

impl CacheConfig {
    /// Defaults for everything but the data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            sync_policy: SyncPolicy::Always,
            gc_tick: DEFAULT_GC_TICK,
            gc_max_interval_ms: DEFAULT_GC_MAX_INTERVAL_MS,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            track_deltas: false,
        }
    }
}

/// Durable, indexed advertisement cache.
///
/// Cheap to share: clone the `Arc` it hands out via [`AdvertisementCache`]
/// methods taking `&self`. Dropping the cache without [`stop`] leaves the
/// log intact (every accepted write is already durable); the background
/// sweep task ends on its own once the state is gone.
///
/// [`stop`]: AdvertisementCache::stop
pub struct AdvertisementCache {
    inner: Arc<Mutex<CacheInner>>,
    gc_handle: Mutex<Option<Box<dyn ScheduledHandle>>>,
}

impl AdvertisementCache {
    /// Opens the cache under the system clock.
    pub fn open(
        config: CacheConfig,
        extractor: Box<dyn IndexValueExtractor>,
        scheduler: &dyn TaskScheduler,
    ) -> CacheResult<Self> {
        Self::open_with_clock(config, extractor, Arc::new(SystemClock), scheduler)
    }

    /// Opens the cache with an injected clock.
    ///
    /// Replays the record log, rebuilds the secondary index from it, and
    /// schedules the background sweep tick. Startup fails only on storage
    /// faults; malformed persisted payloads are logged and left unindexed.
    pub fn open_with_clock(
        config: CacheConfig,
        extractor: Box<dyn IndexValueExtractor>,
        clock: Arc<dyn Clock>,
        scheduler: &dyn TaskScheduler,
    ) -> CacheResult<Self> {
        let store = RecordStore::open(&config.data_dir, config.sync_policy)?;
        let now = clock.now_ms();

        let mut state = CacheInner {
            store,
            index: AttributeIndex::new(),
            deltas: DeltaTracker::new(config.track_deltas),
            extractor,
            clock: Arc::clone(&clock),
            gc: GcState::new(now, config.gc_max_interval_ms),
            gc_max_interval_ms: config.gc_max_interval_ms,
            pressure_threshold: config.pressure_threshold,
        };
        state.rebuild_index()?;

        let inner = Arc::new(Mutex::new(state));

        // The tick holds only a weak reference so a dropped cache does not
        // keep its state alive through the scheduler
        let weak: Weak<Mutex<CacheInner>> = Arc::downgrade(&inner);
        let tick_clock = Arc::clone(&clock);
        let handle = scheduler.schedule_repeating(
            Box::new(move || {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let due = {
                    let guard = state.lock().unwrap_or_else(|e| e.into_inner());
                    gc::sweep_due(&guard, tick_clock.now_ms())
                };
                if due {
                    gc::run_sweep(&state);
                }
            }),
            config.gc_tick,
            config.gc_tick,
        );

        Ok(Self {
            inner,
            gc_handle: Mutex::new(Some(handle)),
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, CacheInner>> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Internal("cache state lock poisoned".into()))
    }

    /// Stores an advertisement, overwriting any record with the same
    /// namespace and name.
    ///
    /// `lifetime_ms` is how long this node keeps the record; on overwrite
    /// the surviving lifetime is the longer of old and new. `expiration_ms`
    /// is how long a remote copy may be considered fresh and is capped to
    /// the remaining lifetime.
    pub fn save(
        &self,
        namespace: &str,
        name: &str,
        payload: Vec<u8>,
        lifetime_ms: u64,
        expiration_ms: u64,
    ) -> CacheResult<()> {
        self.lock()?
            .save(namespace, name, payload, lifetime_ms, expiration_ms)
    }

    /// Stores an advertisement with an unbounded local lifetime and no
    /// remote shareability.
    pub fn save_local(&self, namespace: &str, name: &str, payload: Vec<u8>) -> CacheResult<()> {
        self.save(namespace, name, payload, LIFETIME_UNBOUNDED, 0)
    }

    /// Removes an advertisement. Returns whether it existed. Removing an
    /// absent record is not an error.
    pub fn remove(&self, namespace: &str, name: &str) -> CacheResult<bool> {
        self.lock()?.remove(namespace, name)
    }

    /// Returns the payload, or `None` when the record is absent or its
    /// lifetime has passed.
    pub fn restore(&self, namespace: &str, name: &str) -> CacheResult<Option<Vec<u8>>> {
        self.lock()?.restore(namespace, name)
    }

    /// Remaining local lifetime in ms, or -1 when the record is absent.
    /// An expired record is purged and reported absent.
    pub fn get_lifetime(&self, namespace: &str, name: &str) -> CacheResult<i64> {
        self.lock()?.get_lifetime(namespace, name)
    }

    /// Remaining shareable expiration in ms, or -1 when the record is
    /// absent. An expired record is purged and reported absent.
    pub fn get_expiration(&self, namespace: &str, name: &str) -> CacheResult<i64> {
        self.lock()?.get_expiration(namespace, name)
    }

    /// Lists up to `threshold` live payloads in a namespace.
    ///
    /// With `purge` set, expired records encountered by the scan are
    /// deleted; otherwise they only raise GC pressure.
    pub fn get_records(
        &self,
        namespace: &str,
        threshold: usize,
        purge: bool,
    ) -> CacheResult<Vec<Hit>> {
        self.lock()?.get_records(namespace, threshold, purge)
    }

    /// Finds live records whose indexed `attribute` value matches `pattern`.
    ///
    /// `pattern` of `None`, the empty string, or `"*"` matches every value;
    /// otherwise a leading and/or trailing `*` makes it a suffix, prefix,
    /// or substring match. At most `threshold` index matches are considered.
    pub fn search(
        &self,
        namespace: &str,
        attribute: &str,
        pattern: Option<&str>,
        threshold: usize,
    ) -> CacheResult<Vec<Hit>> {
        self.lock()?.search(namespace, attribute, pattern, threshold)
    }

    /// Full index listing for a namespace as replication entries, carrying
    /// live expirations. With `clear_deltas` set the pending delta queue is
    /// dropped afterwards, making the listing a fresh baseline.
    pub fn get_entries(&self, namespace: &str, clear_deltas: bool) -> CacheResult<Vec<DeltaEntry>> {
        self.lock()?.get_entries(namespace, clear_deltas)
    }

    /// Atomically drains the pending delta queue for a namespace.
    pub fn get_deltas(&self, namespace: &str) -> CacheResult<Vec<DeltaEntry>> {
        self.lock()?.get_deltas(namespace)
    }

    /// Enables or disables delta tracking. Disabling drops pending queues.
    pub fn set_track_deltas(&self, enabled: bool) -> CacheResult<()> {
        self.lock()?.set_track_deltas(enabled)
    }

    /// Runs a full sweep immediately, regardless of deadline or pressure.
    pub fn garbage_collect(&self) -> CacheResult<()> {
        {
            let guard = self.lock()?;
            if guard.store.is_closed() {
                return Err(StorageError::closed("garbage_collect").into());
            }
        }
        gc::run_sweep(&self.inner);
        Ok(())
    }

    /// Regenerates the secondary index from the primary store.
    pub fn rebuild_index(&self) -> CacheResult<()> {
        self.lock()?.rebuild_index()
    }

    /// Number of live keys in the primary store, counting records whose
    /// lifetime has passed but that no sweep has reclaimed yet.
    #[cfg(test)]
    fn stored_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .store
            .record_count()
    }

    /// Cancels the background sweep, flushes, and closes the store.
    /// Idempotent; every later operation fails with a closed-store error.
    pub fn stop(&self) -> CacheResult<()> {
        let handle = self
            .gc_handle
            .lock()
            .map_err(|_| CacheError::Internal("gc handle lock poisoned".into()))?
            .take();
        if let Some(handle) = handle {
            handle.cancel();
        }

        let mut guard = self.lock()?;
        if guard.store.is_closed() {
            return Ok(());
        }
        guard.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::JsonFieldExtractor;
    use crate::sched::ManualScheduler;
    use crate::time::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        cache: AdvertisementCache,
        clock: Arc<ManualClock>,
        scheduler: ManualScheduler,
        dir: TempDir,
    }

    fn extractor() -> Box<JsonFieldExtractor> {
        Box::new(
            JsonFieldExtractor::new()
                .with_fields("peers", ["Name", "PID"])
                .with_fields("services", ["Name"]),
        )
    }

    fn open_fixture(configure: impl FnOnce(&mut CacheConfig)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = ManualScheduler::new();
        let mut config = CacheConfig::new(dir.path());
        config.track_deltas = true;
        configure(&mut config);
        let cache = AdvertisementCache::open_with_clock(
            config,
            extractor(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            &scheduler,
        )
        .unwrap();
        Fixture {
            cache,
            clock,
            scheduler,
            dir,
        }
    }

    fn fixture() -> Fixture {
        open_fixture(|_| {})
    }

    fn peer_payload(name: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({ "Name": name, "PID": format!("urn:{}", name) })).unwrap()
    }

    fn service_payload(name: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({ "Name": name })).unwrap()
    }

    #[test]
    fn test_save_restore_roundtrip() {
        let fx = fixture();
        let payload = peer_payload("alpha");
        fx.cache
            .save("peers", "a", payload.clone(), 10_000, 5_000)
            .unwrap();

        assert_eq!(fx.cache.restore("peers", "a").unwrap(), Some(payload));
        assert_eq!(fx.cache.restore("peers", "missing").unwrap(), None);
    }

    #[test]
    fn test_expiration_is_min_of_horizons() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 1_000, 500)
            .unwrap();

        // Far from the lifetime the expiration duration dominates
        assert_eq!(fx.cache.get_expiration("peers", "a").unwrap(), 500);
        assert_eq!(fx.cache.get_lifetime("peers", "a").unwrap(), 1_000);

        // 400ms later only 600ms of lifetime remain, still above 500
        fx.clock.advance(400);
        assert_eq!(fx.cache.get_expiration("peers", "a").unwrap(), 500);

        // 800ms in, the remaining lifetime caps the expiration
        fx.clock.advance(400);
        assert_eq!(fx.cache.get_expiration("peers", "a").unwrap(), 200);
    }

    #[test]
    fn test_expired_record_reads_absent_and_is_purged() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 1_000, 500)
            .unwrap();

        fx.clock.advance(1_000);
        assert_eq!(fx.cache.restore("peers", "a").unwrap(), None);
        assert_eq!(fx.cache.get_expiration("peers", "a").unwrap(), -1);
        assert_eq!(fx.cache.get_lifetime("peers", "a").unwrap(), -1);
        // The getter purged it; a search no longer sees it either
        assert!(fx
            .cache
            .search("peers", "Name", Some("alpha"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_overwrite_keeps_longer_lifetime() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 10_000, 2_000)
            .unwrap();
        // Re-save with a shorter lifetime; the original retention wins
        fx.cache
            .save("peers", "a", peer_payload("alpha2"), 1_000, 500)
            .unwrap();

        assert_eq!(fx.cache.get_lifetime("peers", "a").unwrap(), 10_000);
        // The payload is still replaced
        assert_eq!(
            fx.cache.restore("peers", "a").unwrap(),
            Some(peer_payload("alpha2"))
        );
    }

    #[test]
    fn test_expiration_capped_to_remaining_lifetime() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 1_000, 50_000)
            .unwrap();
        assert_eq!(fx.cache.get_expiration("peers", "a").unwrap(), 1_000);
    }

    #[test]
    fn test_search_patterns() {
        let fx = fixture();
        for name in ["alpha", "alphabet", "betaalpha"] {
            fx.cache
                .save("peers", name, peer_payload(name), 60_000, 30_000)
                .unwrap();
        }

        let exact = fx.cache.search("peers", "Name", Some("alpha"), 10).unwrap();
        assert_eq!(exact.len(), 1);

        let prefix = fx
            .cache
            .search("peers", "Name", Some("alpha*"), 10)
            .unwrap();
        assert_eq!(prefix.len(), 2);

        let suffix = fx
            .cache
            .search("peers", "Name", Some("*alpha"), 10)
            .unwrap();
        assert_eq!(suffix.len(), 2);

        let contains = fx
            .cache
            .search("peers", "Name", Some("*alpha*"), 10)
            .unwrap();
        assert_eq!(contains.len(), 3);

        let all = fx.cache.search("peers", "Name", None, 10).unwrap();
        assert_eq!(all.len(), 3);

        // Threshold bounds index matches
        let capped = fx.cache.search("peers", "Name", Some("*"), 2).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_search_misses() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();

        assert!(fx
            .cache
            .search("peers", "Name", Some("omega"), 10)
            .unwrap()
            .is_empty());
        assert!(fx
            .cache
            .search("groups", "Name", Some("alpha"), 10)
            .unwrap()
            .is_empty());
        assert!(fx
            .cache
            .search("peers", "Color", Some("alpha"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_get_records_lists_namespace() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();
        fx.cache
            .save("peers", "b", peer_payload("beta"), 60_000, 30_000)
            .unwrap();
        fx.cache
            .save("groups", "g", b"{}".to_vec(), 60_000, 30_000)
            .unwrap();

        let records = fx.cache.get_records("peers", 100, false).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|hit| hit.expiration == 30_000));

        let capped = fx.cache.get_records("peers", 1, false).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_remove_and_deletion_delta() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();
        fx.cache.get_deltas("peers").unwrap(); // discard the save deltas

        assert!(fx.cache.remove("peers", "a").unwrap());
        assert!(!fx.cache.remove("peers", "a").unwrap());
        assert_eq!(fx.cache.restore("peers", "a").unwrap(), None);

        let deltas = fx.cache.get_deltas("peers").unwrap();
        assert_eq!(deltas.len(), 2); // Name and PID
        assert!(deltas.iter().all(DeltaEntry::is_deletion));
    }

    #[test]
    fn test_deltas_drain_exactly_once() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();

        let first = fx.cache.get_deltas("peers").unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|d| d.expiration == 30_000));
        assert!(fx.cache.get_deltas("peers").unwrap().is_empty());
    }

    #[test]
    fn test_local_only_save_emits_no_delta() {
        let fx = fixture();
        fx.cache
            .save_local("peers", "a", peer_payload("alpha"))
            .unwrap();

        assert!(fx.cache.get_deltas("peers").unwrap().is_empty());
        // Still locally restorable, forever
        assert!(fx.cache.restore("peers", "a").unwrap().is_some());
        assert_eq!(fx.cache.get_expiration("peers", "a").unwrap(), 0);
    }

    #[test]
    fn test_get_entries_lists_index_and_can_reset_deltas() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();

        let entries = fx.cache.get_entries("peers", true).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.attr == "Name" && e.value == "alpha"));
        assert!(entries.iter().all(|e| e.expiration == 30_000));

        // clear_deltas dropped the pending queue from the save
        assert!(fx.cache.get_deltas("peers").unwrap().is_empty());
    }

    #[test]
    fn test_disabling_delta_tracking_drops_pending() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();
        fx.cache.set_track_deltas(false).unwrap();
        fx.cache.set_track_deltas(true).unwrap();
        assert!(fx.cache.get_deltas("peers").unwrap().is_empty());
    }

    #[test]
    fn test_explicit_garbage_collect_purges_expired() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 1_000, 500)
            .unwrap();
        fx.cache
            .save("peers", "b", peer_payload("beta"), 60_000, 30_000)
            .unwrap();
        // raw namespace has no extractor fields, so the record is unindexed
        // and only the primary-store chunk can reclaim it
        fx.cache
            .save("raw", "r", vec![1, 2, 3], 1_000, 0)
            .unwrap();

        fx.clock.advance(2_000);
        fx.cache.garbage_collect().unwrap();

        let records = fx.cache.get_records("peers", 100, false).unwrap();
        assert_eq!(records.len(), 1);
        assert!(fx.cache.get_records("raw", 100, false).unwrap().is_empty());
        assert_eq!(fx.cache.restore("raw", "r").unwrap(), None);
    }

    #[test]
    fn test_sweep_survives_a_damaged_chunk() {
        let fx = fixture();
        // peers/bad gets damaged on disk; services/old is reclaimable
        fx.cache
            .save("peers", "bad", peer_payload("bad"), 1_000, 500)
            .unwrap();
        fx.cache
            .save("services", "old", service_payload("old"), 1_000, 500)
            .unwrap();
        fx.cache
            .save("services", "new", service_payload("new"), 600_000, 30_000)
            .unwrap();

        // Flip a byte inside the first record, behind the cache's back
        let path = fx.dir.path().join("cache").join("records.dat");
        let mut contents = std::fs::read(&path).unwrap();
        contents[20] ^= 0xFF;
        std::fs::write(&path, contents).unwrap();

        fx.clock.advance(2_000);
        // The peers chunks fail on the damaged record; the sweep must still
        // reclaim the expired record in the services chunk and return
        fx.cache.garbage_collect().unwrap();

        // services/old purged, peers/bad and services/new left stored
        assert_eq!(fx.cache.stored_count(), 2);
        assert_eq!(
            fx.cache.restore("services", "new").unwrap(),
            Some(service_payload("new"))
        );
    }

    #[test]
    fn test_remove_skips_extraction_when_deltas_disabled() {
        use std::collections::BTreeMap;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingExtractor {
            calls: Arc<AtomicUsize>,
        }

        impl IndexValueExtractor for CountingExtractor {
            fn extract(
                &self,
                _namespace: &str,
                _payload: &[u8],
            ) -> Result<BTreeMap<String, String>, ExtractError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(BTreeMap::new())
            }
        }

        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = ManualScheduler::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = AdvertisementCache::open_with_clock(
            CacheConfig::new(dir.path()), // tracking off
            Box::new(CountingExtractor {
                calls: Arc::clone(&calls),
            }),
            Arc::clone(&clock) as Arc<dyn Clock>,
            &scheduler,
        )
        .unwrap();

        cache.save("peers", "a", vec![1, 2, 3], 60_000, 30_000).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // With tracking off there is no delta to build, so no extraction
        assert!(cache.remove("peers", "a").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scheduled_sweep_waits_for_deadline() {
        let fx = open_fixture(|config| {
            config.gc_max_interval_ms = 10_000;
        });
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 1_000, 500)
            .unwrap();
        fx.clock.advance(2_000);

        // Deadline not reached and no pressure: the tick must not sweep,
        // the expired record is hidden from reads but still stored
        fx.scheduler.tick();
        assert_eq!(fx.cache.search("peers", "Name", None, 10).unwrap().len(), 0);
        assert_eq!(fx.cache.stored_count(), 1);

        // Past the deadline the tick sweeps and the record is physically gone
        fx.clock.advance(10_000);
        fx.scheduler.tick();
        assert_eq!(fx.cache.stored_count(), 0);
    }

    #[test]
    fn test_pressure_triggers_early_sweep() {
        let fx = open_fixture(|config| {
            config.gc_max_interval_ms = 3_600_000;
            config.pressure_threshold = 3;
        });
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 1_000, 500)
            .unwrap();
        fx.clock.advance(2_000);

        // Each passive miss on the expired record raises pressure
        for _ in 0..4 {
            assert_eq!(fx.cache.restore("peers", "a").unwrap(), None);
        }
        fx.scheduler.tick();

        // Swept long before the deadline
        assert_eq!(fx.cache.stored_count(), 0);
    }

    #[test]
    fn test_stop_then_operations_fail() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();
        fx.cache.stop().unwrap();
        fx.cache.stop().unwrap(); // idempotent

        assert!(fx.cache.restore("peers", "a").is_err());
        assert!(fx
            .cache
            .save("peers", "b", peer_payload("beta"), 1_000, 500)
            .is_err());
        assert!(fx.cache.garbage_collect().is_err());
    }

    #[test]
    fn test_reopen_restores_records_and_index() {
        let fx = fixture();
        fx.cache
            .save("peers", "a", peer_payload("alpha"), 60_000, 30_000)
            .unwrap();
        fx.cache
            .save("peers", "gone", peer_payload("gone"), 1_000, 500)
            .unwrap();
        fx.cache.stop().unwrap();

        fx.clock.advance(5_000);
        let scheduler = ManualScheduler::new();
        let mut config = CacheConfig::new(fx.dir.path());
        config.track_deltas = true;
        let reopened = AdvertisementCache::open_with_clock(
            config,
            extractor(),
            Arc::clone(&fx.clock) as Arc<dyn Clock>,
            &scheduler,
        )
        .unwrap();

        // Survivor is back, searchable through the rebuilt index
        assert_eq!(
            reopened.restore("peers", "a").unwrap(),
            Some(peer_payload("alpha"))
        );
        assert_eq!(
            reopened.search("peers", "Name", Some("alpha"), 10).unwrap().len(),
            1
        );
        // The record that expired while closed was dropped at startup
        assert_eq!(reopened.get_lifetime("peers", "gone").unwrap(), -1);

        // Deltas are memory-only and did not survive the restart
        assert!(reopened.get_deltas("peers").unwrap().is_empty());
        reopened.stop().unwrap();
    }

    #[test]
    fn test_stop_cancels_scheduled_task() {
        let fx = fixture();
        assert_eq!(fx.scheduler.task_count(), 1);
        fx.cache.stop().unwrap();
        assert_eq!(fx.scheduler.task_count(), 0);
        // A stray tick after stop is harmless
        fx.scheduler.tick();
    }
}
