//! Expiry classification and garbage collection sweeps
//!
//! A record is *locally expired* once its absolute lifetime has passed; it
//! is then invisible to every read path and reclaimable. Its *effective
//! expiration* is `min(time_until(lifetime), expiration)` and bounds how
//! long the payload may still be shared remotely. The two horizons are
//! deliberately distinct: a record can be unshareable (effective expiration
//! zero) yet still locally retained until its lifetime passes.
//!
//! Sweeps are best-effort, not transactional. They walk the registered
//! (namespace, attribute) chunks plus one final primary-store chunk for
//! unindexed records, taking and releasing the coarse lock per chunk so
//! callers are never blocked for a whole sweep. A fault in one chunk is
//! logged and the remaining chunks still run.

use std::sync::{Mutex, MutexGuard};

use crate::logger::Logger;
use crate::storage::CacheRecord;

use super::inner::CacheInner;

/// GC scheduling state, owned by the cache.
#[derive(Debug)]
pub(crate) struct GcState {
    /// Absolute instant (ms) after which the next tick must sweep
    pub next_deadline: u64,
    /// Expired records observed by non-purging reads since the last sweep
    pub pressure: u64,
}

impl GcState {
    pub fn new(now: u64, max_interval_ms: u64) -> Self {
        Self {
            next_deadline: now.saturating_add(max_interval_ms),
            pressure: 0,
        }
    }
}

/// Whether `record`'s local lifetime has passed.
pub(crate) fn is_expired(record: &CacheRecord, now: u64) -> bool {
    record.lifetime <= now
}

/// Remaining shareable freshness in ms: `min(time_until(lifetime), expiration)`.
pub(crate) fn effective_expiration(record: &CacheRecord, now: u64) -> u64 {
    record.lifetime.saturating_sub(now).min(record.expiration)
}

/// Whether the scheduled tick should run a full sweep now.
pub(crate) fn sweep_due(inner: &CacheInner, now: u64) -> bool {
    now >= inner.gc.next_deadline || inner.gc.pressure > inner.pressure_threshold
}

fn lock(inner: &Mutex<CacheInner>) -> MutexGuard<'_, CacheInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs one full sweep over every registered chunk plus the primary store.
///
/// Takes the lock per chunk, never for the whole sweep. Safe to call
/// concurrently with caller operations and after close (it backs off).
pub(crate) fn run_sweep(inner: &Mutex<CacheInner>) {
    let chunks = {
        let guard = lock(inner);
        if guard.store.is_closed() {
            return;
        }
        guard.index.registered_chunks()
    };

    let mut purged = 0usize;
    let mut failed_chunks = 0usize;

    for (namespace, attribute) in &chunks {
        let mut guard = lock(inner);
        if guard.store.is_closed() {
            return;
        }
        match guard.sweep_chunk(namespace, attribute) {
            Ok(n) => purged += n,
            Err(e) => {
                failed_chunks += 1;
                Logger::error(
                    "GC_CHUNK_FAILED",
                    &[
                        ("namespace", namespace.as_str()),
                        ("attribute", attribute.as_str()),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }
    }

    // Final chunk: records with no index entries are only reachable here
    {
        let mut guard = lock(inner);
        if guard.store.is_closed() {
            return;
        }
        match guard.sweep_primary() {
            Ok(n) => purged += n,
            Err(e) => {
                failed_chunks += 1;
                Logger::error("GC_PRIMARY_SWEEP_FAILED", &[("error", &e.to_string())]);
            }
        }

        let now = guard.clock.now_ms();
        guard.gc.pressure = 0;
        guard.gc.next_deadline = now.saturating_add(guard.gc_max_interval_ms);
    }

    Logger::info(
        "GC_SWEEP_COMPLETE",
        &[
            ("chunks", &chunks.len().to_string()),
            ("failed_chunks", &failed_chunks.to_string()),
            ("purged", &purged.to_string()),
        ],
    );
}
