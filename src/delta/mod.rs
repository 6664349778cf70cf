//! Delta tracking for the replication protocol
//!
//! Every save and remove may enqueue per-attribute change entries that the
//! replication layer drains and pushes to other peers. A drain atomically
//! empties the namespace queue: between two drains in one process run no
//! entry is duplicated or silently dropped. Deltas are memory-only; a
//! restart loses whatever was pending.
//!
//! An entry's expiration is captured at the moment of the change and is
//! independent of the originating record's later expiry.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One pending change, per attribute.
///
/// `expiration` is the remaining shareable freshness in milliseconds at the
/// time of the change; `0` signals a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Attribute name
    pub attr: String,
    /// Attribute value
    pub value: String,
    /// Remaining shareable freshness in ms; 0 means deleted
    pub expiration: u64,
}

impl DeltaEntry {
    /// Creates an entry.
    pub fn new(attr: impl Into<String>, value: impl Into<String>, expiration: u64) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
            expiration,
        }
    }

    /// Whether this entry announces a deletion.
    pub fn is_deletion(&self) -> bool {
        self.expiration == 0
    }
}

/// Per-namespace pending change queues.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    /// Whether changes are recorded at all
    enabled: bool,
    /// namespace -> pending entries, in arrival order
    queues: HashMap<String, Vec<DeltaEntry>>,
}

impl DeltaTracker {
    /// Creates a tracker.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            queues: HashMap::new(),
        }
    }

    /// Whether tracking is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables tracking. Disabling drops all pending queues
    /// immediately; the entries are lost, not flushed.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.queues.clear();
        }
    }

    /// Appends one entry per attribute pair, if tracking is on.
    pub fn record_change(
        &mut self,
        namespace: &str,
        attrs: &BTreeMap<String, String>,
        expiration: u64,
    ) {
        if !self.enabled || attrs.is_empty() {
            return;
        }
        let queue = self.queues.entry(namespace.to_string()).or_default();
        for (attr, value) in attrs {
            queue.push(DeltaEntry::new(attr, value, expiration));
        }
    }

    /// Atomically empties and returns the pending queue for `namespace`.
    pub fn drain(&mut self, namespace: &str) -> Vec<DeltaEntry> {
        self.queues.remove(namespace).unwrap_or_default()
    }

    /// Drops the pending queue for `namespace` without returning it.
    pub fn clear(&mut self, namespace: &str) {
        self.queues.remove(namespace);
    }

    /// Number of entries pending for `namespace`.
    pub fn pending(&self, namespace: &str) -> usize {
        self.queues.get(namespace).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_drain_returns_all_then_empty() {
        let mut tracker = DeltaTracker::new(true);
        tracker.record_change("peers", &attrs(&[("Name", "a")]), 1_000);
        tracker.record_change("peers", &attrs(&[("Name", "b"), ("PID", "p2")]), 2_000);

        let drained = tracker.drain("peers");
        assert_eq!(drained.len(), 3);
        assert!(tracker.drain("peers").is_empty());
    }

    #[test]
    fn test_namespaces_are_independent() {
        let mut tracker = DeltaTracker::new(true);
        tracker.record_change("peers", &attrs(&[("Name", "a")]), 1_000);
        tracker.record_change("groups", &attrs(&[("Name", "g")]), 1_000);

        assert_eq!(tracker.drain("peers").len(), 1);
        assert_eq!(tracker.pending("groups"), 1);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut tracker = DeltaTracker::new(false);
        tracker.record_change("peers", &attrs(&[("Name", "a")]), 1_000);
        assert!(tracker.drain("peers").is_empty());
    }

    #[test]
    fn test_disabling_drops_pending() {
        let mut tracker = DeltaTracker::new(true);
        tracker.record_change("peers", &attrs(&[("Name", "a")]), 1_000);
        tracker.set_enabled(false);
        tracker.set_enabled(true);
        assert!(tracker.drain("peers").is_empty());
    }

    #[test]
    fn test_deletion_entries() {
        let mut tracker = DeltaTracker::new(true);
        tracker.record_change("peers", &attrs(&[("Name", "a")]), 0);

        let drained = tracker.drain("peers");
        assert_eq!(drained.len(), 1);
        assert!(drained[0].is_deletion());
    }

    #[test]
    fn test_clear_drops_without_returning() {
        let mut tracker = DeltaTracker::new(true);
        tracker.record_change("peers", &attrs(&[("Name", "a")]), 1_000);
        tracker.clear("peers");
        assert_eq!(tracker.pending("peers"), 0);
    }

    #[test]
    fn test_arrival_order_preserved() {
        let mut tracker = DeltaTracker::new(true);
        tracker.record_change("peers", &attrs(&[("Name", "first")]), 10);
        tracker.record_change("peers", &attrs(&[("Name", "second")]), 20);

        let drained = tracker.drain("peers");
        assert_eq!(drained[0].value, "first");
        assert_eq!(drained[1].value, "second");
    }
}
