//! Primary store for the advertisement cache
//!
//! The primary store holds the canonical persistent state of all cached
//! advertisements as an append-only record log plus an in-memory key map.
//!
//! # Design Principles
//!
//! - Append-only record file (no in-place updates)
//! - Checksum-verified on every read
//! - Latest record wins for the same key; deletes append tombstones
//! - The byte offset of the latest record for a key is its locator; the
//!   secondary index stores locators, never keys
//! - A truncated or corrupt tail found at open ends the startup scan at the
//!   last intact record
//!
//! Keys are composite path strings (`namespace/name`). Each record carries an
//! absolute lifetime and an expiration duration; the store persists both but
//! attaches no meaning to them.

mod checksum;
mod errors;
mod log;
mod record;
mod store;

pub use checksum::compute_checksum;
pub use errors::{StorageError, StorageResult};
pub use log::{RecordLog, SyncPolicy};
pub use record::{CacheRecord, LIFETIME_UNBOUNDED};
pub use store::{PrefixScan, RecordStore};

/// Physical position of a record in the log. Opaque outside the store.
pub type Locator = u64;
