//! adcache: persistent, indexed advertisement cache for peer-to-peer
//! discovery.
//!
//! Advertisements are opaque payloads keyed by `namespace/name`, held in an
//! append-only checksummed record log with an in-memory attribute index on
//! top. Every record carries a local retention lifetime and a remote
//! shareability expiration; a background sweep reclaims records whose
//! lifetime has passed.
//!
//! Start with [`cache::AdvertisementCache`].

pub mod cache;
pub mod delta;
pub mod extract;
pub mod index;
pub mod logger;
pub mod sched;
pub mod storage;
pub mod time;

pub use cache::{AdvertisementCache, CacheConfig, CacheError, CacheResult, Hit};
pub use delta::DeltaEntry;
pub use extract::{ExtractError, IndexValueExtractor, JsonFieldExtractor};
pub use sched::{ManualScheduler, ScheduledHandle, TaskScheduler, ThreadScheduler};
pub use storage::{SyncPolicy, LIFETIME_UNBOUNDED};
pub use time::{Clock, ManualClock, SystemClock};
