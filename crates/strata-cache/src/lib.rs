//! # Strata Cache
//!
//! Application-level cache-aside layer in front of a remote key-value store.
//!
//! - [`KeyBuilder`] builds deterministic, colon-separated cache keys
//! - [`MetricsRecorder`] counts hits, misses, errors and hit latency
//! - [`TagIndex`] maps tags to the keys stored under them
//! - [`Cache`] is the fail-open engine: store faults degrade to a miss or a no-op
//!
//! The store boundary ([`CacheStore`], [`StoreInspector`]) returns
//! `Result<_, StoreFault>`; the suppression policy lives in [`Cache`] and is
//! visible there rather than hidden in the client.

mod cache;
pub mod key;
pub mod metrics;
pub mod store;
mod tags;

pub use cache::{Cache, CacheOptions, CachedFn, KeyArgs, VersionedEntry};
pub use key::{KeyBuilder, KeyPart, SortSpec};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use store::{
    CacheStore, KeySample, MemoryInfo, MemoryStore, RedisStore, StoreFault, StoreInspector,
    StoreResult,
};
pub use tags::TagIndex;

#[cfg(any(test, feature = "mocks"))]
pub use store::{MockCacheStore, MockStoreInspector};
