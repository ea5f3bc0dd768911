//! Remote store boundary.
//!
//! Store clients report every failure as a [`StoreFault`]. They never decide
//! whether a fault matters; [`crate::Cache`] and the health monitor do.

mod memory_store;
mod redis_store;
mod sample;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use sample::KeySample;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_resilience::TimedOut;
use thiserror::Error;

/// Transport or command failure at the store boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreFault {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreFault>;

impl From<redis::RedisError> for StoreFault {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreFault {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match &err {
            deadpool_redis::PoolError::Closed => Self::Unavailable(err.to_string()),
            deadpool_redis::PoolError::Timeout(_) => Self::Timeout(err.to_string()),
            _ => Self::Connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreFault {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<TimedOut> for StoreFault {
    fn from(err: TimedOut) -> Self {
        Self::Timeout(err.to_string())
    }
}

impl From<StoreFault> for strata_core::StrataError {
    fn from(err: StoreFault) -> Self {
        match err {
            StoreFault::Timeout(msg) => Self::Timeout(msg),
            other => Self::Cache(other.to_string()),
        }
    }
}

/// Key/value operations used by the cache engine.
///
/// Values are opaque JSON text.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value`; `None` keeps it until evicted or deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Removes every entry this client owns.
    async fn flush(&self) -> StoreResult<()>;
}

/// Memory figures reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub used_bytes: u64,
    pub used_human: String,
    pub peak_bytes: u64,
    pub peak_human: String,
}

impl MemoryInfo {
    /// Builds the figures from raw byte counts.
    pub fn from_bytes(used_bytes: u64, peak_bytes: u64) -> Self {
        Self {
            used_bytes,
            used_human: human_bytes(used_bytes),
            peak_bytes,
            peak_human: human_bytes(peak_bytes),
        }
    }
}

/// Introspection used by the health monitor.
///
/// Keys here are raw store keys, including any client prefix.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait StoreInspector: Send + Sync {
    async fn memory_info(&self) -> StoreResult<MemoryInfo>;

    async fn key_count(&self) -> StoreResult<u64>;

    /// Up to `limit` keys drawn uniformly while walking the keyspace once.
    async fn sample_keys(&self, limit: usize) -> StoreResult<Vec<String>>;

    /// Bytes attributed to `key`, `None` if it no longer exists.
    async fn memory_usage(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Forces expiry of keys whose TTL has elapsed; returns how many went away.
    async fn purge_expired(&self) -> StoreResult<u64>;
}

/// Formats a byte count the way Redis does in `INFO` (`912B`, `1.50M`).
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["K", "M", "G", "T", "P"];

    if bytes < 1024 {
        return format!("{bytes}B");
    }

    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.2}{unit}")
}
