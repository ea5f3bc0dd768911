//! In-process store used when Redis is disabled and in tests.

use super::{CacheStore, KeySample, MemoryInfo, StoreInspector, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rough per-entry bookkeeping cost added to key and value lengths.
const ENTRY_OVERHEAD: u64 = 64;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    inserted_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn size(&self, key: &str) -> u64 {
        (key.len() + self.value.len()) as u64 + ENTRY_OVERHEAD
    }
}

/// Bounded map with per-entry expiry.
///
/// Like Redis, expired entries linger until touched or purged, so
/// [`StoreInspector::key_count`] includes them.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    max_items: usize,
    peak_bytes: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new(max_items: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_items: max_items.max(1),
            peak_bytes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn used_bytes(entries: &HashMap<String, Entry>) -> u64 {
        entries.iter().map(|(k, e)| e.size(k)).sum()
    }

    /// Makes room for one new entry, dropping expired entries first and then
    /// the entry due to expire soonest (or the oldest without a TTL).
    fn make_room(entries: &mut HashMap<String, Entry>, max_items: usize, now: Instant) {
        if entries.len() < max_items {
            return;
        }

        entries.retain(|_, e| !e.is_expired(now));

        while entries.len() >= max_items {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| (e.expires_at.is_none(), e.expires_at, e.inserted_at))
                .map(|(k, _)| k.clone());

            match victim {
                Some(key) => {
                    debug!(key = %key, "Evicting entry to stay within capacity");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if !entries.contains_key(key) {
            Self::make_room(&mut entries, self.max_items, now);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
                inserted_at: now,
            },
        );

        self.peak_bytes
            .fetch_max(Self::used_bytes(&entries), Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .remove(key)
            .is_some_and(|e| !e.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired(now)))
    }

    async fn flush(&self) -> StoreResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[async_trait]
impl StoreInspector for MemoryStore {
    async fn memory_info(&self) -> StoreResult<MemoryInfo> {
        let used = Self::used_bytes(&self.entries.read());
        let peak = self.peak_bytes.load(Ordering::Relaxed).max(used);
        Ok(MemoryInfo::from_bytes(used, peak))
    }

    async fn key_count(&self) -> StoreResult<u64> {
        Ok(self.entries.read().len() as u64)
    }

    async fn sample_keys(&self, limit: usize) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut sample = KeySample::new(limit);
        for (key, _) in self.entries.read().iter().filter(|(_, e)| !e.is_expired(now)) {
            sample.offer(key.clone());
        }
        Ok(sample.into_keys())
    }

    async fn memory_usage(&self, key: &str) -> StoreResult<Option<u64>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.size(key)))
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new(10);
        store.set("a", "\"1\"", None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("\"1\""));
        assert!(store.exists("a").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let store = MemoryStore::new(10);
        store.set("a", "1", Some(Duration::from_secs(60))).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.exists("a").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("a").await.unwrap());
        assert_eq!(store.key_count().await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.key_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new(10);
        store.set("short", "1", Some(Duration::from_secs(1))).await.unwrap();
        store.set("long", "1", Some(Duration::from_secs(100))).await.unwrap();
        store.set("forever", "1", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.key_count().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_soonest_expiring() {
        let store = MemoryStore::new(2);
        store.set("forever", "1", None).await.unwrap();
        store.set("soon", "1", Some(Duration::from_secs(10))).await.unwrap();
        store.set("new", "1", Some(Duration::from_secs(100))).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(!store.exists("soon").await.unwrap());
        assert!(store.exists("forever").await.unwrap());
        assert!(store.exists("new").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let store = MemoryStore::new(1);
        store.set("a", "1", None).await.unwrap();
        store.set("a", "2", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_keys_is_bounded_and_live() {
        let store = MemoryStore::new(100);
        for i in 0..50 {
            store.set(&format!("k{i}"), "1", None).await.unwrap();
        }
        store.set("stale", "1", Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let sample = store.sample_keys(10).await.unwrap();
        assert_eq!(sample.len(), 10);
        assert!(!sample.iter().any(|k| k == "stale"));

        let all = store.sample_keys(1000).await.unwrap();
        assert_eq!(all.len(), 50);
    }

    #[tokio::test]
    async fn test_memory_accounting() {
        let store = MemoryStore::new(10);
        store.set("big", &"x".repeat(1000), None).await.unwrap();
        store.set("small", "x", None).await.unwrap();

        let big = store.memory_usage("big").await.unwrap().unwrap();
        let small = store.memory_usage("small").await.unwrap().unwrap();
        assert!(big > small);
        assert_eq!(store.memory_usage("missing").await.unwrap(), None);

        let info = store.memory_info().await.unwrap();
        assert_eq!(info.used_bytes, big + small);

        store.flush().await.unwrap();
        let info = store.memory_info().await.unwrap();
        assert_eq!(info.used_bytes, 0);
        assert_eq!(info.peak_bytes, big + small);
    }
}
