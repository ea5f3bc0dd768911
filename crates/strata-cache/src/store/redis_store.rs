//! Redis-backed store.

use super::{CacheStore, KeySample, MemoryInfo, StoreFault, StoreInspector, StoreResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use strata_config::RedisConfig;
use strata_resilience::{with_timeout, RetryPolicy};
use tracing::debug;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;

/// Redis store over a `deadpool-redis` pool.
///
/// Every command runs under the configured per-operation timeout. Keyspace
/// sweeps hold one connection and apply the timeout to each round trip, so
/// their total duration grows with the store. Acquiring a connection is
/// retried according to the store retry policy.
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
    op_timeout: Duration,
    retry: RetryPolicy,
}

impl RedisStore {
    /// Create a store from an existing pool.
    #[must_use]
    pub fn new(pool: Pool, key_prefix: impl Into<String>, op_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
            op_timeout,
            retry,
        }
    }

    /// Build the pool from configuration.
    ///
    /// No connection is opened here; the first command connects lazily.
    pub fn from_config(config: &RedisConfig) -> StoreResult<Self> {
        let mut pool_config = Config::from_url(config.url());
        pool_config.pool = Some(PoolConfig::new(config.pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreFault::Connection(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self::new(
            pool,
            config.key_prefix.clone(),
            config.op_timeout(),
            RetryPolicy::from(&config.retry),
        ))
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> StoreResult<Connection> {
        self.retry
            .execute(|| async { self.pool.get().await.map_err(StoreFault::from) })
            .await
    }

    /// Runs `op` on a pooled connection under the operation timeout.
    async fn run<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        with_timeout(self.op_timeout, async {
            let conn = self.connection().await?;
            op(conn).await
        })
        .await
    }

    /// Connection held across the round trips of a sweep.
    async fn sweep_connection(&self) -> StoreResult<Connection> {
        with_timeout(self.op_timeout, self.connection()).await
    }

    /// One round trip of a sweep under the operation timeout.
    async fn step<T, Fut>(&self, fut: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        with_timeout(self.op_timeout, async { fut.await.map_err(StoreFault::from) }).await
    }

    /// One `SCAN` page: the next cursor and the keys matching `pattern`.
    async fn scan_page(
        &self,
        conn: &mut Connection,
        cursor: u64,
        pattern: &str,
    ) -> StoreResult<(u64, Vec<String>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH);
        self.step(cmd.query_async(conn)).await
    }
}

/// Extracts the memory figures from an `INFO memory` reply.
fn parse_memory_info(info: &str) -> MemoryInfo {
    let field = |name: &str| {
        info.lines()
            .find_map(|line| line.trim().strip_prefix(name)?.strip_prefix(':'))
            .map(str::to_string)
    };
    let bytes = |name: &str| field(name).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);

    let used_bytes = bytes("used_memory");
    let peak_bytes = bytes("used_memory_peak");
    let mut info = MemoryInfo::from_bytes(used_bytes, peak_bytes);
    if let Some(human) = field("used_memory_human") {
        info.used_human = human;
    }
    if let Some(human) = field("used_memory_peak_human") {
        info.peak_human = human;
    }
    info
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = self.prefixed(key);
        self.run(|mut conn| async move {
            let value: Option<String> = conn.get(&key).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let key = self.prefixed(key);
        let value = value.to_string();
        self.run(|mut conn| async move {
            match ttl {
                Some(ttl) => {
                    let secs = ttl.as_secs().max(1);
                    let _: () = conn.set_ex(&key, value, secs).await?;
                }
                None => {
                    let _: () = conn.set(&key, value).await?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = self.prefixed(key);
        self.run(|mut conn| async move {
            let deleted: i64 = conn.del(&key).await?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = self.prefixed(key);
        self.run(|mut conn| async move {
            let exists: bool = conn.exists(&key).await?;
            Ok(exists)
        })
        .await
    }

    async fn flush(&self) -> StoreResult<()> {
        let mut conn = self.sweep_connection().await?;
        if self.key_prefix.is_empty() {
            let _: () = self.step(redis::cmd("FLUSHDB").query_async(&mut conn)).await?;
            return Ok(());
        }

        let pattern = format!("{}*", self.key_prefix);
        let mut cursor = 0;
        let mut removed: i64 = 0;
        loop {
            let (next, batch) = self.scan_page(&mut conn, cursor, &pattern).await?;
            if !batch.is_empty() {
                let deleted: i64 = self.step(conn.del(&batch)).await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %self.key_prefix, count = removed, "Flushed prefixed keys");
        Ok(())
    }
}

#[async_trait]
impl StoreInspector for RedisStore {
    async fn memory_info(&self) -> StoreResult<MemoryInfo> {
        self.run(|mut conn| async move {
            let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
            Ok(parse_memory_info(&info))
        })
        .await
    }

    async fn key_count(&self) -> StoreResult<u64> {
        self.run(|mut conn| async move {
            let count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
            Ok(count)
        })
        .await
    }

    async fn sample_keys(&self, limit: usize) -> StoreResult<Vec<String>> {
        let mut conn = self.sweep_connection().await?;
        let mut sample = KeySample::new(limit);
        let mut cursor = 0;
        loop {
            let (next, batch) = self.scan_page(&mut conn, cursor, "*").await?;
            for key in batch {
                sample.offer(key);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(seen = sample.seen(), limit, "Sampled keyspace");
        Ok(sample.into_keys())
    }

    async fn memory_usage(&self, key: &str) -> StoreResult<Option<u64>> {
        let key = key.to_string();
        self.run(|mut conn| async move {
            let usage: Option<u64> = redis::cmd("MEMORY")
                .arg("USAGE")
                .arg(&key)
                .query_async(&mut conn)
                .await?;
            Ok(usage)
        })
        .await
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let mut conn = self.sweep_connection().await?;
        let before: u64 = self.step(redis::cmd("DBSIZE").query_async(&mut conn)).await?;

        // Touching a key makes Redis drop it if its TTL has elapsed.
        let mut cursor = 0;
        loop {
            let (next, batch) = self.scan_page(&mut conn, cursor, "*").await?;
            if !batch.is_empty() {
                let _: i64 = self.step(conn.exists(&batch)).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let after: u64 = self.step(redis::cmd("DBSIZE").query_async(&mut conn)).await?;
        Ok(before.saturating_sub(after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_MEMORY: &str = "# Memory\r\nused_memory:241172480\r\nused_memory_human:230.00M\r\nused_memory_rss:250000000\r\nused_memory_peak:262144000\r\nused_memory_peak_human:250.00M\r\nused_memory_peak_perc:92.00%\r\n";

    #[test]
    fn test_parse_memory_info() {
        let info = parse_memory_info(INFO_MEMORY);
        assert_eq!(info.used_bytes, 241_172_480);
        assert_eq!(info.used_human, "230.00M");
        assert_eq!(info.peak_bytes, 262_144_000);
        assert_eq!(info.peak_human, "250.00M");
    }

    #[test]
    fn test_parse_memory_info_missing_fields() {
        let info = parse_memory_info("# Memory\r\n");
        assert_eq!(info.used_bytes, 0);
        assert_eq!(info.used_human, "0B");
    }

    #[tokio::test]
    async fn test_from_config_builds_lazily() {
        let config = RedisConfig {
            key_prefix: "app:".to_string(),
            ..Default::default()
        };
        let store = RedisStore::from_config(&config).unwrap();
        assert_eq!(store.prefixed("users:1"), "app:users:1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_round_trips_are_timed_individually() {
        let mut store = RedisStore::from_config(&RedisConfig::default()).unwrap();
        store.op_timeout = Duration::from_secs(2);

        let started = tokio::time::Instant::now();
        let mut pages = 0;
        for _ in 0..5 {
            pages += store
                .step(async {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    Ok::<_, redis::RedisError>(1)
                })
                .await
                .unwrap();
        }
        assert_eq!(pages, 5);
        assert!(started.elapsed() > store.op_timeout);

        let stalled = store
            .step(async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<_, redis::RedisError>(1)
            })
            .await;
        assert!(matches!(stalled, Err(StoreFault::Timeout(_))));
    }
}
