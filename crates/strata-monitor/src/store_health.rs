//! Scheduled store memory check.

use crate::alerts::{Alert, AlertDispatcher};
use crate::memory::{parse_memory_string, HealthStatus, MemoryPressure, MemoryStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_cache::{StoreInspector, StoreResult};
use tracing::{error, info, warn};

/// Keys sampled by default when looking for the largest entries.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// Keys listed when memory pressure turns critical.
const CRITICAL_TOP_KEYS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct KeyMemory {
    pub key: String,
    /// Bytes reported by the store.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub stats: MemoryStats,
}

/// Tracks store memory against the configured ceiling.
pub struct StoreHealthMonitor {
    inspector: Arc<dyn StoreInspector>,
    max_memory_bytes: u64,
    sample_size: usize,
    dispatcher: AlertDispatcher,
}

impl StoreHealthMonitor {
    /// `max_memory` is a string such as `"256mb"`; unparseable values fall
    /// back to 256 MiB.
    pub fn new(inspector: Arc<dyn StoreInspector>, max_memory: &str) -> Self {
        Self {
            inspector,
            max_memory_bytes: parse_memory_string(max_memory),
            sample_size: DEFAULT_SAMPLE_SIZE,
            dispatcher: AlertDispatcher::new(),
        }
    }

    #[must_use]
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    pub async fn get_memory_stats(&self) -> StoreResult<MemoryStats> {
        let (memory, total_keys) =
            tokio::try_join!(self.inspector.memory_info(), self.inspector.key_count())?;

        Ok(MemoryStats::new(
            memory.used_human,
            memory.peak_human,
            memory.used_bytes,
            total_keys,
            self.max_memory_bytes,
        ))
    }

    /// One check cycle: classify pressure and remediate.
    ///
    /// A fault fetching the stats is returned to the caller (the scheduler
    /// logs it); remediation faults are logged here.
    pub async fn check_memory_usage(&self) -> StoreResult<MemoryPressure> {
        let stats = self.get_memory_stats().await?;

        info!(
            used = %stats.used_memory,
            peak = %stats.used_memory_peak,
            keys = stats.total_keys,
            usage_pct = format!("{:.1}", stats.memory_usage_percentage),
            "Store memory stats"
        );

        let pressure = stats.pressure();
        match pressure {
            MemoryPressure::Critical => {
                error!("Store memory usage CRITICAL (>90%)");
                self.handle_critical(&stats).await;
            }
            MemoryPressure::High => {
                warn!("Store memory usage HIGH (>80%)");
                self.clean_expired_keys().await;
                warn!("Consider increasing Redis memory limit or reviewing cache strategy");
            }
            MemoryPressure::Elevated => warn!("Store memory usage elevated (>70%)"),
            MemoryPressure::Normal => {}
        }

        Ok(pressure)
    }

    async fn handle_critical(&self, stats: &MemoryStats) {
        match self.get_top_keys_by_memory(CRITICAL_TOP_KEYS).await {
            Ok(top) => error!(top_keys = ?top, "Top memory consumers"),
            Err(e) => warn!(error = %e, "Could not sample top memory consumers"),
        }

        self.clean_expired_keys().await;

        let alert = Alert::critical(format!(
            "Redis memory usage critical: {:.1}%",
            stats.memory_usage_percentage
        ))
        .with_detail("usedMemory", &stats.used_memory)
        .with_detail("usedMemoryPeak", &stats.used_memory_peak)
        .with_detail("totalKeys", stats.total_keys);
        self.dispatcher.dispatch(&alert).await;
    }

    /// Largest keys among a random sample of the keyspace.
    ///
    /// Keys that vanish or fail to report their size are skipped.
    pub async fn get_top_keys_by_memory(&self, limit: usize) -> StoreResult<Vec<KeyMemory>> {
        let sample = self.inspector.sample_keys(self.sample_size).await?;

        let mut sized = Vec::with_capacity(sample.len());
        for key in sample {
            match self.inspector.memory_usage(&key).await {
                Ok(Some(size)) => sized.push(KeyMemory { key, size }),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "MEMORY USAGE failed"),
            }
        }

        sized.sort_by(|a, b| b.size.cmp(&a.size));
        sized.truncate(limit);
        Ok(sized)
    }

    /// Forces expiry of elapsed keys. Faults are logged and reported as 0.
    pub async fn clean_expired_keys(&self) -> u64 {
        match self.inspector.purge_expired().await {
            Ok(cleaned) => {
                if cleaned > 0 {
                    info!(cleaned, "Cleaned expired keys");
                }
                cleaned
            }
            Err(e) => {
                warn!(error = %e, "Expired key cleanup failed");
                0
            }
        }
    }

    /// Best-effort status; a failed check reports zeroed stats as unhealthy.
    pub async fn get_health_status(&self) -> StoreHealth {
        match self.get_memory_stats().await {
            Ok(stats) => StoreHealth {
                status: HealthStatus::from_usage(stats.memory_usage_percentage),
                stats,
            },
            Err(e) => {
                error!(error = %e, "Store health check failed");
                StoreHealth {
                    status: HealthStatus::Unhealthy,
                    stats: MemoryStats::unavailable(),
                }
            }
        }
    }
}
