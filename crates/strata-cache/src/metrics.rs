//! Cache usage counters.
//!
//! [`MetricsRecorder`] keeps process-local counters that back the
//! `/health/cache/metrics` snapshot. Every recording is mirrored to the
//! `metrics` facade so an installed exporter sees the same numbers.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metric names for the cache layer.
pub mod names {
    /// Total cache hits.
    pub const CACHE_HITS_TOTAL: &str = "strata_cache_hits_total";
    /// Total cache misses.
    pub const CACHE_MISSES_TOTAL: &str = "strata_cache_misses_total";
    /// Total store faults absorbed by the cache.
    pub const CACHE_ERRORS_TOTAL: &str = "strata_cache_errors_total";
    /// Latency of lookups that hit, in seconds.
    pub const CACHE_HIT_LATENCY_SECONDS: &str = "strata_cache_hit_latency_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(
        names::CACHE_ERRORS_TOTAL,
        "Total number of store faults absorbed by the cache"
    );
    describe_histogram!(
        names::CACHE_HIT_LATENCY_SECONDS,
        "Latency of cache lookups that returned a value"
    );
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Percentage of lookups that hit, 0 when nothing has been looked up.
    pub hit_rate: f64,
    /// Mean hit latency in milliseconds, 0 when there are no hits.
    pub average_response_time: f64,
    pub last_reset: DateTime<Utc>,
}

/// Thread-safe hit/miss/error counters.
#[derive(Debug)]
pub struct MetricsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    hit_latency_micros: AtomicU64,
    last_reset: RwLock<DateTime<Utc>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            hit_latency_micros: AtomicU64::new(0),
            last_reset: RwLock::new(Utc::now()),
        }
    }

    /// Records a hit that took `elapsed` to serve.
    pub fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.hit_latency_micros.fetch_add(micros, Ordering::Relaxed);

        counter!(names::CACHE_HITS_TOTAL).increment(1);
        histogram!(names::CACHE_HIT_LATENCY_SECONDS).record(elapsed.as_secs_f64());
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_MISSES_TOTAL).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_ERRORS_TOTAL).increment(1);
    }

    /// Computes the derived statistics from the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let latency_micros = self.hit_latency_micros.load(Ordering::Relaxed);

        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64 * 100.0
        };
        let average_response_time = if hits == 0 {
            0.0
        } else {
            latency_micros as f64 / 1000.0 / hits as f64
        };

        MetricsSnapshot {
            hits,
            misses,
            errors,
            hit_rate,
            average_response_time,
            last_reset: *self.last_reset.read(),
        }
    }

    /// Zeroes every counter and stamps the reset time.
    pub fn reset(&self) {
        let mut last_reset = self.last_reset.write();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.hit_latency_micros.store(0, Ordering::Relaxed);
        *last_reset = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let recorder = MetricsRecorder::new();
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.hit_rate, 0.0);
        assert_eq!(snapshot.average_response_time, 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let recorder = MetricsRecorder::new();
        for _ in 0..3 {
            recorder.record_hit(Duration::from_millis(2));
        }
        recorder.record_miss();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.hit_rate, 75.0);
        assert_eq!(snapshot.average_response_time, 2.0);
    }

    #[test]
    fn test_average_ignores_misses() {
        let recorder = MetricsRecorder::new();
        recorder.record_hit(Duration::from_millis(10));
        recorder.record_hit(Duration::from_millis(30));
        recorder.record_miss();
        recorder.record_miss();

        assert_eq!(recorder.snapshot().average_response_time, 20.0);
    }

    #[test]
    fn test_errors_do_not_affect_hit_rate() {
        let recorder = MetricsRecorder::new();
        recorder.record_error();
        recorder.record_error();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.hit_rate, 0.0);
    }

    #[test]
    fn test_reset() {
        let recorder = MetricsRecorder::new();
        let before = recorder.snapshot().last_reset;
        recorder.record_hit(Duration::from_millis(1));
        recorder.record_miss();
        recorder.record_error();

        recorder.reset();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.errors, 0);
        assert!(snapshot.last_reset >= before);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(MetricsRecorder::new().snapshot()).unwrap();
        assert!(json.get("hitRate").is_some());
        assert!(json.get("averageResponseTime").is_some());
        assert!(json.get("lastReset").is_some());
    }
}
