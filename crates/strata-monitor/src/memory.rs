//! Memory statistics and pressure classification.

use serde::{Deserialize, Serialize};

/// Ceiling used when the configured value cannot be parsed.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Parses `"<digits>[b|kb|mb|gb]"` (case-insensitive) into bytes.
///
/// A missing unit means bytes. Anything else falls back to
/// [`DEFAULT_MAX_MEMORY_BYTES`].
pub fn parse_memory_string(value: &str) -> u64 {
    let value = value.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => return DEFAULT_MAX_MEMORY_BYTES,
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .unwrap_or(DEFAULT_MAX_MEMORY_BYTES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Human-readable used memory as reported by the store.
    pub used_memory: String,
    pub used_memory_peak: String,
    pub used_memory_bytes: u64,
    pub total_keys: u64,
    /// Used bytes relative to the configured ceiling.
    pub memory_usage_percentage: f64,
    /// `true` below 80% usage.
    pub is_healthy: bool,
}

impl MemoryStats {
    pub fn new(used_memory: String, used_memory_peak: String, used_bytes: u64, total_keys: u64, max_bytes: u64) -> Self {
        let memory_usage_percentage = if max_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / max_bytes as f64 * 100.0
        };

        Self {
            used_memory,
            used_memory_peak,
            used_memory_bytes: used_bytes,
            total_keys,
            memory_usage_percentage,
            is_healthy: memory_usage_percentage < 80.0,
        }
    }

    /// Placeholder reported when the store could not be reached.
    pub fn unavailable() -> Self {
        Self {
            used_memory: "0".to_string(),
            used_memory_peak: "0".to_string(),
            used_memory_bytes: 0,
            total_keys: 0,
            memory_usage_percentage: 0.0,
            is_healthy: false,
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::classify(self.memory_usage_percentage)
    }
}

/// Memory pressure bands used by the scheduled memory check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Up to 70%.
    Normal,
    /// Above 70%, up to 80%.
    Elevated,
    /// Above 80%, up to 90%.
    High,
    /// Above 90%.
    Critical,
}

impl MemoryPressure {
    pub fn classify(usage_pct: f64) -> Self {
        if usage_pct > 90.0 {
            Self::Critical
        } else if usage_pct > 80.0 {
            Self::High
        } else if usage_pct > 70.0 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }
}

/// Store status reported on the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Healthy below 70%, degraded below 90%, unhealthy from 90% up.
    pub fn from_usage(usage_pct: f64) -> Self {
        if usage_pct < 70.0 {
            Self::Healthy
        } else if usage_pct < 90.0 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}
