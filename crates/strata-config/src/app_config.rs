//! Application configuration structures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote store (Redis) configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Cache engine configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background monitoring configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Alerting configuration.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "strata".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the request timeout as a Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry policy for the remote store client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay added per attempt in milliseconds.
    pub step_ms: u64,
    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step_ms: 100,
            max_delay_ms: 3000,
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Enable Redis. When disabled an in-process store is used.
    pub enabled: bool,
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Optional password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: u32,
    /// Prefix applied to every cache key.
    pub key_prefix: String,
    /// Connection pool size.
    pub pool_size: usize,
    /// Per-operation timeout in milliseconds.
    pub op_timeout_ms: u64,
    /// Configured memory ceiling, e.g. `"256mb"`.
    pub max_memory: String,
    /// Connection retry policy.
    pub retry: RetryConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: String::new(),
            pool_size: 10,
            op_timeout_ms: 2000,
            max_memory: "256mb".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Builds the connection URL from the discrete fields.
    #[must_use]
    pub fn url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Returns the per-operation timeout as a Duration.
    #[must_use]
    pub const fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// A URL-substring to TTL mapping for response caching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlRule {
    /// Substring matched against the request path.
    pub contains: String,
    /// TTL in seconds for matching paths.
    pub ttl_secs: u64,
}

/// Response cache (HTTP boundary) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// Enable response caching.
    pub enabled: bool,
    /// Ordered TTL rules; first match wins.
    pub ttl_rules: Vec<TtlRule>,
    /// TTL in seconds when no rule matches.
    pub default_ttl_secs: u64,
    /// Largest response body that will be cached.
    pub max_body_bytes: usize,
    /// Path prefixes that are never cached.
    pub no_cache_prefixes: Vec<String>,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_rules: vec![TtlRule {
                contains: "/users".to_string(),
                ttl_secs: 60,
            }],
            default_ttl_secs: 300,
            max_body_bytes: 1024 * 1024, // 1MB
            no_cache_prefixes: vec!["/health".to_string(), "/api-docs".to_string()],
        }
    }
}

/// Cache engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default entry TTL in seconds.
    pub default_ttl_secs: u64,
    /// Maximum entries held by the in-process store.
    pub max_items: usize,
    /// Response cache settings.
    pub http: HttpCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_items: 1000,
            http: HttpCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Background monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Memory check interval in seconds.
    pub memory_check_interval_secs: u64,
    /// Optional cron expression overriding the memory check interval.
    pub memory_check_cron: Option<String>,
    /// Dashboard sweep interval in seconds.
    pub dashboard_interval_secs: u64,
    /// Optional cron expression overriding the dashboard interval.
    pub dashboard_cron: Option<String>,
    /// Tag index reconciliation interval in seconds.
    pub tag_reconcile_interval_secs: u64,
    /// Keys sampled when looking for the largest entries.
    pub key_sample_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            memory_check_interval_secs: 300,
            memory_check_cron: None,
            dashboard_interval_secs: 600,
            dashboard_cron: None,
            tag_reconcile_interval_secs: 900,
            key_sample_size: 100,
        }
    }
}

/// Alerting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Entries kept in the manual alert log.
    pub log_capacity: usize,
    /// Slack incoming webhook for critical alerts.
    pub slack_webhook_url: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            log_capacity: 100,
            slack_webhook_url: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (json, pretty).
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}
