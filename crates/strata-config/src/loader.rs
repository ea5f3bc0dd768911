//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use std::path::Path;
use std::sync::Arc;
use strata_core::StrataError;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Flat environment names accepted alongside the `STRATA__` tree.
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("REDIS_HOST", "redis.host"),
    ("REDIS_PORT", "redis.port"),
    ("REDIS_PASSWORD", "redis.password"),
    ("REDIS_DB", "redis.db"),
    ("REDIS_KEY_PREFIX", "redis.key_prefix"),
    ("REDIS_MAX_MEMORY", "redis.max_memory"),
    ("CACHE_DEFAULT_TTL", "cache.default_ttl_secs"),
    ("CACHE_MAX_ITEMS", "cache.max_items"),
    ("SLACK_WEBHOOK_URL", "alerts.slack_webhook_url"),
];

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `STRATA__` prefix
    /// 5. Flat legacy variables such as `REDIS_HOST` or `REDIS_MAX_MEMORY`
    pub fn new(config_dir: impl Into<String>) -> Result<Self, StrataError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir, |name| std::env::var(name).ok())?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, StrataError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), StrataError> {
        let new_config = Self::load_config(&self.config_dir, |name| std::env::var(name).ok())?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config<L>(config_dir: &str, lookup: L) -> Result<AppConfig, StrataError>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = lookup("STRATA_ENVIRONMENT").unwrap_or_else(|| "development".to_string());
        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default".to_string(), environment, "local".to_string()] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder = apply_legacy_overrides(builder, &lookup).map_err(config_error_to_strata_error)?;

        let app_config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize::<AppConfig>())
            .map_err(config_error_to_strata_error)?;

        validate_config(&app_config)?;

        Ok(app_config)
    }
}

/// Layers the flat legacy variables on top of every other source.
fn apply_legacy_overrides<L>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: &L,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    for (env_name, key) in LEGACY_ENV_OVERRIDES {
        let value = lookup(*env_name).filter(|v| !v.is_empty());
        if value.is_some() {
            debug!(env = %env_name, key = %key, "Applying legacy environment override");
        }
        builder = builder.set_override_option(*key, value)?;
    }
    Ok(builder)
}

/// Validates the configuration.
///
/// An unparseable `redis.max_memory` is deliberately not rejected here; the
/// monitor falls back to its default ceiling.
fn validate_config(config: &AppConfig) -> Result<(), StrataError> {
    if config.server.port == 0 {
        return Err(StrataError::configuration("server.port must be non-zero"));
    }

    if config.redis.enabled && config.redis.host.is_empty() {
        return Err(StrataError::configuration("redis.host is required when redis is enabled"));
    }

    if config.redis.pool_size == 0 {
        return Err(StrataError::configuration("redis.pool_size must be at least 1"));
    }

    if config.redis.retry.max_attempts == 0 {
        return Err(StrataError::configuration("redis.retry.max_attempts must be at least 1"));
    }

    if config.monitor.memory_check_interval_secs == 0 || config.monitor.dashboard_interval_secs == 0 {
        return Err(StrataError::configuration("monitor intervals must be non-zero"));
    }

    Ok(())
}

fn config_error_to_strata_error(err: ConfigError) -> StrataError {
    StrataError::Configuration(err.to_string())
}
