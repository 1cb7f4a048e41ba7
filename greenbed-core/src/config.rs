//! Configuration types
//!
//! `GreenbedConfig` is loaded once at process start and handed to every
//! component by value or behind an `Arc`. Nothing reads the environment after
//! startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Which cache backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local hash map
    Memory,
    /// Memory-mapped LMDB environment under `cache_dir`
    Lmdb,
}

impl CacheBackendKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "lmdb" => Some(Self::Lmdb),
            _ => None,
        }
    }
}

/// Retention windows used by the maintenance job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub readings: Duration,
    pub notifications: Duration,
    pub rate_limits: Duration,
    /// How often the maintenance job runs.
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            readings: Duration::from_secs(30 * 24 * 3600),
            notifications: Duration::from_secs(90 * 24 * 3600),
            rate_limits: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenbedConfig {
    // Store
    /// SQLite database file; `:memory:` opens a private in-memory database.
    pub database_path: PathBuf,
    pub db_busy_timeout: Duration,

    // Cache
    pub cache_enabled: bool,
    pub cache_backend: CacheBackendKind,
    pub cache_dir: PathBuf,
    pub cache_namespace: String,
    pub cache_max_size_mb: usize,
    pub default_ttl: Duration,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Maintenance
    pub retention: RetentionConfig,
}

impl Default for GreenbedConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("greenbed.db"),
            db_busy_timeout: Duration::from_millis(5_000),
            cache_enabled: true,
            cache_backend: CacheBackendKind::Memory,
            cache_dir: PathBuf::from("cache"),
            cache_namespace: "greenbed".to_string(),
            cache_max_size_mb: 64,
            default_ttl: Duration::from_secs(300),
            rate_limit_enabled: true,
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            retention: RetentionConfig::default(),
        }
    }
}

impl GreenbedConfig {
    /// Load configuration from `GREENBED_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to the defaults; call
    /// `validate` afterwards to reject nonsensical combinations.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|s| s.to_lowercase() != "false" && s != "0")
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let database_path = lookup("GREENBED_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let db_busy_timeout = lookup("GREENBED_DB_BUSY_TIMEOUT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.db_busy_timeout);

        let cache_backend = lookup("GREENBED_CACHE_BACKEND")
            .and_then(|s| CacheBackendKind::parse(&s))
            .unwrap_or(defaults.cache_backend);

        let cache_max_size_mb = lookup("GREENBED_CACHE_MAX_SIZE_MB")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cache_max_size_mb);

        let rate_limit_requests = lookup("GREENBED_RATE_LIMIT_REQUESTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rate_limit_requests);

        let retention = RetentionConfig {
            readings: secs("GREENBED_RETENTION_READINGS_SECS", defaults.retention.readings),
            notifications: secs(
                "GREENBED_RETENTION_NOTIFICATIONS_SECS",
                defaults.retention.notifications,
            ),
            rate_limits: secs(
                "GREENBED_RETENTION_RATE_LIMITS_SECS",
                defaults.retention.rate_limits,
            ),
            interval: secs("GREENBED_MAINTENANCE_INTERVAL_SECS", defaults.retention.interval),
        };

        Self {
            database_path,
            db_busy_timeout,
            cache_enabled: flag("GREENBED_CACHE_ENABLED", defaults.cache_enabled),
            cache_backend,
            cache_dir: lookup("GREENBED_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_namespace: lookup("GREENBED_CACHE_NAMESPACE")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.cache_namespace),
            cache_max_size_mb,
            default_ttl: secs("GREENBED_CACHE_TTL_SECS", defaults.default_ttl),
            rate_limit_enabled: flag("GREENBED_RATE_LIMIT_ENABLED", defaults.rate_limit_enabled),
            rate_limit_requests,
            rate_limit_window: secs("GREENBED_RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window),
            retention,
        }
    }

    /// Reject configurations that would make a component misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database_path".to_string(),
            });
        }
        if self.default_ttl.is_zero() {
            return Err(invalid("default_ttl", "0", "must be positive"));
        }
        if self.rate_limit_requests == 0 {
            return Err(invalid("rate_limit_requests", "0", "must be at least 1"));
        }
        if self.rate_limit_window.is_zero() {
            return Err(invalid("rate_limit_window", "0", "must be positive"));
        }
        if self.cache_backend == CacheBackendKind::Lmdb {
            if self.cache_dir.as_os_str().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: "cache_dir".to_string(),
                });
            }
            if self.cache_max_size_mb == 0 {
                return Err(invalid("cache_max_size_mb", "0", "must be positive"));
            }
        }
        if self.retention.interval.is_zero() {
            return Err(invalid("retention.interval", "0", "must be positive"));
        }
        Ok(())
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_backend(mut self, backend: CacheBackendKind) -> Self {
        self.cache_backend = backend;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.rate_limit_requests = requests;
        self.rate_limit_window = window;
        self
    }

    pub fn with_rate_limit_enabled(mut self, enabled: bool) -> Self {
        self.rate_limit_enabled = enabled;
        self
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
