//! TTL cache over a pluggable backend.
//!
//! Expiry is lazy: an entry read at or after its expiry instant is removed
//! and reported absent. Nothing sweeps the backend in the background.
//!
//! The read path never fails because of the backend. I/O or decode errors
//! are logged and treated as a miss, so callers fall through to the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use greenbed_core::{chrono_duration, CacheError, Clock, EntityType, GreenbedConfig, UserId};
use serde::{de::DeserializeOwned, Serialize};

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats, CachedEntry};

/// Result of a cache read.
///
/// `Absent` is its own variant rather than a reserved value, so any value
/// the caller can serialize (including `None` or an empty list) can be
/// cached and read back as a hit.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Absent,
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Absent => None,
        }
    }
}

/// Configuration for `TtlCache`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// When false every read is absent and every write is a no-op.
    pub enabled: bool,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn from_config(config: &GreenbedConfig) -> Self {
        Self {
            enabled: config.cache_enabled,
            default_ttl: config.default_ttl,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    backend_errors: AtomicU64,
}

/// Key-value cache with per-entry expiry.
pub struct TtlCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    counters: Counters,
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish()
    }
}

impl TtlCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            backend,
            clock,
            config,
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Read `key`. Expired entries are evicted before returning `Absent`.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheLookup<T> {
        if !self.config.enabled {
            return CacheLookup::Absent;
        }

        let entry = match self.backend.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.miss(),
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return self.miss();
            }
        };

        if entry.is_expired(self.clock.now()) {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.evict(key);
            return self.miss();
        }

        match serde_json::from_slice(&entry.payload) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Hit(value)
            }
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Cached value failed to decode, evicting");
                self.evict(key);
                self.miss()
            }
        }
    }

    /// Store `value` under `key` for `ttl`. Overwrites any existing entry and
    /// restarts its expiry.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero TTL, `Serialization` when `value` cannot
    /// be encoded. Backend write failures are logged, not returned.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidArgument {
                reason: "ttl must be positive".to_string(),
            });
        }
        if !self.config.enabled {
            return Ok(());
        }

        let payload = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(chrono_duration(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if let Err(e) = self.backend.put(key, CachedEntry::new(expires_at, payload)) {
            self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
        Ok(())
    }

    /// `set` with the configured default TTL.
    pub fn set_default<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), CacheError> {
        self.set(key, value, self.config.default_ttl)
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.backend.delete(key)?;
        Ok(())
    }

    /// Remove every key of the `(kind, owner)` family.
    pub fn invalidate_kind(&self, kind: EntityType, owner: UserId) -> Result<u64, CacheError> {
        self.backend.invalidate_family(kind, owner)
    }

    /// Remove every key of `owner`.
    pub fn invalidate_owner(&self, owner: UserId) -> Result<u64, CacheError> {
        self.backend.invalidate_owner(owner)
    }

    /// Remove everything. Administrative use only.
    pub fn clear(&self) -> Result<u64, CacheError> {
        let removed = self.backend.clear()?;
        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Read-through: return the cached value, or run `loader`, cache its
    /// result for `ttl` and return it.
    ///
    /// Concurrent misses may each run `loader`; the last write wins.
    pub fn get_or_populate<T, E, F>(&self, key: &CacheKey, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let CacheLookup::Hit(value) = self.get(key) {
            return Ok(value);
        }
        let value = loader()?;
        if let Err(e) = self.set(key, &value, ttl) {
            tracing::warn!(key = %key, error = %e, "Skipping cache population");
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        let entry_count = self.backend.entry_count().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Cache entry count unavailable");
            0
        });
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            entry_count,
        }
    }

    fn miss<T>(&self) -> CacheLookup<T> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Absent
    }

    fn evict(&self, key: &CacheKey) {
        if let Err(e) = self.backend.delete(key) {
            tracing::warn!(key = %key, error = %e, "Failed to evict cache entry");
        }
    }
}
