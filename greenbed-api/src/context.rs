//! Shared service state.
//!
//! One `ServiceContext` is built at startup and handed to every service
//! behind an `Arc`. It owns the store connection, the cache, the rate
//! limiter, the clock and the transaction gate.
//!
//! The store holds a single connection, so an open transaction is visible to
//! every statement issued on it. The gate keeps readers off the connection
//! while a unit of work is in flight: mutations and maintenance take it
//! exclusively, reads (cached or not) take it shared.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use greenbed_core::{Clock, GreenbedConfig, Persistable, SystemClock, UserId};
use greenbed_storage::{
    CacheKey, InMemoryRateLimiter, Mapper, RateLimitConfig, RateLimiter, SqliteStore,
    StoreAdapter, StoreRateLimiter, TtlCache,
};

use crate::error::ApiResult;

/// Store, cache, limiter and clock shared by every service.
pub struct ServiceContext {
    store: Arc<dyn StoreAdapter>,
    cache: Arc<TtlCache>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    config: GreenbedConfig,
    tx_gate: RwLock<()>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("cache", &self.cache)
            .field("rate_limit", self.limiter.config())
            .field("database_path", &self.config.database_path)
            .finish()
    }
}

impl ServiceContext {
    /// Assemble a context from already-built parts.
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        cache: Arc<TtlCache>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        config: GreenbedConfig,
    ) -> Self {
        Self {
            store,
            cache,
            limiter,
            clock,
            config,
            tx_gate: RwLock::new(()),
        }
    }

    /// Open the store, cache and limiter named by `config` on the system clock.
    pub fn from_config(config: &GreenbedConfig) -> ApiResult<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`ServiceContext::from_config`] with an injected clock.
    ///
    /// The store-backed limiter gets a connection of its own so its entries
    /// never ride along in an entity transaction. A `:memory:` database
    /// cannot be shared between connections, so it uses the in-process
    /// limiter instead.
    pub fn from_config_with_clock(
        config: &GreenbedConfig,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        config.validate()?;

        let store: Arc<dyn StoreAdapter> = Arc::new(SqliteStore::from_config(config)?);
        let cache = Arc::new(TtlCache::from_config(config, Arc::clone(&clock))?);

        let limit_config = RateLimitConfig::from_config(config);
        let limiter: Arc<dyn RateLimiter> = if config.database_path.as_os_str() == ":memory:" {
            Arc::new(InMemoryRateLimiter::new(limit_config, Arc::clone(&clock)))
        } else {
            let limiter_store: Arc<dyn StoreAdapter> = Arc::new(SqliteStore::from_config(config)?);
            Arc::new(StoreRateLimiter::new(
                limiter_store,
                Arc::clone(&clock),
                limit_config,
            ))
        };

        tracing::info!(
            database_path = %config.database_path.display(),
            rate_limit_requests = config.rate_limit_requests,
            rate_limit_window_secs = config.rate_limit_window.as_secs(),
            "Service context initialised"
        );

        Ok(Self::new(store, cache, limiter, clock, config.clone()))
    }

    pub fn store(&self) -> &dyn StoreAdapter {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn config(&self) -> &GreenbedConfig {
        &self.config
    }

    /// Mapper on the shared connection. Callers hold a gate guard.
    pub(crate) fn mapper<T: Persistable>(&self) -> Mapper<'_, T> {
        Mapper::new(self.store.as_ref(), self.clock.as_ref())
    }

    // ========================================================================
    // GATE
    // ========================================================================

    // The gate guards `()`; a panic while holding it leaves nothing to repair,
    // the transaction itself is rolled back by the unit-of-work guard.

    pub(crate) fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.tx_gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.tx_gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Run an uncached read with the gate held shared.
    pub fn read<T, F>(&self, reader: F) -> ApiResult<T>
    where
        F: FnOnce(&Self) -> ApiResult<T>,
    {
        let _gate = self.read_gate();
        reader(self)
    }

    /// Read-through on `key` with the default TTL.
    ///
    /// The loader runs with the gate held shared, so it only ever observes
    /// committed rows and cannot race the invalidation of a commit.
    pub fn cached<T, F>(&self, key: &CacheKey, loader: F) -> ApiResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce(&Self) -> ApiResult<T>,
    {
        self.cached_for(key, self.cache.default_ttl(), loader)
    }

    pub fn cached_for<T, F>(&self, key: &CacheKey, ttl: Duration, loader: F) -> ApiResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce(&Self) -> ApiResult<T>,
    {
        let _gate = self.read_gate();
        self.cache.get_or_populate(key, ttl, || loader(self))
    }

    /// Drop every cached entry of one owner. Used after account-wide changes.
    pub fn forget_owner(&self, owner: UserId) -> u64 {
        match self.cache.invalidate_owner(owner) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(owner, error = %e, "Cache invalidation failed");
                0
            }
        }
    }
}
