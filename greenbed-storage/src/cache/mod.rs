//! TTL cache with owner-scoped keys and pluggable backends.
//!
//! Reads consult the cache first and fall back to the store on a miss;
//! mutations invalidate the affected `(entity, owner)` family after commit.
//! The cache is an optimisation only: a broken backend degrades every read
//! to a miss and never fails a request.
//!
//! # Example
//!
//! ```ignore
//! let key = CacheKey::new(EntityType::Sensor, user_id);
//! let sensors = cache.get_or_populate(&key, cache.default_ttl(), || load(user_id))?;
//!
//! // after a committed mutation
//! cache.invalidate_kind(EntityType::Sensor, user_id)?;
//! ```

pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;
pub mod ttl;

use std::sync::Arc;

use greenbed_core::{CacheBackendKind, CacheError, Clock, GreenbedConfig};

pub use key::CacheKey;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use traits::{CacheBackend, CacheStats, CachedEntry};
pub use ttl::{CacheConfig, CacheLookup, TtlCache};

/// Construct the backend selected by `config.cache_backend`.
///
/// # Errors
///
/// `CacheError::Backend` when the LMDB environment cannot be opened.
pub fn build_backend(config: &GreenbedConfig) -> Result<Arc<dyn CacheBackend>, CacheError> {
    match config.cache_backend {
        CacheBackendKind::Memory => Ok(Arc::new(InMemoryCacheBackend::new())),
        CacheBackendKind::Lmdb => {
            let backend = LmdbCacheBackend::new(
                &config.cache_dir,
                &config.cache_namespace,
                config.cache_max_size_mb,
            )?;
            Ok(Arc::new(backend))
        }
    }
}

impl TtlCache {
    /// Build a cache from process configuration.
    pub fn from_config(config: &GreenbedConfig, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let backend = build_backend(config)?;
        tracing::info!(
            backend = ?config.cache_backend,
            enabled = config.cache_enabled,
            default_ttl_secs = config.default_ttl.as_secs(),
            "Cache initialised"
        );
        Ok(Self::new(backend, clock, CacheConfig::from_config(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbed_core::{EntityType, ManualClock};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_memory() {
        let cache = TtlCache::from_config(
            &GreenbedConfig::default(),
            Arc::new(ManualClock::at_epoch_2024()),
        )
        .expect("cache");
        assert!(cache.is_enabled());
        assert_eq!(cache.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_from_config_lmdb() {
        let dir = TempDir::new().expect("tempdir");
        let config = GreenbedConfig::default()
            .with_cache_backend(CacheBackendKind::Lmdb)
            .with_cache_dir(dir.path().join("cache"));
        let cache = TtlCache::from_config(&config, Arc::new(ManualClock::at_epoch_2024()))
            .expect("cache");
        let key = CacheKey::new(EntityType::Plant, 9);
        cache.set(&key, &vec!["basil"], Duration::from_secs(30)).expect("set");
        assert_eq!(cache.get::<Vec<String>>(&key), CacheLookup::Hit(vec!["basil".to_string()]));
    }
}
