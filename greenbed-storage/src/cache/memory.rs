//! Process-local cache backend.

use std::collections::HashMap;
use std::sync::RwLock;

use greenbed_core::{CacheError, EntityType, UserId};

use super::key::CacheKey;
use super::traits::{CacheBackend, CachedEntry};

/// Hash-map backend guarded by a `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<CacheKey, CachedEntry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn remove_where<F>(&self, predicate: F) -> Result<u64, CacheError>
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        Ok((before - entries.len()) as u64)
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        entries.insert(key.clone(), entry);
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn invalidate_family(&self, kind: EntityType, owner: UserId) -> Result<u64, CacheError> {
        self.remove_where(|key| key.in_family(kind, owner))
    }

    fn invalidate_owner(&self, owner: UserId) -> Result<u64, CacheError> {
        self.remove_where(|key| key.owner() == owner)
    }

    fn clear(&self) -> Result<u64, CacheError> {
        self.remove_where(|_| true)
    }

    fn entry_count(&self) -> Result<u64, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.len() as u64)
    }
}
