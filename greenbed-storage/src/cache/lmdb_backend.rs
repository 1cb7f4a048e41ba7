//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file that survives process restarts. Each namespace maps to
//! a named database inside one environment.
//!
//! Keys are the binary `CacheKey` encoding, so every entry of an
//! `(entity, owner)` family shares a prefix and family invalidation is a
//! prefix scan.

use std::path::Path;

use greenbed_core::{CacheError, EntityType, UserId};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::key::CacheKey;
use super::traits::{CacheBackend, CachedEntry};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Most namespaces one environment can hold.
const MAX_NAMESPACES: u32 = 16;

/// LMDB-backed cache backend.
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    namespace: String,
}

impl std::fmt::Debug for LmdbCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheBackend")
            .field("path", &self.env.path())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl LmdbCacheBackend {
    /// Open (creating if needed) the environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `namespace` - Named database inside the environment
    /// * `max_size_mb` - Maximum size of the map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(
        path: P,
        namespace: &str,
        max_size_mb: usize,
    ) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process; the
        // same path must not be opened twice with different options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(MAX_NAMESPACES)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(namespace))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        tracing::debug!(path = %path.as_ref().display(), namespace, "Opened LMDB cache");

        Ok(Self {
            env,
            db,
            namespace: namespace.to_string(),
        })
    }

    /// Collect every stored key accepted by `predicate`.
    fn collect_keys<F>(&self, predicate: F) -> Result<Vec<Vec<u8>>, LmdbCacheError>
    where
        F: Fn(&[u8]) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, _) = result.map_err(txn_error)?;
            if predicate(key) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.prefix_iter(&rtxn, prefix).map_err(txn_error)? {
            let (key, _) = result.map_err(txn_error)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}

impl CacheBackend for LmdbCacheBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let encoded = key.encode();
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        match self.db.get(&rtxn, &encoded).map_err(txn_error)? {
            Some(bytes) => Ok(Some(CachedEntry::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError> {
        let encoded = key.encode();
        let bytes = entry.to_bytes();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.put(&mut wtxn, &encoded, &bytes).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let encoded = key.encode();
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, &encoded).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn invalidate_family(&self, kind: EntityType, owner: UserId) -> Result<u64, CacheError> {
        let prefix = CacheKey::family_prefix(kind, owner);
        let keys = self.collect_keys_with_prefix(&prefix)?;
        Ok(self.delete_keys(&keys)?)
    }

    fn invalidate_owner(&self, owner: UserId) -> Result<u64, CacheError> {
        let keys = self.collect_keys(|key| CacheKey::owner_of_encoded(key) == Some(owner))?;
        Ok(self.delete_keys(&keys)?)
    }

    fn clear(&self) -> Result<u64, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let count = self.db.len(&wtxn).map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(count)
    }

    fn entry_count(&self) -> Result<u64, CacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        Ok(self.db.len(&rtxn).map_err(txn_error)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, LmdbCacheBackend) {
        let dir = TempDir::new().expect("tempdir");
        let backend = LmdbCacheBackend::new(dir.path(), "test", 10).expect("open");
        (dir, backend)
    }

    fn entry(payload: &str) -> CachedEntry {
        CachedEntry {
            expires_at_millis: 1_704_067_500_000,
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_dir, backend) = backend();
        let key = CacheKey::new(EntityType::Sensor, 42);
        backend.put(&key, entry("[1,2]")).expect("put");
        assert_eq!(backend.get(&key).expect("get"), Some(entry("[1,2]")));
    }

    #[test]
    fn test_overwrite_last_writer_wins() {
        let (_dir, backend) = backend();
        let key = CacheKey::new(EntityType::Plant, 1);
        backend.put(&key, entry("a")).expect("put");
        backend.put(&key, entry("b")).expect("put");
        assert_eq!(backend.get(&key).expect("get"), Some(entry("b")));
        assert_eq!(backend.entry_count().expect("count"), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, backend) = backend();
        let key = CacheKey::new(EntityType::Plant, 1);
        backend.put(&key, entry("a")).expect("put");
        assert!(backend.delete(&key).expect("delete"));
        assert!(!backend.delete(&key).expect("delete again"));
    }

    #[test]
    fn test_invalidate_family_removes_sub_keys() {
        let (_dir, backend) = backend();
        backend
            .put(&CacheKey::new(EntityType::Notification, 5), entry("a"))
            .expect("put");
        backend
            .put(
                &CacheKey::with_sub_key(EntityType::Notification, 5, "unread"),
                entry("b"),
            )
            .expect("put");
        backend
            .put(&CacheKey::new(EntityType::Notification, 6), entry("c"))
            .expect("put");

        assert_eq!(
            backend
                .invalidate_family(EntityType::Notification, 5)
                .expect("invalidate"),
            2
        );
        assert_eq!(backend.entry_count().expect("count"), 1);
    }

    #[test]
    fn test_invalidate_owner_and_clear() {
        let (_dir, backend) = backend();
        backend.put(&CacheKey::new(EntityType::Sensor, 5), entry("a")).expect("put");
        backend.put(&CacheKey::new(EntityType::Plant, 5), entry("b")).expect("put");
        backend.put(&CacheKey::new(EntityType::Plant, 6), entry("c")).expect("put");
        assert_eq!(backend.invalidate_owner(5).expect("invalidate"), 2);
        assert_eq!(backend.clear().expect("clear"), 1);
        assert_eq!(backend.entry_count().expect("count"), 0);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let key = CacheKey::new(EntityType::Settings, 3);
        {
            let backend = LmdbCacheBackend::new(dir.path(), "persist", 10).expect("open");
            backend.put(&key, entry("{}")).expect("put");
        }
        let backend = LmdbCacheBackend::new(dir.path(), "persist", 10).expect("reopen");
        assert_eq!(backend.get(&key).expect("get"), Some(entry("{}")));
    }
}
