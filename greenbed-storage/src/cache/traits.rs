//! Cache backend trait and shared entry format.

use greenbed_core::{CacheError, EntityType, Timestamp, UserId};

use super::key::CacheKey;

/// A serialized value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    /// Expiry as epoch milliseconds.
    pub expires_at_millis: i64,
    /// JSON-encoded value.
    pub payload: Vec<u8>,
}

impl CachedEntry {
    pub fn new(expires_at: Timestamp, payload: Vec<u8>) -> Self {
        Self {
            expires_at_millis: expires_at.timestamp_millis(),
            payload,
        }
    }

    /// An entry is expired from its expiry instant onwards.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.timestamp_millis() >= self.expires_at_millis
    }

    /// Wire format: `[expires_at: 8 bytes LE][json payload]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.payload.len());
        bytes.extend_from_slice(&self.expires_at_millis.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < 8 {
            return Err(CacheError::Serialization {
                reason: format!("entry too short: {} bytes", bytes.len()),
            });
        }
        let expiry: [u8; 8] = bytes[0..8]
            .try_into()
            .map_err(|_| CacheError::Serialization {
                reason: "invalid expiry header".to_string(),
            })?;
        Ok(Self {
            expires_at_millis: i64::from_le_bytes(expiry),
            payload: bytes[8..].to_vec(),
        })
    }
}

/// Storage behind `TtlCache`.
///
/// Backends store opaque entries and know nothing about expiry; the TTL
/// layer decides when an entry is stale and asks the backend to drop it.
/// Implementations must be safe for concurrent use.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError>;

    /// Insert or overwrite.
    fn put(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError>;

    /// Remove one key. Returns whether it existed; absent keys are not an
    /// error.
    fn delete(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove every key of the `(kind, owner)` family, sub-keys included.
    fn invalidate_family(&self, kind: EntityType, owner: UserId) -> Result<u64, CacheError>;

    /// Remove every key belonging to `owner`.
    fn invalidate_owner(&self, owner: UserId) -> Result<u64, CacheError>;

    /// Remove everything.
    fn clear(&self) -> Result<u64, CacheError>;

    fn entry_count(&self) -> Result<u64, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found past their expiry and evicted on read.
    pub expirations: u64,
    /// Backend failures that were degraded to misses.
    pub backend_errors: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_entry_bytes_round_trip() {
        let expires = DateTime::from_timestamp(1_704_067_500, 0).unwrap_or_default();
        let entry = CachedEntry::new(expires, br#"{"a":1}"#.to_vec());
        let back = CachedEntry::from_bytes(&entry.to_bytes()).expect("decode");
        assert_eq!(back, entry);
    }

    #[test]
    fn test_short_entry_is_rejected() {
        assert!(CachedEntry::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let expires = DateTime::from_timestamp(100, 0).unwrap_or_default();
        let entry = CachedEntry::new(expires, Vec::new());
        assert!(!entry.is_expired(DateTime::from_timestamp(99, 999_000_000).unwrap_or_default()));
        assert!(entry.is_expired(expires));
    }
}
