//! Owner-scoped cache keys.
//!
//! A key names an entity family (`sensors`, `plants`, ...) for one owner,
//! optionally narrowed by a sub-key such as a page number. Construction
//! always requires the owner, so a key can never address another user's
//! entries by accident, and invalidating `(kind, owner)` reaches every
//! sub-key of that family.

use std::fmt;

use greenbed_core::{CacheError, EntityType, UserId};
use sha2::{Digest, Sha256};

/// Separator byte between key segments in the binary encoding.
const SEPARATOR: u8 = 0xFF;

/// Length of the `(kind, owner)` prefix in the binary encoding.
pub const PREFIX_LEN: usize = 10;

/// Typed cache key rendering as `"<entity>:<owner>[:<sub-key>]"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    kind: EntityType,
    owner: UserId,
    sub_key: Option<String>,
}

impl CacheKey {
    /// Key for a whole entity family of one owner, e.g. `sensors:42`.
    pub fn new(kind: EntityType, owner: UserId) -> Self {
        Self {
            inner: CacheKeyInner {
                kind,
                owner,
                sub_key: None,
            },
        }
    }

    /// Key narrowed by a sub-key, e.g. `notifications:42:unread`.
    pub fn with_sub_key(kind: EntityType, owner: UserId, sub_key: impl Into<String>) -> Self {
        let sub_key = sub_key.into();
        Self {
            inner: CacheKeyInner {
                kind,
                owner,
                sub_key: if sub_key.is_empty() { None } else { Some(sub_key) },
            },
        }
    }

    /// Parse the textual form.
    ///
    /// # Errors
    ///
    /// `CacheError::InvalidArgument` for an empty key, an unknown entity
    /// prefix, or a non-numeric owner.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        if raw.trim().is_empty() {
            return Err(invalid("cache key must not be empty"));
        }
        let mut parts = raw.splitn(3, ':');
        let prefix = parts.next().unwrap_or_default();
        let kind = EntityType::from_cache_prefix(prefix)
            .ok_or_else(|| invalid(&format!("unknown cache key prefix '{}'", prefix)))?;
        let owner = parts
            .next()
            .ok_or_else(|| invalid("cache key is missing an owner segment"))?
            .parse::<UserId>()
            .map_err(|e| invalid(&format!("cache key owner is not numeric: {}", e)))?;
        Ok(match parts.next() {
            Some(sub_key) => Self::with_sub_key(kind, owner, sub_key),
            None => Self::new(kind, owner),
        })
    }

    pub fn kind(&self) -> EntityType {
        self.inner.kind
    }

    pub fn owner(&self) -> UserId {
        self.inner.owner
    }

    pub fn sub_key(&self) -> Option<&str> {
        self.inner.sub_key.as_deref()
    }

    /// Whether this key belongs to the `(kind, owner)` family.
    pub fn in_family(&self, kind: EntityType, owner: UserId) -> bool {
        self.inner.kind == kind && self.inner.owner == owner
    }

    /// Binary encoding for ordered key-value stores.
    ///
    /// Format: `[kind: 1][0xFF][owner: 8, big-endian][0xFF][sha256(sub-key): 32]`,
    /// the last two segments present only with a sub-key. Keys of one family
    /// share the first `PREFIX_LEN` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::family_prefix(self.inner.kind, self.inner.owner).to_vec();
        if let Some(sub_key) = &self.inner.sub_key {
            bytes.reserve(33);
            bytes.push(SEPARATOR);
            bytes.extend_from_slice(&Sha256::digest(sub_key.as_bytes()));
        }
        bytes
    }

    /// Prefix shared by every key of `(kind, owner)`.
    pub fn family_prefix(kind: EntityType, owner: UserId) -> [u8; PREFIX_LEN] {
        let mut bytes = [0u8; PREFIX_LEN];
        bytes[0] = entity_type_to_byte(kind);
        bytes[1] = SEPARATOR;
        bytes[2..10].copy_from_slice(&owner.to_be_bytes());
        bytes
    }

    /// Owner encoded in a binary key, if the key is well-formed.
    pub fn owner_of_encoded(bytes: &[u8]) -> Option<UserId> {
        if bytes.len() < PREFIX_LEN || bytes[1] != SEPARATOR {
            return None;
        }
        byte_to_entity_type(bytes[0])?;
        let owner: [u8; 8] = bytes[2..10].try_into().ok()?;
        Some(UserId::from_be_bytes(owner))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.kind.cache_prefix(), self.inner.owner)?;
        if let Some(sub_key) = &self.inner.sub_key {
            write!(f, ":{}", sub_key)?;
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> CacheError {
    CacheError::InvalidArgument {
        reason: reason.to_string(),
    }
}

fn entity_type_to_byte(kind: EntityType) -> u8 {
    match kind {
        EntityType::User => 0,
        EntityType::Sensor => 1,
        EntityType::Plant => 2,
        EntityType::Reading => 3,
        EntityType::Settings => 4,
        EntityType::Notification => 5,
    }
}

fn byte_to_entity_type(byte: u8) -> Option<EntityType> {
    match byte {
        0 => Some(EntityType::User),
        1 => Some(EntityType::Sensor),
        2 => Some(EntityType::Plant),
        3 => Some(EntityType::Reading),
        4 => Some(EntityType::Settings),
        5 => Some(EntityType::Notification),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display() {
        assert_eq!(CacheKey::new(EntityType::Sensor, 42).to_string(), "sensors:42");
        assert_eq!(
            CacheKey::with_sub_key(EntityType::Notification, 42, "list:1:20").to_string(),
            "notifications:42:list:1:20"
        );
    }

    #[test]
    fn test_parse() {
        let key = CacheKey::parse("notifications:7:unread").expect("parse");
        assert_eq!(key.kind(), EntityType::Notification);
        assert_eq!(key.owner(), 7);
        assert_eq!(key.sub_key(), Some("unread"));

        let key = CacheKey::parse("settings:3").expect("parse");
        assert_eq!(key, CacheKey::new(EntityType::Settings, 3));
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        for raw in ["", "   ", "widgets:1", "sensors", "sensors:abc"] {
            assert!(
                matches!(CacheKey::parse(raw), Err(CacheError::InvalidArgument { .. })),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_empty_sub_key_collapses() {
        assert_eq!(
            CacheKey::with_sub_key(EntityType::Plant, 1, ""),
            CacheKey::new(EntityType::Plant, 1)
        );
    }

    #[test]
    fn test_family_prefix_shared_by_sub_keys() {
        let base = CacheKey::new(EntityType::Notification, 9).encode();
        let sub = CacheKey::with_sub_key(EntityType::Notification, 9, "unread").encode();
        let prefix = CacheKey::family_prefix(EntityType::Notification, 9);
        assert_eq!(base.as_slice(), &prefix[..]);
        assert!(sub.starts_with(&prefix));
        assert_eq!(sub.len(), PREFIX_LEN + 33);
    }

    #[test]
    fn test_different_owners_do_not_share_prefix() {
        let a = CacheKey::new(EntityType::Sensor, 1).encode();
        let b = CacheKey::new(EntityType::Sensor, 2).encode();
        assert!(!b.starts_with(&a));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Rendering then parsing yields the same key.
        #[test]
        fn prop_display_parse_round_trip(
            kind_idx in 0usize..6,
            owner in any::<i64>(),
            sub in proptest::option::of("[a-z0-9:]{1,16}"),
        ) {
            let kind = EntityType::ALL[kind_idx];
            let key = match sub {
                Some(s) => CacheKey::with_sub_key(kind, owner, s),
                None => CacheKey::new(kind, owner),
            };
            let parsed = CacheKey::parse(&key.to_string()).expect("parse");
            prop_assert_eq!(parsed, key);
        }

        /// The owner survives binary encoding.
        #[test]
        fn prop_encoded_owner(kind_idx in 0usize..6, owner in any::<i64>()) {
            let key = CacheKey::new(EntityType::ALL[kind_idx], owner);
            prop_assert_eq!(CacheKey::owner_of_encoded(&key.encode()), Some(owner));
        }
    }
}
