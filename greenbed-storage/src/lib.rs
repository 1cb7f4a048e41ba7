//! Greenbed Storage - Store Adapter, Record Mapper, Cache and Rate Limiter
//!
//! The relational store sits behind `StoreAdapter`; entities reach it through
//! the typed `Mapper`. The TTL cache and the rate limiter own their own key
//! spaces and never share a transaction with entity mutations.

pub mod adapter;
pub mod cache;
pub mod mapper;
pub mod rate_limit;
pub mod schema;

pub use adapter::{SqliteStore, StoreAdapter};
pub use mapper::{Conditions, Mapper, OrderBy, Page, Record, Records, SaveOutcome};

// Re-export cache types for the service layer
pub use cache::{
    build_backend, CacheBackend, CacheConfig, CacheKey, CacheLookup, CacheStats, CachedEntry,
    InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError, TtlCache,
};

pub use rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiter, StoreRateLimiter};
