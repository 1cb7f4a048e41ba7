//! Error types for Greenbed operations

use thiserror::Error;

/// Relational store errors.
///
/// Every variant is fatal for the unit of work that produced it: the
/// surrounding transaction is rolled back and no cache invalidation runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {reason}")]
    Connection { path: String, reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    #[error("Store busy: {reason}")]
    Busy { reason: String },

    #[error("Commit requested without an active transaction")]
    NoActiveTransaction,

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Row decode failed for column {column}: {reason}")]
    Decode { column: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
///
/// Raised before any store or cache access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Value for {field} out of range: {value} not in {min}..={max}")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Field {field} cannot change once persisted")]
    ImmutableField { field: String },
}

/// Cache errors.
///
/// Only `InvalidArgument` is surfaced to callers of the read path; backend
/// failures degrade to a cache miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid cache argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Cache backend failure: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Rate limiter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Invalid rate limit argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Rate limit store failed: {0}")]
    Store(#[from] StoreError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Greenbed errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GreenbedError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Greenbed operations.
pub type GreenbedResult<T> = Result<T, GreenbedError>;

// =============================================================================
// TESTS
// =============================================================================
