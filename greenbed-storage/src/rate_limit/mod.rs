//! Sliding-window rate limiting keyed by `(subject, endpoint)`.
//!
//! A request is admitted when fewer than `max_requests` admitted requests of
//! the same pair fall inside the trailing window `(now - window, now]`.
//! Checking and recording happen as one atomic step in every backend, so
//! concurrent checks can never admit more than the ceiling.

pub mod memory;
pub mod store;

use std::time::Duration;

use greenbed_core::{GreenbedConfig, RateLimitError, Timestamp, UserId};

pub use memory::InMemoryRateLimiter;
pub use store::StoreRateLimiter;

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// When false every check is admitted and nothing is recorded.
    pub enabled: bool,
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            enabled: true,
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &GreenbedConfig) -> Self {
        Self {
            enabled: config.rate_limit_enabled,
            max_requests: config.rate_limit_requests,
            window: config.rate_limit_window,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Rate limiter contract shared by the in-memory and store-backed limiters.
pub trait RateLimiter: Send + Sync {
    /// Admit or deny one request, recording it when admitted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty endpoint.
    fn check(&self, subject: UserId, endpoint: &str) -> Result<bool, RateLimitError>;

    /// Requests still admissible in the current window. Records nothing.
    fn remaining(&self, subject: UserId, endpoint: &str) -> Result<u32, RateLimitError>;

    /// Instant at which the oldest counted request leaves the window, or
    /// now when nothing is counted.
    fn reset_time(&self, subject: UserId, endpoint: &str) -> Result<Timestamp, RateLimitError>;

    /// Drop recorded requests older than `older_than`. Returns how many were
    /// removed.
    fn prune(&self, older_than: Timestamp) -> Result<u64, RateLimitError>;

    fn config(&self) -> &RateLimitConfig;
}

impl<L: RateLimiter + ?Sized> RateLimiter for std::sync::Arc<L> {
    fn check(&self, subject: UserId, endpoint: &str) -> Result<bool, RateLimitError> {
        (**self).check(subject, endpoint)
    }

    fn remaining(&self, subject: UserId, endpoint: &str) -> Result<u32, RateLimitError> {
        (**self).remaining(subject, endpoint)
    }

    fn reset_time(&self, subject: UserId, endpoint: &str) -> Result<Timestamp, RateLimitError> {
        (**self).reset_time(subject, endpoint)
    }

    fn prune(&self, older_than: Timestamp) -> Result<u64, RateLimitError> {
        (**self).prune(older_than)
    }

    fn config(&self) -> &RateLimitConfig {
        (**self).config()
    }
}

pub(crate) fn validate_endpoint(endpoint: &str) -> Result<(), RateLimitError> {
    if endpoint.trim().is_empty() {
        return Err(RateLimitError::InvalidArgument {
            reason: "endpoint must not be empty".to_string(),
        });
    }
    Ok(())
}
