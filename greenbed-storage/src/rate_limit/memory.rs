//! Process-local sliding-window limiter.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use greenbed_core::{Clock, RateLimitError, Timestamp, UserId};

use super::{validate_endpoint, RateLimitConfig, RateLimiter};

type WindowKey = (UserId, String);

/// Limiter keeping admitted request times per `(subject, endpoint)`.
///
/// Each pair's window lives in one DashMap shard entry; holding the entry
/// guard makes count-then-record a single step.
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: DashMap<WindowKey, VecDeque<i64>>,
}

impl std::fmt::Debug for InMemoryRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimiter")
            .field("config", &self.config)
            .field("tracked_pairs", &self.windows.len())
            .finish()
    }
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: DashMap::new(),
        }
    }

    /// Window start in epoch millis; requests at or before it are not counted.
    fn cutoff(&self, now: Timestamp) -> i64 {
        now.timestamp_millis()
            .saturating_sub(self.config.window_millis())
    }

    /// Counted request times for a pair, oldest first, without mutating.
    fn counted(&self, subject: UserId, endpoint: &str) -> Vec<i64> {
        let cutoff = self.cutoff(self.clock.now());
        self.windows
            .get(&(subject, endpoint.to_string()))
            .map(|window| window.iter().copied().filter(|t| *t > cutoff).collect())
            .unwrap_or_default()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, subject: UserId, endpoint: &str) -> Result<bool, RateLimitError> {
        validate_endpoint(endpoint)?;
        if !self.config.enabled {
            return Ok(true);
        }

        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let mut window = self
            .windows
            .entry((subject, endpoint.to_string()))
            .or_default();
        window.retain(|t| *t > cutoff);

        if window.len() < self.config.max_requests as usize {
            window.push_back(now.timestamp_millis());
            Ok(true)
        } else {
            tracing::debug!(subject, endpoint, "Rate limit exceeded");
            Ok(false)
        }
    }

    fn remaining(&self, subject: UserId, endpoint: &str) -> Result<u32, RateLimitError> {
        validate_endpoint(endpoint)?;
        if !self.config.enabled {
            return Ok(self.config.max_requests);
        }
        let used = u32::try_from(self.counted(subject, endpoint).len()).unwrap_or(u32::MAX);
        Ok(self.config.max_requests.saturating_sub(used))
    }

    fn reset_time(&self, subject: UserId, endpoint: &str) -> Result<Timestamp, RateLimitError> {
        validate_endpoint(endpoint)?;
        let now = self.clock.now();
        if !self.config.enabled {
            return Ok(now);
        }
        let oldest = self.counted(subject, endpoint).into_iter().min();
        Ok(oldest
            .and_then(|t| {
                t.checked_add(self.config.window_millis())
                    .and_then(chrono::DateTime::from_timestamp_millis)
            })
            .unwrap_or(now))
    }

    fn prune(&self, older_than: Timestamp) -> Result<u64, RateLimitError> {
        let cutoff = older_than.timestamp_millis();
        let mut removed = 0u64;
        self.windows.retain(|_, window| {
            let before = window.len();
            window.retain(|t| *t >= cutoff);
            removed += (before - window.len()) as u64;
            !window.is_empty()
        });
        Ok(removed)
    }

    fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbed_core::ManualClock;
    use std::time::Duration;

    fn limiter(max: u32) -> (InMemoryRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let limiter =
            InMemoryRateLimiter::new(RateLimitConfig::new(max, Duration::from_secs(60)), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_ceiling_then_deny() {
        let (limiter, _) = limiter(3);
        for _ in 0..3 {
            assert!(limiter.check(7, "readings.add").expect("check"));
        }
        assert!(!limiter.check(7, "readings.add").expect("check"));
        assert_eq!(limiter.remaining(7, "readings.add").expect("remaining"), 0);
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.check(1, "e").expect("check"));
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check(1, "e").expect("check"));
        assert!(!limiter.check(1, "e").expect("check"));

        // The first request leaves the window exactly 60s after it was made.
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check(1, "e").expect("check"));
    }

    #[test]
    fn test_denied_requests_are_not_recorded() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.check(1, "e").expect("check"));
        clock.advance(Duration::from_secs(59));
        assert!(!limiter.check(1, "e").expect("check"));
        clock.advance(Duration::from_secs(1));
        assert!(limiter.check(1, "e").expect("check"));
    }

    #[test]
    fn test_reset_time() {
        let (limiter, clock) = limiter(3);
        let start = clock.now();
        assert_eq!(limiter.reset_time(1, "e").expect("reset"), start);
        limiter.check(1, "e").expect("check");
        clock.advance(Duration::from_secs(10));
        limiter.check(1, "e").expect("check");
        assert_eq!(
            limiter.reset_time(1, "e").expect("reset"),
            start + chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn test_disabled_admits_everything() {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let limiter = InMemoryRateLimiter::new(
            RateLimitConfig::new(1, Duration::from_secs(60)).with_enabled(false),
            clock,
        );
        for _ in 0..10 {
            assert!(limiter.check(1, "e").expect("check"));
        }
        assert_eq!(limiter.remaining(1, "e").expect("remaining"), 1);
    }

    #[test]
    fn test_prune_drops_old_entries_and_empty_pairs() {
        let (limiter, clock) = limiter(10);
        let start = clock.now();
        limiter.check(1, "a").expect("check");
        limiter.check(2, "b").expect("check");
        clock.advance(Duration::from_secs(30));
        limiter.check(2, "b").expect("check");
        let removed = limiter
            .prune(start + chrono::Duration::seconds(20))
            .expect("prune");
        assert_eq!(removed, 2);
        assert_eq!(limiter.windows.len(), 1);
        assert_eq!(limiter.remaining(2, "b").expect("remaining"), 9);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_ceiling() {
        let (limiter, _) = limiter(25);
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check(3, "plants.create").unwrap_or(false))
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .sum();
        assert_eq!(admitted, 25);
    }
}
