//! Limiter persisted in the `rate_limits` table.
//!
//! Survives restarts and is shared by every process using the same
//! database. Give it its own connection: a limiter entry written on a
//! connection that later rolls back a mutation would vanish with it.

use std::sync::Arc;

use chrono::DateTime;
use greenbed_core::{AttributeMapExt, Clock, RateLimitError, StoreError, Timestamp, UserId, Value};

use super::{validate_endpoint, RateLimitConfig, RateLimiter};
use crate::adapter::StoreAdapter;

/// Records the request only if the pair is still under the ceiling, so the
/// count and the insert cannot interleave with another check.
const ADMIT_SQL: &str = "INSERT INTO rate_limits (subject, endpoint, requested_at) \
     SELECT ?1, ?2, ?3 \
     WHERE (SELECT COUNT(*) FROM rate_limits \
            WHERE subject = ?1 AND endpoint = ?2 AND requested_at > ?4) < ?5";

const WINDOW_SQL: &str = "SELECT COUNT(*) AS counted, MIN(requested_at) AS oldest \
     FROM rate_limits WHERE subject = ?1 AND endpoint = ?2 AND requested_at > ?3";

const PRUNE_SQL: &str = "DELETE FROM rate_limits WHERE requested_at < ?1";

/// Store-backed sliding-window limiter. Fails closed on store errors.
pub struct StoreRateLimiter {
    store: Arc<dyn StoreAdapter>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for StoreRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

struct WindowState {
    counted: i64,
    oldest: Option<i64>,
}

impl StoreRateLimiter {
    pub fn new(store: Arc<dyn StoreAdapter>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn cutoff_millis(&self, now: Timestamp) -> i64 {
        now.timestamp_millis()
            .saturating_sub(self.config.window_millis())
    }

    fn window_state(&self, subject: UserId, endpoint: &str) -> Result<WindowState, StoreError> {
        let cutoff = self.cutoff_millis(self.clock.now());
        let rows = self.store.query(
            WINDOW_SQL,
            &[Value::from(subject), Value::from(endpoint), Value::from(cutoff)],
        )?;
        let row = rows.into_iter().next().unwrap_or_default();
        let decode = |e: greenbed_core::ValidationError| StoreError::Decode {
            column: "rate_limits".to_string(),
            reason: e.to_string(),
        };
        Ok(WindowState {
            counted: row.opt_i64("counted").map_err(decode)?.unwrap_or(0),
            oldest: row.opt_i64("oldest").map_err(decode)?,
        })
    }
}

impl RateLimiter for StoreRateLimiter {
    fn check(&self, subject: UserId, endpoint: &str) -> Result<bool, RateLimitError> {
        validate_endpoint(endpoint)?;
        if !self.config.enabled {
            return Ok(true);
        }

        let now = self.clock.now();
        let params = [
            Value::from(subject),
            Value::from(endpoint),
            Value::from(now.timestamp_millis()),
            Value::from(self.cutoff_millis(now)),
            Value::from(self.config.max_requests),
        ];
        match self.store.execute(ADMIT_SQL, &params) {
            Ok(1) => Ok(true),
            Ok(_) => {
                tracing::debug!(subject, endpoint, "Rate limit exceeded");
                Ok(false)
            }
            Err(e) => {
                tracing::error!(subject, endpoint, error = %e, "Rate limit check failed, denying request");
                Ok(false)
            }
        }
    }

    fn remaining(&self, subject: UserId, endpoint: &str) -> Result<u32, RateLimitError> {
        validate_endpoint(endpoint)?;
        if !self.config.enabled {
            return Ok(self.config.max_requests);
        }
        match self.window_state(subject, endpoint) {
            Ok(state) => {
                let used = u32::try_from(state.counted).unwrap_or(u32::MAX);
                Ok(self.config.max_requests.saturating_sub(used))
            }
            Err(e) => {
                tracing::error!(subject, endpoint, error = %e, "Rate limit lookup failed");
                Ok(0)
            }
        }
    }

    fn reset_time(&self, subject: UserId, endpoint: &str) -> Result<Timestamp, RateLimitError> {
        validate_endpoint(endpoint)?;
        let now = self.clock.now();
        if !self.config.enabled {
            return Ok(now);
        }
        let window = self.config.window_millis();
        match self.window_state(subject, endpoint) {
            Ok(state) => Ok(state
                .oldest
                .and_then(|t| t.checked_add(window))
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or(now)),
            Err(e) => {
                // Denied callers are told to wait out a whole window.
                tracing::error!(subject, endpoint, error = %e, "Rate limit lookup failed");
                Ok(now
                    .timestamp_millis()
                    .checked_add(window)
                    .and_then(DateTime::from_timestamp_millis)
                    .unwrap_or(now))
            }
        }
    }

    fn prune(&self, older_than: Timestamp) -> Result<u64, RateLimitError> {
        let removed = self
            .store
            .execute(PRUNE_SQL, &[Value::from(older_than.timestamp_millis())])?;
        Ok(removed)
    }

    fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteStore;
    use greenbed_core::{ManualClock, RecordId};
    use std::time::Duration;

    fn limiter(max: u32) -> (StoreRateLimiter, Arc<SqliteStore>, Arc<ManualClock>) {
        let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
        store.migrate().expect("migrate");
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let limiter = StoreRateLimiter::new(
            store.clone(),
            clock.clone(),
            RateLimitConfig::new(max, Duration::from_secs(60)),
        );
        (limiter, store, clock)
    }

    fn row_count(store: &SqliteStore) -> i64 {
        store
            .query("SELECT COUNT(*) AS n FROM rate_limits", &[])
            .expect("count")[0]
            .req_i64("n")
            .expect("n")
    }

    /// Store whose every call fails.
    struct DownStore;

    impl StoreAdapter for DownStore {
        fn query(&self, _: &str, _: &[Value]) -> Result<Vec<greenbed_core::AttributeMap>, StoreError> {
            Err(StoreError::Busy { reason: "locked".to_string() })
        }
        fn execute(&self, _: &str, _: &[Value]) -> Result<u64, StoreError> {
            Err(StoreError::Busy { reason: "locked".to_string() })
        }
        fn insert(&self, _: &str, _: &[Value]) -> Result<RecordId, StoreError> {
            Err(StoreError::Busy { reason: "locked".to_string() })
        }
        fn begin_transaction(&self) -> Result<bool, StoreError> {
            Ok(true)
        }
        fn commit(&self) -> Result<(), StoreError> {
            Ok(())
        }
        fn rollback(&self) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn last_insert_id(&self) -> Result<RecordId, StoreError> {
            Ok(0)
        }
        fn in_transaction(&self) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[test]
    fn test_three_per_minute() {
        let (limiter, store, _) = limiter(3);
        assert!(limiter.check(42, "sensors.create").expect("check"));
        assert!(limiter.check(42, "sensors.create").expect("check"));
        assert!(limiter.check(42, "sensors.create").expect("check"));
        assert!(!limiter.check(42, "sensors.create").expect("check"));
        assert_eq!(row_count(&store), 3);
        assert!(limiter.check(42, "plants.create").expect("other endpoint"));
        assert!(limiter.check(43, "sensors.create").expect("other subject"));
    }

    #[test]
    fn test_remaining_and_reset_time() {
        let (limiter, _, clock) = limiter(3);
        let start = clock.now();
        assert_eq!(limiter.remaining(1, "e").expect("remaining"), 3);
        assert_eq!(limiter.reset_time(1, "e").expect("reset"), start);

        limiter.check(1, "e").expect("check");
        clock.advance(Duration::from_secs(5));
        limiter.check(1, "e").expect("check");
        assert_eq!(limiter.remaining(1, "e").expect("remaining"), 1);
        assert_eq!(
            limiter.reset_time(1, "e").expect("reset"),
            start + chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn test_window_expiry_readmits() {
        let (limiter, _, clock) = limiter(1);
        assert!(limiter.check(1, "e").expect("check"));
        assert!(!limiter.check(1, "e").expect("check"));
        clock.advance(Duration::from_secs(60));
        assert!(limiter.check(1, "e").expect("check"));
    }

    #[test]
    fn test_prune() {
        let (limiter, store, clock) = limiter(10);
        limiter.check(1, "e").expect("check");
        clock.advance(Duration::from_secs(3600));
        limiter.check(1, "e").expect("check");
        let removed = limiter
            .prune(clock.now() - chrono::Duration::seconds(60))
            .expect("prune");
        assert_eq!(removed, 1);
        assert_eq!(row_count(&store), 1);
    }

    #[test]
    fn test_store_failure_fails_closed() {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let limiter = StoreRateLimiter::new(
            Arc::new(DownStore),
            clock.clone(),
            RateLimitConfig::new(10, Duration::from_secs(60)),
        );
        assert!(!limiter.check(1, "e").expect("check"));
        assert_eq!(limiter.remaining(1, "e").expect("remaining"), 0);
        assert_eq!(
            limiter.reset_time(1, "e").expect("reset"),
            clock.now() + chrono::Duration::seconds(60)
        );
        assert!(matches!(
            limiter.prune(clock.now()),
            Err(RateLimitError::Store(StoreError::Busy { .. }))
        ));
    }

    #[test]
    fn test_empty_endpoint_is_invalid() {
        let (limiter, _, _) = limiter(3);
        assert!(matches!(
            limiter.check(1, ""),
            Err(RateLimitError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_separate_connections_share_one_ceiling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("limits.db");
        let timeout = Duration::from_secs(10);
        SqliteStore::open(&path, timeout)
            .expect("open")
            .migrate()
            .expect("migrate");
        let clock = Arc::new(ManualClock::at_epoch_2024());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store: Arc<dyn StoreAdapter> =
                    Arc::new(SqliteStore::open(&path, timeout).expect("open"));
                let limiter = StoreRateLimiter::new(
                    store,
                    clock.clone(),
                    RateLimitConfig::new(20, Duration::from_secs(60)),
                );
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check(42, "readings.add").expect("check"))
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .sum();
        assert_eq!(admitted, 20);

        let store = SqliteStore::open(&path, timeout).expect("open");
        assert_eq!(row_count(&store), 20);
    }
}
