//! Greenbed Test Utilities
//!
//! Shared test infrastructure for the Greenbed workspace:
//! - A write-counting store double with optional fault injection
//! - Proptest generators for entities, payloads and keys
//! - Fixtures for a migrated in-memory store and seeded rows
//! - Assertions over the error taxonomy

use std::sync::atomic::{AtomicU64, Ordering};

pub use greenbed_core::{
    AttributeMap, EntityType, GreenbedError, GreenbedResult, ManualClock, NewNotification,
    NewPlant, NewReading, NewSensor, PlotType, RecordId, SensorStatus, SettingsChanges,
    StoreError, Theme, UserId, ValidationError, Value,
};
pub use greenbed_storage::{SqliteStore, StoreAdapter};

// ============================================================================
// COUNTING STORE
// ============================================================================

/// Store wrapper recording how many statements reach the inner store.
///
/// `fail_on_write(n)` makes the n-th subsequent write fail with a
/// `StoreError::Query`, which is how tests force a rollback midway through
/// a unit of work.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    queries: AtomicU64,
    executes: AtomicU64,
    inserts: AtomicU64,
    transactions: AtomicU64,
    /// Write number (1-based, across execute and insert) that should fail;
    /// zero disables fault injection.
    fail_at: AtomicU64,
}

impl<S: StoreAdapter> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            queries: AtomicU64::new(0),
            executes: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            fail_at: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Mutating statements issued: executes plus inserts.
    pub fn writes(&self) -> u64 {
        self.executes.load(Ordering::SeqCst) + self.inserts.load(Ordering::SeqCst)
    }

    pub fn transactions_begun(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Total statements of any kind.
    pub fn total(&self) -> u64 {
        self.queries() + self.writes()
    }

    pub fn reset(&self) {
        self.queries.store(0, Ordering::SeqCst);
        self.executes.store(0, Ordering::SeqCst);
        self.inserts.store(0, Ordering::SeqCst);
        self.transactions.store(0, Ordering::SeqCst);
        self.fail_at.store(0, Ordering::SeqCst);
    }

    /// Fail the `n`-th write from now on. `n` must be at least 1.
    pub fn fail_on_write(&self, n: u64) {
        self.fail_at.store(self.writes() + n, Ordering::SeqCst);
    }

    fn injected_failure(&self, write_number: u64) -> Result<(), StoreError> {
        let fail_at = self.fail_at.load(Ordering::SeqCst);
        if fail_at != 0 && write_number == fail_at {
            return Err(StoreError::Query {
                reason: format!("injected failure on write {}", write_number),
            });
        }
        Ok(())
    }
}

impl<S: StoreAdapter> StoreAdapter for CountingStore<S> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<AttributeMap>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.injected_failure(self.writes())?;
        self.inner.execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<RecordId, StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.injected_failure(self.writes())?;
        self.inner.insert(sql, params)
    }

    fn begin_transaction(&self) -> Result<bool, StoreError> {
        let begun = self.inner.begin_transaction()?;
        if begun {
            self.transactions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(begun)
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<bool, StoreError> {
        self.inner.rollback()
    }

    fn last_insert_id(&self) -> Result<RecordId, StoreError> {
        self.inner.last_insert_id()
    }

    fn in_transaction(&self) -> Result<bool, StoreError> {
        self.inner.in_transaction()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Greenbed payloads.

    use super::*;
    use greenbed_storage::CacheKey;
    use proptest::prelude::*;

    /// Generate a positive user id.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        1i64..1_000_000
    }

    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        proptest::sample::select(EntityType::ALL.to_vec())
    }

    pub fn arb_sensor_status() -> impl Strategy<Value = SensorStatus> {
        prop_oneof![
            Just(SensorStatus::Active),
            Just(SensorStatus::Inactive),
            Just(SensorStatus::Maintenance),
        ]
    }

    pub fn arb_plot_type() -> impl Strategy<Value = PlotType> {
        prop_oneof![
            Just(PlotType::Moisture),
            Just(PlotType::Temperature),
            Just(PlotType::Humidity),
        ]
    }

    pub fn arb_theme() -> impl Strategy<Value = Theme> {
        prop_oneof![Just(Theme::Light), Just(Theme::Dark)]
    }

    /// Non-blank display name.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9 -]{0,23}"
    }

    /// Sensor payload without a plant link, so it inserts into an empty store.
    pub fn arb_new_sensor() -> impl Strategy<Value = NewSensor> {
        (
            arb_name(),
            proptest::option::of("[a-z ]{1,32}"),
            proptest::option::of("[a-z0-9-]{1,16}"),
            proptest::option::of(arb_sensor_status()),
            proptest::option::of(arb_plot_type()),
        )
            .prop_map(|(name, description, location, status, plot_type)| NewSensor {
                name,
                plant_id: None,
                description,
                location,
                status,
                plot_type,
            })
    }

    /// Plant payload with a consistent moisture band.
    pub fn arb_new_plant() -> impl Strategy<Value = NewPlant> {
        (
            arb_name(),
            proptest::option::of("[A-Z][a-z]{2,12} [a-z]{3,12}"),
            0.0f64..50.0,
            0.0f64..50.0,
            proptest::option::of(1i64..30),
        )
            .prop_map(|(name, species, low, spread, watering_frequency)| NewPlant {
                name,
                species,
                min_soil_moisture: Some(low),
                max_soil_moisture: Some(low + spread),
                watering_frequency,
            })
    }

    pub fn arb_new_reading() -> impl Strategy<Value = NewReading> {
        (
            0.0f64..100.0,
            proptest::option::of(-20.0f64..50.0),
            proptest::option::of(0.0f64..100.0),
        )
            .prop_map(|(reading, temperature, humidity)| NewReading {
                reading,
                temperature,
                humidity,
            })
    }

    /// Settings changes that pass validation.
    pub fn arb_valid_settings_changes() -> impl Strategy<Value = SettingsChanges> {
        (
            proptest::option::of(any::<bool>()),
            proptest::option::of(any::<bool>()),
            proptest::option::of(60i64..=3600),
            proptest::option::of(arb_theme()),
            proptest::option::of(prop_oneof![Just("en"), Just("de"), Just("fr")]),
            proptest::option::of(prop_oneof![Just("UTC"), Just("Europe/Berlin")]),
        )
            .prop_map(
                |(email, moisture, interval, theme, language, timezone)| SettingsChanges {
                    email_notifications: email,
                    moisture_alerts: moisture,
                    update_interval: interval,
                    theme,
                    language: language.map(str::to_string),
                    timezone: timezone.map(str::to_string),
                    ..Default::default()
                },
            )
    }

    /// Untrusted attribute map mixing fillable sensor columns with columns
    /// a client must never set.
    pub fn arb_hostile_sensor_attributes() -> impl Strategy<Value = AttributeMap> {
        (
            arb_name(),
            any::<i64>(),
            any::<i64>(),
            any::<f64>().prop_filter("finite", |v| v.is_finite()),
        )
            .prop_map(|(name, id, user_id, last_reading)| {
                let mut map = AttributeMap::new();
                map.insert("name".to_string(), Value::from(name));
                map.insert("id".to_string(), Value::from(id));
                map.insert("user_id".to_string(), Value::from(user_id));
                map.insert("last_reading".to_string(), Value::from(last_reading));
                map.insert("created_at".to_string(), Value::from("1999-01-01T00:00:00Z"));
                map.insert("is_admin".to_string(), Value::from(true));
                map
            })
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (
            arb_entity_type(),
            arb_user_id(),
            proptest::option::of("[a-z0-9:]{1,16}"),
        )
            .prop_map(|(kind, owner, sub_key)| match sub_key {
                Some(sub_key) => CacheKey::with_sub_key(kind, owner, sub_key),
                None => CacheKey::new(kind, owner),
            })
    }

    /// Endpoint names as the services use them.
    pub fn arb_endpoint() -> impl Strategy<Value = String> {
        "[a-z]{3,10}\\.[a-z_]{3,12}"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use std::sync::Arc;

    /// Migrated private in-memory database.
    ///
    /// # Panics
    ///
    /// Panics if SQLite cannot open an in-memory database.
    pub fn memory_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open in-memory store");
        store.migrate().expect("apply schema");
        store
    }

    /// `memory_store` wrapped in a counting double.
    pub fn counting_store() -> Arc<CountingStore<SqliteStore>> {
        Arc::new(CountingStore::new(memory_store()))
    }

    /// Clock pinned at 2024-01-01 00:00:00 UTC.
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_epoch_2024())
    }

    /// Insert a user directly and return its id.
    pub fn seed_user(store: &dyn StoreAdapter, username: &str) -> RecordId {
        store
            .insert(
                "INSERT INTO users (username, email, password_hash, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                &[
                    Value::from(username),
                    Value::from(format!("{}@example.test", username)),
                    Value::from("$2y$10$fixture"),
                    Value::from("2024-01-01T00:00:00.000000Z"),
                ],
            )
            .expect("seed user")
    }

    /// Number of rows in `table`.
    pub fn row_count(store: &dyn StoreAdapter, table: &str) -> i64 {
        store
            .query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
            .expect("count rows")
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn moisture_sensor(name: &str) -> NewSensor {
        NewSensor {
            plot_type: Some(PlotType::Moisture),
            location: Some("bed-a".to_string()),
            ..NewSensor::named(name)
        }
    }

    pub fn basil() -> NewPlant {
        NewPlant {
            species: Some("Ocimum basilicum".to_string()),
            min_soil_moisture: Some(30.0),
            max_soil_moisture: Some(60.0),
            watering_frequency: Some(2),
            ..NewPlant::named("Basil")
        }
    }

    pub fn reading(value: f64) -> NewReading {
        NewReading {
            reading: value,
            temperature: Some(21.5),
            humidity: Some(48.0),
        }
    }

    pub fn low_battery_notification() -> NewNotification {
        NewNotification {
            kind: "low_battery".to_string(),
            message: "Sensor battery below 10%".to_string(),
            data: Some(serde_json::json!({ "battery": 8 })),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over `GreenbedResult`.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &GreenbedResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &GreenbedResult<T>) {
        match result {
            Err(GreenbedError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &GreenbedResult<T>) {
        match result {
            Err(GreenbedError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a result is an `UnknownColumn` error naming `column`.
    #[track_caller]
    pub fn assert_unknown_column<T: std::fmt::Debug>(result: &GreenbedResult<T>, column: &str) {
        match result {
            Err(GreenbedError::Validation(ValidationError::UnknownColumn { column: c, .. })) => {
                assert_eq!(c, column, "Wrong column in UnknownColumn error");
            }
            other => panic!("Expected UnknownColumn({}), got: {:?}", column, other),
        }
    }
}
