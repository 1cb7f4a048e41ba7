//! Reading Service
//!
//! Readings are append-only samples. Adding one also stamps the sensor's
//! `last_reading` in the same transaction, so the sensor list and the
//! reading history never disagree.
//!
//! Date-range queries back the dashboard charts. They are not cached: their
//! bounds are arbitrary, so entries would rarely be hit twice.

use std::sync::Arc;

use greenbed_core::{
    attributes, EntityType, NewReading, Reading, RecordId, Sensor, Timestamp, UserId,
};
use greenbed_storage::{CacheKey, Conditions, OrderBy};

use super::{collect_records, find_owned};
use crate::auth::AuthContext;
use crate::constants::{
    MAX_BATCH_READINGS, READINGS_ADD, READINGS_ADD_BATCH, READINGS_DELETE, RECENT_READINGS_LIMIT,
};
use crate::context::ServiceContext;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::orchestrator::{MutationOrchestrator, UnitOfWork};
use crate::validation::ValidatePayload;

#[derive(Debug, Clone)]
pub struct ReadingService {
    orchestrator: MutationOrchestrator,
}

fn validate_batch(samples: &[NewReading]) -> ApiResult<()> {
    if samples.is_empty() {
        return Err(ApiError::missing_field("readings"));
    }
    if samples.len() > MAX_BATCH_READINGS {
        return Err(ApiError::invalid_range("readings", 1, MAX_BATCH_READINGS));
    }
    for (index, sample) in samples.iter().enumerate() {
        sample.validate().map_err(|mut e| {
            e.message = format!("readings[{}]: {}", index, e.message);
            e
        })?;
    }
    Ok(())
}

fn validate_window(from: Timestamp, to: Timestamp) -> ApiResult<()> {
    if from > to {
        return Err(ApiError::new(
            ErrorCode::InvalidRange,
            "Range start must not be after its end",
        ));
    }
    Ok(())
}

fn in_window(sensor_id: RecordId, from: Timestamp, to: Timestamp) -> Conditions {
    Conditions::new()
        .eq("sensor_id", sensor_id)
        .between("created_at", from, to)
}

/// Insert one sample for `sensor_id`, owned by the unit's owner.
fn insert_sample(
    uow: &UnitOfWork<'_>,
    sensor_id: RecordId,
    sample: NewReading,
) -> ApiResult<Reading> {
    let record = uow.mapper::<Reading>().create_from(
        sample,
        attributes! {
            "user_id" => uow.owner(),
            "sensor_id" => sensor_id,
        },
    )?;
    Ok(record.entity()?)
}

impl ReadingService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            orchestrator: MutationOrchestrator::new(ctx),
        }
    }

    fn ctx(&self) -> &ServiceContext {
        self.orchestrator.context()
    }

    /// Most recent readings of one sensor, newest first, cached as
    /// `readings:<owner>:<sensor-id>`.
    pub fn list_for_sensor(&self, auth: &AuthContext, sensor_id: RecordId) -> ApiResult<Vec<Reading>> {
        let owner = auth.require_user()?;
        let key = CacheKey::with_sub_key(EntityType::Reading, owner, sensor_id.to_string());
        self.ctx()
            .cached(&key, |ctx| load_readings(ctx, owner, sensor_id))
    }

    /// Record a sample for `sensor_id` and update the sensor's last reading.
    pub fn add(
        &self,
        auth: &AuthContext,
        sensor_id: RecordId,
        reading: NewReading,
    ) -> ApiResult<Reading> {
        self.orchestrator
            .run(auth, READINGS_ADD, reading, NewReading::validate, |uow, reading| {
                let sensors = uow.mapper::<Sensor>();
                let mut sensor = find_owned(&sensors, sensor_id, uow.owner())?;

                let created = insert_sample(uow, sensor_id, reading)?;
                sensor.set("last_reading", created.reading)?;
                sensor.set("last_reading_at", created.created_at)?;
                sensors.save(&mut sensor)?;

                uow.invalidate(EntityType::Reading);
                uow.invalidate(EntityType::Sensor);
                tracing::debug!(owner = uow.owner(), sensor_id, reading = created.reading, "Reading recorded");
                Ok(created)
            })
    }

    /// Record several samples for `sensor_id` as one unit. Every sample is
    /// validated before anything is written; the sensor's last reading is
    /// taken from the final sample.
    pub fn add_batch(
        &self,
        auth: &AuthContext,
        sensor_id: RecordId,
        samples: Vec<NewReading>,
    ) -> ApiResult<Vec<Reading>> {
        self.orchestrator
            .run(auth, READINGS_ADD_BATCH, samples, |s| validate_batch(s), |uow, samples| {
                let sensors = uow.mapper::<Sensor>();
                let mut sensor = find_owned(&sensors, sensor_id, uow.owner())?;

                let created = samples
                    .into_iter()
                    .map(|sample| insert_sample(uow, sensor_id, sample))
                    .collect::<ApiResult<Vec<_>>>()?;
                if let Some(newest) = created.last() {
                    sensor.set("last_reading", newest.reading)?;
                    sensor.set("last_reading_at", newest.created_at)?;
                    sensors.save(&mut sensor)?;
                }

                uow.invalidate(EntityType::Reading);
                uow.invalidate(EntityType::Sensor);
                tracing::debug!(owner = uow.owner(), sensor_id, count = created.len(), "Reading batch recorded");
                Ok(created)
            })
    }

    /// Readings of one sensor with `from <= created_at <= to`, oldest first.
    pub fn range(
        &self,
        auth: &AuthContext,
        sensor_id: RecordId,
        from: Timestamp,
        to: Timestamp,
    ) -> ApiResult<Vec<Reading>> {
        let owner = auth.require_user()?;
        validate_window(from, to)?;
        self.ctx().read(|ctx| {
            find_owned(&ctx.mapper::<Sensor>(), sensor_id, owner)?;
            collect_records(ctx.mapper::<Reading>().all(
                &in_window(sensor_id, from, to),
                Some(&OrderBy::asc("created_at")),
            )?)
        })
    }

    /// Mean reading of one sensor over `from..=to`. `None` when the window
    /// holds no readings.
    pub fn average(
        &self,
        auth: &AuthContext,
        sensor_id: RecordId,
        from: Timestamp,
        to: Timestamp,
    ) -> ApiResult<Option<f64>> {
        let owner = auth.require_user()?;
        validate_window(from, to)?;
        self.ctx().read(|ctx| {
            find_owned(&ctx.mapper::<Sensor>(), sensor_id, owner)?;
            Ok(ctx
                .mapper::<Reading>()
                .average("reading", &in_window(sensor_id, from, to))?)
        })
    }

    pub fn delete(&self, auth: &AuthContext, id: RecordId) -> ApiResult<()> {
        self.orchestrator
            .run(auth, READINGS_DELETE, id, |_| Ok(()), |uow, id| {
                let mapper = uow.mapper::<Reading>();
                find_owned(&mapper, id, uow.owner())?;
                mapper.delete(id)?;
                uow.invalidate(EntityType::Reading);
                Ok(())
            })
    }
}

fn load_readings(ctx: &ServiceContext, owner: UserId, sensor_id: RecordId) -> ApiResult<Vec<Reading>> {
    // An unknown or foreign sensor reads as NotFound, not as an empty history.
    find_owned(&ctx.mapper::<Sensor>(), sensor_id, owner)?;
    let page = ctx.mapper::<Reading>().paginate(
        &Conditions::new().eq("sensor_id", sensor_id),
        Some(&OrderBy::desc("created_at")),
        1,
        RECENT_READINGS_LIMIT,
    )?;
    Ok(page.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbed_core::{Clock, GreenbedConfig, ManualClock, NewSensor};
    use std::time::Duration;

    struct Fixture {
        readings: ReadingService,
        clock: Arc<ManualClock>,
        sensor_id: RecordId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let config = GreenbedConfig::default().with_database_path(":memory:");
        let ctx = Arc::new(
            ServiceContext::from_config_with_clock(&config, clock.clone()).expect("context"),
        );
        let sensor_id = ctx
            .mapper::<Sensor>()
            .create_from(NewSensor::named("bed-1"), attributes! { "user_id" => 42 })
            .expect("sensor")
            .id()
            .expect("id");
        Fixture {
            readings: ReadingService::new(ctx),
            clock,
            sensor_id,
        }
    }

    fn sample(value: f64) -> NewReading {
        NewReading {
            reading: value,
            temperature: Some(19.5),
            humidity: None,
        }
    }

    #[test]
    fn test_add_updates_sensor_last_reading() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        let created = f.readings.add(&auth, f.sensor_id, sample(41.0)).expect("add");
        assert_eq!(created.sensor_id, f.sensor_id);

        let sensor = f
            .readings
            .ctx()
            .mapper::<Sensor>()
            .find_entity(f.sensor_id)
            .expect("find")
            .expect("sensor");
        assert_eq!(sensor.last_reading, Some(41.0));
        assert_eq!(sensor.last_reading_at, created.created_at);
    }

    #[test]
    fn test_list_is_newest_first() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        f.readings.add(&auth, f.sensor_id, sample(10.0)).expect("add");
        f.clock.advance(Duration::from_secs(60));
        f.readings.add(&auth, f.sensor_id, sample(20.0)).expect("add");

        let values: Vec<f64> = f
            .readings
            .list_for_sensor(&auth, f.sensor_id)
            .expect("list")
            .iter()
            .map(|r| r.reading)
            .collect();
        assert_eq!(values, vec![20.0, 10.0]);
    }

    #[test]
    fn test_add_invalidates_cached_history() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        assert!(f.readings.list_for_sensor(&auth, f.sensor_id).expect("list").is_empty());
        f.readings.add(&auth, f.sensor_id, sample(10.0)).expect("add");
        assert_eq!(f.readings.list_for_sensor(&auth, f.sensor_id).expect("list").len(), 1);
    }

    #[test]
    fn test_foreign_sensor_is_rejected() {
        let f = fixture();
        let intruder = AuthContext::authenticated(7);
        assert_eq!(
            f.readings.add(&intruder, f.sensor_id, sample(1.0)).unwrap_err().code,
            ErrorCode::EntityNotFound
        );
        assert_eq!(
            f.readings.list_for_sensor(&intruder, f.sensor_id).unwrap_err().code,
            ErrorCode::EntityNotFound
        );
    }

    #[test]
    fn test_nan_reading_is_rejected() {
        let f = fixture();
        let err = f
            .readings
            .add(&AuthContext::authenticated(42), f.sensor_id, sample(f64::NAN))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    fn sensor(f: &Fixture) -> Sensor {
        f.readings
            .ctx()
            .mapper::<Sensor>()
            .find_entity(f.sensor_id)
            .expect("find")
            .expect("sensor")
    }

    #[test]
    fn test_range_is_inclusive_and_oldest_first() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        let mut stamps = Vec::new();
        for value in [10.0, 20.0, 30.0] {
            stamps.push(f.clock.now());
            f.readings.add(&auth, f.sensor_id, sample(value)).expect("add");
            f.clock.advance(Duration::from_secs(600));
        }

        let values: Vec<f64> = f
            .readings
            .range(&auth, f.sensor_id, stamps[1], stamps[2])
            .expect("range")
            .iter()
            .map(|r| r.reading)
            .collect();
        assert_eq!(values, vec![20.0, 30.0]);

        assert_eq!(
            f.readings
                .average(&auth, f.sensor_id, stamps[0], stamps[2])
                .expect("average"),
            Some(20.0)
        );
    }

    #[test]
    fn test_empty_window_has_no_average() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        f.readings.add(&auth, f.sensor_id, sample(10.0)).expect("add");

        let from = f.clock.now() + chrono::Duration::hours(1);
        let to = from + chrono::Duration::hours(1);
        assert!(f.readings.range(&auth, f.sensor_id, from, to).expect("range").is_empty());
        assert_eq!(f.readings.average(&auth, f.sensor_id, from, to).expect("average"), None);
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        let now = f.clock.now();
        let err = f
            .readings
            .range(&auth, f.sensor_id, now, now - chrono::Duration::seconds(1))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRange);
        assert_eq!(
            f.readings
                .average(&AuthContext::authenticated(7), f.sensor_id, now, now)
                .unwrap_err()
                .code,
            ErrorCode::EntityNotFound
        );
    }

    #[test]
    fn test_batch_stamps_last_sample() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        let created = f
            .readings
            .add_batch(&auth, f.sensor_id, vec![sample(11.0), sample(12.0), sample(13.0)])
            .expect("batch");
        assert_eq!(created.len(), 3);
        assert!(created.iter().all(|r| r.sensor_id == f.sensor_id && r.user_id == 42));
        assert_eq!(sensor(&f).last_reading, Some(13.0));
        assert_eq!(f.readings.list_for_sensor(&auth, f.sensor_id).expect("list").len(), 3);
    }

    #[test]
    fn test_batch_with_invalid_sample_writes_nothing() {
        let f = fixture();
        let auth = AuthContext::authenticated(42);
        let mut bad = sample(12.0);
        bad.humidity = Some(140.0);

        let err = f
            .readings
            .add_batch(&auth, f.sensor_id, vec![sample(11.0), bad, sample(13.0)])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRange);
        assert!(err.message.starts_with("readings[1]"));
        assert!(f.readings.list_for_sensor(&auth, f.sensor_id).expect("list").is_empty());
        assert_eq!(sensor(&f).last_reading, None);

        assert_eq!(
            f.readings.add_batch(&auth, f.sensor_id, Vec::new()).unwrap_err().code,
            ErrorCode::MissingField
        );
    }
}
