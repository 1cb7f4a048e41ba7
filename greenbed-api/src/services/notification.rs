//! Notification Service
//!
//! Notifications are cached under several sub-keys (unread counter, one
//! entry per list page), so every mutation drops the whole
//! `notifications:<owner>` family rather than guessing which pages moved.
//!
//! Alert checks compare each plant-linked sensor against its plant's soil
//! moisture bounds and a fixed temperature band, and raise one notification
//! per sensor and kind per hour at most.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use greenbed_core::{
    attributes, chrono_duration, AttributeMap, EntityType, NewNotification, Notification, Plant,
    Reading, RecordId, Sensor, Timestamp, UserId, UserSettings, Value,
};
use greenbed_storage::{CacheKey, Conditions, OrderBy, Page};

use super::{collect_records, find_owned};
use crate::auth::AuthContext;
use crate::constants::{
    ALERTS_CHECK, ALERT_DEDUP_WINDOW_SECS, DEFAULT_PAGE_SIZE, LIST_SUB_KEY, MAX_PAGE_SIZE,
    MAX_TEMPERATURE, MIN_TEMPERATURE, MOISTURE_ALERT, NOTIFICATIONS_CREATE, NOTIFICATIONS_DELETE,
    NOTIFICATIONS_MARK_ALL_READ, NOTIFICATIONS_MARK_READ, TEMPERATURE_ALERT, UNREAD_SUB_KEY,
};
use crate::context::ServiceContext;
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::{MutationOrchestrator, UnitOfWork};
use crate::validation::{ValidateNonEmpty, ValidateRange};

#[derive(Debug, Clone)]
pub struct NotificationService {
    orchestrator: MutationOrchestrator,
}

fn validate_new(notification: &NewNotification) -> ApiResult<()> {
    notification.kind.validate_non_empty("kind")?;
    notification.message.validate_non_empty("message")?;
    if notification.kind.len() > 64 {
        return Err(ApiError::invalid_input("Field 'kind' must be at most 64 characters"));
    }
    Ok(())
}

fn unread(owner: UserId) -> Conditions {
    Conditions::new()
        .eq("user_id", owner)
        .eq("read_at", Value::Null)
}

// ============================================================================
// ALERT RULES
// ============================================================================

/// Which side of an acceptable band a value fell on.
fn breach(value: f64, min: Option<f64>, max: Option<f64>) -> Option<&'static str> {
    match (min, max) {
        (Some(min), _) if value < min => Some("low"),
        (_, Some(max)) if value > max => Some("high"),
        _ => None,
    }
}

/// `(kind, sensor_id)` pairs alerted on since `since`.
fn recent_alerts(
    uow: &UnitOfWork<'_>,
    since: Timestamp,
) -> ApiResult<BTreeSet<(String, RecordId)>> {
    let recent = collect_records(uow.mapper::<Notification>().all(
        &Conditions::new()
            .eq("user_id", uow.owner())
            .after("created_at", since),
        None,
    )?)?;
    Ok(recent
        .into_iter()
        .filter_map(|n| {
            let data: serde_json::Value = serde_json::from_str(n.data.as_deref()?).ok()?;
            let sensor_id = data.get("sensor_id")?.as_i64()?;
            Some((n.kind, sensor_id))
        })
        .collect())
}

/// Temperature of the newest reading of `sensor_id`, if it carried one.
fn latest_temperature(uow: &UnitOfWork<'_>, sensor_id: RecordId) -> ApiResult<Option<f64>> {
    let page = uow.mapper::<Reading>().paginate(
        &Conditions::new().eq("sensor_id", sensor_id),
        Some(&OrderBy::desc("created_at")),
        1,
        1,
    )?;
    Ok(page.items.first().and_then(|r| r.temperature))
}

fn moisture_alert(sensor: &Sensor, plant: &Plant, reading: f64) -> Option<NewNotification> {
    let status = breach(reading, plant.min_soil_moisture, plant.max_soil_moisture)?;
    Some(NewNotification {
        kind: MOISTURE_ALERT.to_string(),
        message: format!(
            "Moisture {} alert for sensor {} on plant {}",
            status, sensor.name, plant.name
        ),
        data: Some(serde_json::json!({
            "sensor_id": sensor.id,
            "reading": reading,
            "min": plant.min_soil_moisture,
            "max": plant.max_soil_moisture,
        })),
    })
}

fn temperature_alert(sensor: &Sensor, plant: &Plant, temperature: f64) -> Option<NewNotification> {
    let status = breach(temperature, Some(MIN_TEMPERATURE), Some(MAX_TEMPERATURE))?;
    Some(NewNotification {
        kind: TEMPERATURE_ALERT.to_string(),
        message: format!(
            "Temperature {} alert for sensor {} on plant {}",
            status, sensor.name, plant.name
        ),
        data: Some(serde_json::json!({
            "sensor_id": sensor.id,
            "temperature": temperature,
        })),
    })
}

/// Evaluate the enabled alert rules for the unit's owner and insert the
/// resulting notifications.
fn raise_alerts(uow: &mut UnitOfWork<'_>) -> ApiResult<Vec<Notification>> {
    let owner = uow.owner();
    let settings = match uow.mapper::<UserSettings>().find_by("user_id", owner)? {
        Some(record) => record.entity()?,
        None => UserSettings::defaults(owner),
    };
    if !settings.moisture_alerts && !settings.temperature_alerts {
        return Ok(Vec::new());
    }

    let plants: HashMap<RecordId, Plant> =
        collect_records(uow.mapper::<Plant>().all(&Conditions::new().eq("user_id", owner), None)?)?
            .into_iter()
            .filter_map(|plant| Some((plant.id?, plant)))
            .collect();
    let sensors = collect_records(uow.mapper::<Sensor>().all(
        &Conditions::new().eq("user_id", owner),
        Some(&OrderBy::asc("name")),
    )?)?;

    let window = chrono_duration(Duration::from_secs(ALERT_DEDUP_WINDOW_SECS));
    let since = uow.now() - window;
    let mut alerted = recent_alerts(uow, since)?;

    let mut raised = Vec::new();
    for sensor in &sensors {
        let (Some(sensor_id), Some(reading)) = (sensor.id, sensor.last_reading) else {
            continue;
        };
        let Some(plant) = sensor.plant_id.and_then(|id| plants.get(&id)) else {
            continue;
        };

        let mut candidates = Vec::new();
        if settings.moisture_alerts {
            candidates.extend(moisture_alert(sensor, plant, reading));
        }
        if settings.temperature_alerts {
            if let Some(temperature) = latest_temperature(uow, sensor_id)? {
                candidates.extend(temperature_alert(sensor, plant, temperature));
            }
        }

        for alert in candidates {
            if !alerted.insert((alert.kind.clone(), sensor_id)) {
                continue;
            }
            let record = uow
                .mapper::<Notification>()
                .create_from(alert, attributes! { "user_id" => owner })?;
            raised.push(record.entity()?);
        }
    }

    if !raised.is_empty() {
        uow.invalidate(EntityType::Notification);
        tracing::info!(owner, raised = raised.len(), "Alerts raised");
    }
    Ok(raised)
}

impl NotificationService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            orchestrator: MutationOrchestrator::new(ctx),
        }
    }

    fn ctx(&self) -> &ServiceContext {
        self.orchestrator.context()
    }

    /// Notify the caller.
    pub fn create(
        &self,
        auth: &AuthContext,
        notification: NewNotification,
    ) -> ApiResult<Notification> {
        self.orchestrator.run(
            auth,
            NOTIFICATIONS_CREATE,
            notification,
            validate_new,
            |uow, notification| {
                let owner = uow.owner();
                let record = uow
                    .mapper::<Notification>()
                    .create_from(notification, attributes! { "user_id" => owner })?;
                uow.invalidate(EntityType::Notification);
                Ok(record.entity()?)
            },
        )
    }

    /// Mark one notification read. Already-read notifications keep their
    /// original `read_at` and cause no write.
    pub fn mark_read(&self, auth: &AuthContext, id: RecordId) -> ApiResult<Notification> {
        self.orchestrator
            .run(auth, NOTIFICATIONS_MARK_READ, id, |_| Ok(()), |uow, id| {
                let mapper = uow.mapper::<Notification>();
                let mut record = find_owned(&mapper, id, uow.owner())?;
                if record.entity()?.is_read() {
                    return Ok(record.entity()?);
                }
                record.set("read_at", uow.now())?;
                mapper.save(&mut record)?;
                uow.invalidate(EntityType::Notification);
                Ok(record.entity()?)
            })
    }

    /// Mark every unread notification of the caller read. Returns how many
    /// changed.
    pub fn mark_all_read(&self, auth: &AuthContext) -> ApiResult<u64> {
        self.orchestrator
            .run(auth, NOTIFICATIONS_MARK_ALL_READ, (), |_| Ok(()), |uow, ()| {
                let owner = uow.owner();
                let mut values = AttributeMap::new();
                values.insert("read_at".to_string(), Value::from(uow.now()));
                let changed = uow
                    .mapper::<Notification>()
                    .update_where(&unread(owner), values)?;
                if changed > 0 {
                    uow.invalidate(EntityType::Notification);
                }
                Ok(changed)
            })
    }

    pub fn delete(&self, auth: &AuthContext, id: RecordId) -> ApiResult<()> {
        self.orchestrator
            .run(auth, NOTIFICATIONS_DELETE, id, |_| Ok(()), |uow, id| {
                let mapper = uow.mapper::<Notification>();
                find_owned(&mapper, id, uow.owner())?;
                mapper.delete(id)?;
                uow.invalidate(EntityType::Notification);
                Ok(())
            })
    }

    /// Evaluate the alert rules of `owner` and store any new alerts.
    ///
    /// Runs as a trusted caller: there is no session and no rate budget.
    /// All inserts for one owner commit together.
    pub fn check_alerts(&self, owner: UserId) -> ApiResult<Vec<Notification>> {
        self.orchestrator
            .execute(owner, ALERTS_CHECK, (), |uow, ()| raise_alerts(uow))
    }

    /// Unread notifications of the caller, cached as
    /// `notifications:<owner>:unread`.
    pub fn unread_count(&self, auth: &AuthContext) -> ApiResult<u64> {
        let owner = auth.require_user()?;
        let key = CacheKey::with_sub_key(EntityType::Notification, owner, UNREAD_SUB_KEY);
        self.ctx().cached(&key, |ctx| {
            Ok(ctx.mapper::<Notification>().count(&unread(owner))?)
        })
    }

    /// First page at the default page size.
    pub fn recent(&self, auth: &AuthContext) -> ApiResult<Page<Notification>> {
        self.list(auth, 1, DEFAULT_PAGE_SIZE)
    }

    /// One page of the caller's notifications, newest first, cached as
    /// `notifications:<owner>:list:<page>:<per-page>`.
    pub fn list(
        &self,
        auth: &AuthContext,
        page: u32,
        per_page: u32,
    ) -> ApiResult<Page<Notification>> {
        let owner = auth.require_user()?;
        page.validate_positive("page")?;
        per_page.validate_range("per_page", 1, MAX_PAGE_SIZE)?;

        let key = CacheKey::with_sub_key(
            EntityType::Notification,
            owner,
            format!("{}:{}:{}", LIST_SUB_KEY, page, per_page),
        );
        self.ctx().cached(&key, |ctx| {
            Ok(ctx.mapper::<Notification>().paginate(
                &Conditions::new().eq("user_id", owner),
                Some(&OrderBy::desc("created_at")),
                page,
                per_page,
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use greenbed_core::{GreenbedConfig, ManualClock};
    use std::time::Duration;

    fn service() -> (NotificationService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let config = GreenbedConfig::default().with_database_path(":memory:");
        let ctx = ServiceContext::from_config_with_clock(&config, clock.clone()).expect("context");
        (NotificationService::new(Arc::new(ctx)), clock)
    }

    fn note(message: &str) -> NewNotification {
        NewNotification {
            kind: "low_battery".to_string(),
            message: message.to_string(),
            data: Some(serde_json::json!({ "battery": 12 })),
        }
    }

    #[test]
    fn test_unread_count_follows_mutations() {
        let (notifications, _) = service();
        let auth = AuthContext::authenticated(42);
        assert_eq!(notifications.unread_count(&auth).expect("count"), 0);

        let first = notifications.create(&auth, note("bed-1 battery low")).expect("create");
        notifications.create(&auth, note("bed-2 battery low")).expect("create");
        assert_eq!(notifications.unread_count(&auth).expect("count"), 2);

        let read = notifications
            .mark_read(&auth, first.id.expect("id"))
            .expect("mark read");
        assert!(read.is_read());
        assert_eq!(notifications.unread_count(&auth).expect("count"), 1);

        assert_eq!(notifications.mark_all_read(&auth).expect("mark all"), 1);
        assert_eq!(notifications.unread_count(&auth).expect("count"), 0);
        assert_eq!(notifications.mark_all_read(&auth).expect("mark all"), 0);
    }

    #[test]
    fn test_mark_read_keeps_first_timestamp() {
        let (notifications, clock) = service();
        let auth = AuthContext::authenticated(42);
        let id = notifications
            .create(&auth, note("dry soil"))
            .expect("create")
            .id
            .expect("id");
        let first = notifications.mark_read(&auth, id).expect("mark read");
        clock.advance(Duration::from_secs(300));
        let second = notifications.mark_read(&auth, id).expect("mark read again");
        assert_eq!(first.read_at, second.read_at);
    }

    #[test]
    fn test_list_pages_newest_first() {
        let (notifications, clock) = service();
        let auth = AuthContext::authenticated(42);
        for i in 0..5 {
            notifications
                .create(&auth, note(&format!("message {}", i)))
                .expect("create");
            clock.advance(Duration::from_secs(1));
        }

        let page = notifications.list(&auth, 1, 2).expect("page 1");
        assert_eq!(page.total, 5);
        assert_eq!(page.last_page, 3);
        let messages: Vec<&str> = page.items.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["message 4", "message 3"]);

        let last = notifications.list(&auth, 3, 2).expect("page 3");
        assert_eq!(last.items.len(), 1);
        assert_eq!(notifications.recent(&auth).expect("recent").items.len(), 5);

        // A new notification drops every cached page.
        notifications.create(&auth, note("message 5")).expect("create");
        assert_eq!(notifications.list(&auth, 1, 2).expect("page 1").total, 6);
    }

    #[test]
    fn test_list_rejects_bad_paging() {
        let (notifications, _) = service();
        let auth = AuthContext::authenticated(42);
        assert_eq!(
            notifications.list(&auth, 0, DEFAULT_PAGE_SIZE).unwrap_err().code,
            ErrorCode::InvalidRange
        );
        assert_eq!(
            notifications.list(&auth, 1, MAX_PAGE_SIZE + 1).unwrap_err().code,
            ErrorCode::InvalidRange
        );
    }

    #[test]
    fn test_blank_message_is_rejected() {
        let (notifications, _) = service();
        let err = notifications
            .create(&AuthContext::authenticated(42), note("  "))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingField);
    }

    // ========================================================================
    // ALERTS
    // ========================================================================

    use crate::services::{ReadingService, SettingsService};
    use greenbed_core::{NewPlant, NewReading, NewSensor, SettingsChanges};

    struct Garden {
        notifications: NotificationService,
        readings: ReadingService,
        settings: SettingsService,
        clock: Arc<ManualClock>,
        sensor_id: RecordId,
    }

    /// Owner 42 with a basil plant (moisture 30..=60) watched by `bed-1`.
    fn garden() -> Garden {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let config = GreenbedConfig::default().with_database_path(":memory:");
        let ctx = Arc::new(
            ServiceContext::from_config_with_clock(&config, clock.clone()).expect("context"),
        );
        let mut plant = NewPlant::named("basil");
        plant.min_soil_moisture = Some(30.0);
        plant.max_soil_moisture = Some(60.0);
        let plant_id = ctx
            .mapper::<Plant>()
            .create_from(plant, attributes! { "user_id" => 42 })
            .expect("plant")
            .id()
            .expect("id");
        let mut sensor = NewSensor::named("bed-1");
        sensor.plant_id = Some(plant_id);
        let sensor_id = ctx
            .mapper::<Sensor>()
            .create_from(sensor, attributes! { "user_id" => 42 })
            .expect("sensor")
            .id()
            .expect("id");
        Garden {
            notifications: NotificationService::new(Arc::clone(&ctx)),
            readings: ReadingService::new(Arc::clone(&ctx)),
            settings: SettingsService::new(ctx),
            clock,
            sensor_id,
        }
    }

    fn sample(moisture: f64, temperature: f64) -> NewReading {
        NewReading {
            reading: moisture,
            temperature: Some(temperature),
            humidity: None,
        }
    }

    #[test]
    fn test_dry_soil_raises_one_alert() {
        let g = garden();
        let auth = AuthContext::authenticated(42);
        g.readings.add(&auth, g.sensor_id, sample(12.0, 20.0)).expect("reading");
        assert_eq!(g.notifications.unread_count(&auth).expect("count"), 0);

        let raised = g.notifications.check_alerts(42).expect("check");
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, MOISTURE_ALERT);
        assert_eq!(raised[0].message, "Moisture low alert for sensor bed-1 on plant basil");
        let data: serde_json::Value =
            serde_json::from_str(raised[0].data.as_deref().expect("data")).expect("json");
        assert_eq!(data["sensor_id"], g.sensor_id);
        assert_eq!(g.notifications.unread_count(&auth).expect("count"), 1);
    }

    #[test]
    fn test_alert_repeats_only_after_an_hour() {
        let g = garden();
        let auth = AuthContext::authenticated(42);
        g.readings.add(&auth, g.sensor_id, sample(75.0, 20.0)).expect("reading");

        assert_eq!(g.notifications.check_alerts(42).expect("check").len(), 1);
        g.clock.advance(Duration::from_secs(59 * 60));
        assert!(g.notifications.check_alerts(42).expect("check").is_empty());

        g.clock.advance(Duration::from_secs(2 * 60));
        let again = g.notifications.check_alerts(42).expect("check");
        assert_eq!(again.len(), 1);
        assert!(again[0].message.starts_with("Moisture high"));
    }

    #[test]
    fn test_disabled_flag_raises_nothing() {
        let g = garden();
        let auth = AuthContext::authenticated(42);
        g.settings
            .update(
                &auth,
                SettingsChanges {
                    moisture_alerts: Some(false),
                    ..Default::default()
                },
            )
            .expect("settings");
        g.readings.add(&auth, g.sensor_id, sample(5.0, 20.0)).expect("reading");
        assert!(g.notifications.check_alerts(42).expect("check").is_empty());

        // Temperature is still watched.
        g.readings.add(&auth, g.sensor_id, sample(5.0, 38.5)).expect("reading");
        let raised = g.notifications.check_alerts(42).expect("check");
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, TEMPERATURE_ALERT);
        assert!(raised[0].message.starts_with("Temperature high"));
    }

    #[test]
    fn test_in_range_or_unlinked_sensor_is_quiet() {
        let g = garden();
        let auth = AuthContext::authenticated(42);
        assert!(g.notifications.check_alerts(42).expect("no readings").is_empty());

        g.readings.add(&auth, g.sensor_id, sample(45.0, 22.0)).expect("reading");
        assert!(g.notifications.check_alerts(42).expect("check").is_empty());

        // Another owner's garden is not evaluated on this owner's behalf.
        assert!(g.notifications.check_alerts(7).expect("check").is_empty());
        assert_eq!(g.notifications.unread_count(&auth).expect("count"), 0);
    }
}
