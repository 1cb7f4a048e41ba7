//! Garden entities and their create/update payloads.

use serde::{Deserialize, Serialize};

use crate::{
    attributes, set_if_some, AttributeMap, AttributeMapExt, EntityType, Fillable, Persistable,
    PlotType, RecordId, SensorStatus, Theme, Timestamp, UserId, ValidationError,
};

fn parse_enum<T>(
    column: &str,
    raw: Option<String>,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, ValidationError> {
    match raw {
        None => Ok(None),
        Some(s) => parse(&s)
            .map(Some)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: column.to_string(),
                reason: format!("unrecognised value '{}'", s),
            }),
    }
}

// ============================================================================
// USER
// ============================================================================

/// Dashboard account. Only the store layer ever sees `password_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<RecordId>,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl Persistable for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "username",
        "email",
        "password_hash",
        "created_at",
        "updated_at",
    ];
    const FILLABLE: &'static [&'static str] = &["username", "email"];
    const HIDDEN: &'static [&'static str] = &["password_hash"];

    fn entity_type() -> EntityType {
        EntityType::User
    }

    fn primary_key(&self) -> Option<RecordId> {
        self.id
    }

    fn owner_id(&self) -> UserId {
        self.id.unwrap_or_default()
    }

    fn to_attributes(&self) -> AttributeMap {
        attributes! {
            "id" => self.id,
            "username" => self.username.as_str(),
            "email" => self.email.as_str(),
            "password_hash" => self.password_hash.as_str(),
            "created_at" => self.created_at,
            "updated_at" => self.updated_at,
        }
    }

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError> {
        Ok(Self {
            id: attrs.opt_i64("id")?,
            username: attrs.req_text("username")?,
            email: attrs.req_text("email")?,
            password_hash: attrs.opt_text("password_hash")?.unwrap_or_default(),
            created_at: attrs.opt_timestamp("created_at")?,
            updated_at: attrs.opt_timestamp("updated_at")?,
        })
    }
}

// ============================================================================
// SENSOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: Option<RecordId>,
    pub user_id: UserId,
    pub plant_id: Option<RecordId>,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: SensorStatus,
    pub plot_type: Option<PlotType>,
    pub last_reading: Option<f64>,
    pub last_reading_at: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl Persistable for Sensor {
    const TABLE: &'static str = "sensors";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "plant_id",
        "name",
        "description",
        "location",
        "status",
        "plot_type",
        "last_reading",
        "last_reading_at",
        "created_at",
        "updated_at",
    ];
    const FILLABLE: &'static [&'static str] = &[
        "plant_id",
        "name",
        "description",
        "location",
        "status",
        "plot_type",
    ];

    fn entity_type() -> EntityType {
        EntityType::Sensor
    }

    fn primary_key(&self) -> Option<RecordId> {
        self.id
    }

    fn owner_id(&self) -> UserId {
        self.user_id
    }

    fn to_attributes(&self) -> AttributeMap {
        attributes! {
            "id" => self.id,
            "user_id" => self.user_id,
            "plant_id" => self.plant_id,
            "name" => self.name.as_str(),
            "description" => self.description.clone(),
            "location" => self.location.clone(),
            "status" => self.status.as_str(),
            "plot_type" => self.plot_type.map(|p| p.as_str()),
            "last_reading" => self.last_reading,
            "last_reading_at" => self.last_reading_at,
            "created_at" => self.created_at,
            "updated_at" => self.updated_at,
        }
    }

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError> {
        let status = parse_enum("status", attrs.opt_text("status")?, SensorStatus::parse)?
            .unwrap_or(SensorStatus::Active);
        Ok(Self {
            id: attrs.opt_i64("id")?,
            user_id: attrs.req_i64("user_id")?,
            plant_id: attrs.opt_i64("plant_id")?,
            name: attrs.req_text("name")?,
            description: attrs.opt_text("description")?,
            location: attrs.opt_text("location")?,
            status,
            plot_type: parse_enum("plot_type", attrs.opt_text("plot_type")?, PlotType::parse)?,
            last_reading: attrs.opt_f64("last_reading")?,
            last_reading_at: attrs.opt_timestamp("last_reading_at")?,
            created_at: attrs.opt_timestamp("created_at")?,
            updated_at: attrs.opt_timestamp("updated_at")?,
        })
    }
}

/// Payload for creating a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSensor {
    pub name: String,
    pub plant_id: Option<RecordId>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<SensorStatus>,
    pub plot_type: Option<PlotType>,
}

impl NewSensor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plant_id: None,
            description: None,
            location: None,
            status: None,
            plot_type: None,
        }
    }
}

impl Fillable for NewSensor {
    type Target = Sensor;

    fn into_attributes(self) -> AttributeMap {
        let mut map = attributes! {
            "name" => self.name,
            "status" => self.status.unwrap_or(SensorStatus::Active).as_str(),
        };
        set_if_some!(map,
            "plant_id" => self.plant_id,
            "description" => self.description,
            "location" => self.location,
            "plot_type" => self.plot_type.map(|p| p.as_str()),
        );
        map
    }
}

/// Partial update of a sensor; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorChanges {
    pub name: Option<String>,
    pub plant_id: Option<RecordId>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<SensorStatus>,
    pub plot_type: Option<PlotType>,
}

impl Fillable for SensorChanges {
    type Target = Sensor;

    fn into_attributes(self) -> AttributeMap {
        let mut map = AttributeMap::new();
        set_if_some!(map,
            "name" => self.name,
            "plant_id" => self.plant_id,
            "description" => self.description,
            "location" => self.location,
            "status" => self.status.map(|s| s.as_str()),
            "plot_type" => self.plot_type.map(|p| p.as_str()),
        );
        map
    }
}

// ============================================================================
// PLANT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: Option<RecordId>,
    pub user_id: UserId,
    pub name: String,
    pub species: Option<String>,
    /// Percent, 0 to 100
    pub min_soil_moisture: Option<f64>,
    /// Percent, 0 to 100
    pub max_soil_moisture: Option<f64>,
    /// Hours between waterings
    pub watering_frequency: Option<i64>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl Persistable for Plant {
    const TABLE: &'static str = "plants";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "name",
        "species",
        "min_soil_moisture",
        "max_soil_moisture",
        "watering_frequency",
        "created_at",
        "updated_at",
    ];
    const FILLABLE: &'static [&'static str] = &[
        "name",
        "species",
        "min_soil_moisture",
        "max_soil_moisture",
        "watering_frequency",
    ];

    fn entity_type() -> EntityType {
        EntityType::Plant
    }

    fn primary_key(&self) -> Option<RecordId> {
        self.id
    }

    fn owner_id(&self) -> UserId {
        self.user_id
    }

    fn to_attributes(&self) -> AttributeMap {
        attributes! {
            "id" => self.id,
            "user_id" => self.user_id,
            "name" => self.name.as_str(),
            "species" => self.species.clone(),
            "min_soil_moisture" => self.min_soil_moisture,
            "max_soil_moisture" => self.max_soil_moisture,
            "watering_frequency" => self.watering_frequency,
            "created_at" => self.created_at,
            "updated_at" => self.updated_at,
        }
    }

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError> {
        Ok(Self {
            id: attrs.opt_i64("id")?,
            user_id: attrs.req_i64("user_id")?,
            name: attrs.req_text("name")?,
            species: attrs.opt_text("species")?,
            min_soil_moisture: attrs.opt_f64("min_soil_moisture")?,
            max_soil_moisture: attrs.opt_f64("max_soil_moisture")?,
            watering_frequency: attrs.opt_i64("watering_frequency")?,
            created_at: attrs.opt_timestamp("created_at")?,
            updated_at: attrs.opt_timestamp("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlant {
    pub name: String,
    pub species: Option<String>,
    pub min_soil_moisture: Option<f64>,
    pub max_soil_moisture: Option<f64>,
    pub watering_frequency: Option<i64>,
}

impl NewPlant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            species: None,
            min_soil_moisture: None,
            max_soil_moisture: None,
            watering_frequency: None,
        }
    }
}

impl Fillable for NewPlant {
    type Target = Plant;

    fn into_attributes(self) -> AttributeMap {
        let mut map = attributes! { "name" => self.name };
        set_if_some!(map,
            "species" => self.species,
            "min_soil_moisture" => self.min_soil_moisture,
            "max_soil_moisture" => self.max_soil_moisture,
            "watering_frequency" => self.watering_frequency,
        );
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantChanges {
    pub name: Option<String>,
    pub species: Option<String>,
    pub min_soil_moisture: Option<f64>,
    pub max_soil_moisture: Option<f64>,
    pub watering_frequency: Option<i64>,
}

impl Fillable for PlantChanges {
    type Target = Plant;

    fn into_attributes(self) -> AttributeMap {
        let mut map = AttributeMap::new();
        set_if_some!(map,
            "name" => self.name,
            "species" => self.species,
            "min_soil_moisture" => self.min_soil_moisture,
            "max_soil_moisture" => self.max_soil_moisture,
            "watering_frequency" => self.watering_frequency,
        );
        map
    }
}

// ============================================================================
// READING
// ============================================================================

/// One sample reported by a sensor. Readings are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Option<RecordId>,
    pub user_id: UserId,
    pub sensor_id: RecordId,
    pub reading: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: Option<Timestamp>,
}

impl Persistable for Reading {
    const TABLE: &'static str = "readings";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "sensor_id",
        "reading",
        "temperature",
        "humidity",
        "created_at",
    ];
    const FILLABLE: &'static [&'static str] = &["reading", "temperature", "humidity"];
    const UPDATED_AT: Option<&'static str> = None;

    fn entity_type() -> EntityType {
        EntityType::Reading
    }

    fn primary_key(&self) -> Option<RecordId> {
        self.id
    }

    fn owner_id(&self) -> UserId {
        self.user_id
    }

    fn to_attributes(&self) -> AttributeMap {
        attributes! {
            "id" => self.id,
            "user_id" => self.user_id,
            "sensor_id" => self.sensor_id,
            "reading" => self.reading,
            "temperature" => self.temperature,
            "humidity" => self.humidity,
            "created_at" => self.created_at,
        }
    }

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError> {
        Ok(Self {
            id: attrs.opt_i64("id")?,
            user_id: attrs.req_i64("user_id")?,
            sensor_id: attrs.req_i64("sensor_id")?,
            reading: attrs
                .opt_f64("reading")?
                .ok_or_else(|| ValidationError::RequiredFieldMissing {
                    field: "reading".to_string(),
                })?,
            temperature: attrs.opt_f64("temperature")?,
            humidity: attrs.opt_f64("humidity")?,
            created_at: attrs.opt_timestamp("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    pub reading: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl Fillable for NewReading {
    type Target = Reading;

    fn into_attributes(self) -> AttributeMap {
        let mut map = attributes! { "reading" => self.reading };
        set_if_some!(map,
            "temperature" => self.temperature,
            "humidity" => self.humidity,
        );
        map
    }
}

// ============================================================================
// USER SETTINGS
// ============================================================================

/// Smallest allowed dashboard refresh interval, in seconds.
pub const MIN_UPDATE_INTERVAL: i64 = 60;
/// Largest allowed dashboard refresh interval, in seconds.
pub const MAX_UPDATE_INTERVAL: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: Option<RecordId>,
    pub user_id: UserId,
    pub email_notifications: bool,
    pub low_battery_alerts: bool,
    pub moisture_alerts: bool,
    pub temperature_alerts: bool,
    /// Dashboard refresh interval in seconds
    pub update_interval: i64,
    pub theme: Theme,
    pub language: String,
    pub timezone: String,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl UserSettings {
    /// Settings a user has before saving any.
    pub fn defaults(user_id: UserId) -> Self {
        Self {
            id: None,
            user_id,
            email_notifications: true,
            low_battery_alerts: true,
            moisture_alerts: true,
            temperature_alerts: true,
            update_interval: 300,
            theme: Theme::Light,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            created_at: None,
            updated_at: None,
        }
    }
}

impl Persistable for UserSettings {
    const TABLE: &'static str = "user_settings";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "email_notifications",
        "low_battery_alerts",
        "moisture_alerts",
        "temperature_alerts",
        "update_interval",
        "theme",
        "language",
        "timezone",
        "created_at",
        "updated_at",
    ];
    const FILLABLE: &'static [&'static str] = &[
        "email_notifications",
        "low_battery_alerts",
        "moisture_alerts",
        "temperature_alerts",
        "update_interval",
        "theme",
        "language",
        "timezone",
    ];

    fn entity_type() -> EntityType {
        EntityType::Settings
    }

    fn primary_key(&self) -> Option<RecordId> {
        self.id
    }

    fn owner_id(&self) -> UserId {
        self.user_id
    }

    fn to_attributes(&self) -> AttributeMap {
        attributes! {
            "id" => self.id,
            "user_id" => self.user_id,
            "email_notifications" => self.email_notifications,
            "low_battery_alerts" => self.low_battery_alerts,
            "moisture_alerts" => self.moisture_alerts,
            "temperature_alerts" => self.temperature_alerts,
            "update_interval" => self.update_interval,
            "theme" => self.theme.as_str(),
            "language" => self.language.as_str(),
            "timezone" => self.timezone.as_str(),
            "created_at" => self.created_at,
            "updated_at" => self.updated_at,
        }
    }

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError> {
        Ok(Self {
            id: attrs.opt_i64("id")?,
            user_id: attrs.req_i64("user_id")?,
            email_notifications: attrs.req_bool("email_notifications")?,
            low_battery_alerts: attrs.req_bool("low_battery_alerts")?,
            moisture_alerts: attrs.req_bool("moisture_alerts")?,
            temperature_alerts: attrs.req_bool("temperature_alerts")?,
            update_interval: attrs.req_i64("update_interval")?,
            theme: parse_enum("theme", attrs.opt_text("theme")?, Theme::parse)?
                .unwrap_or(Theme::Light),
            language: attrs.req_text("language")?,
            timezone: attrs.req_text("timezone")?,
            created_at: attrs.opt_timestamp("created_at")?,
            updated_at: attrs.opt_timestamp("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsChanges {
    pub email_notifications: Option<bool>,
    pub low_battery_alerts: Option<bool>,
    pub moisture_alerts: Option<bool>,
    pub temperature_alerts: Option<bool>,
    pub update_interval: Option<i64>,
    pub theme: Option<Theme>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

impl Fillable for SettingsChanges {
    type Target = UserSettings;

    fn into_attributes(self) -> AttributeMap {
        let mut map = AttributeMap::new();
        set_if_some!(map,
            "email_notifications" => self.email_notifications,
            "low_battery_alerts" => self.low_battery_alerts,
            "moisture_alerts" => self.moisture_alerts,
            "temperature_alerts" => self.temperature_alerts,
            "update_interval" => self.update_interval,
            "theme" => self.theme.map(|t| t.as_str()),
            "language" => self.language,
            "timezone" => self.timezone,
        );
        map
    }
}

// ============================================================================
// NOTIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Option<RecordId>,
    pub user_id: UserId,
    /// Short machine-readable category, e.g. `low_battery`
    pub kind: String,
    pub message: String,
    /// Optional JSON payload
    pub data: Option<String>,
    pub read_at: Option<Timestamp>,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

impl Persistable for Notification {
    const TABLE: &'static str = "notifications";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "kind",
        "message",
        "data",
        "read_at",
        "created_at",
        "updated_at",
    ];
    const FILLABLE: &'static [&'static str] = &["kind", "message", "data"];

    fn entity_type() -> EntityType {
        EntityType::Notification
    }

    fn primary_key(&self) -> Option<RecordId> {
        self.id
    }

    fn owner_id(&self) -> UserId {
        self.user_id
    }

    fn to_attributes(&self) -> AttributeMap {
        attributes! {
            "id" => self.id,
            "user_id" => self.user_id,
            "kind" => self.kind.as_str(),
            "message" => self.message.as_str(),
            "data" => self.data.clone(),
            "read_at" => self.read_at,
            "created_at" => self.created_at,
            "updated_at" => self.updated_at,
        }
    }

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError> {
        Ok(Self {
            id: attrs.opt_i64("id")?,
            user_id: attrs.req_i64("user_id")?,
            kind: attrs.req_text("kind")?,
            message: attrs.req_text("message")?,
            data: attrs.opt_text("data")?,
            read_at: attrs.opt_timestamp("read_at")?,
            created_at: attrs.opt_timestamp("created_at")?,
            updated_at: attrs.opt_timestamp("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub kind: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl Fillable for NewNotification {
    type Target = Notification;

    fn into_attributes(self) -> AttributeMap {
        let mut map = attributes! {
            "kind" => self.kind,
            "message" => self.message,
        };
        set_if_some!(map, "data" => self.data.map(|d| d.to_string()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn sample_sensor() -> Sensor {
        Sensor {
            id: Some(3),
            user_id: 42,
            plant_id: None,
            name: "bed-1".to_string(),
            description: Some("north corner".to_string()),
            location: None,
            status: SensorStatus::Maintenance,
            plot_type: Some(PlotType::Moisture),
            last_reading: Some(37.5),
            last_reading_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_sensor_attribute_round_trip() -> Result<(), ValidationError> {
        let sensor = sample_sensor();
        let back = Sensor::from_attributes(&sensor.to_attributes())?;
        assert_eq!(back, sensor);
        Ok(())
    }

    #[test]
    fn test_every_attribute_is_a_known_column() {
        let attrs = sample_sensor().to_attributes();
        for column in attrs.keys() {
            assert!(Sensor::has_column(column), "unexpected column {}", column);
        }
        assert_eq!(attrs.len(), Sensor::COLUMNS.len());
    }

    #[test]
    fn test_fillable_is_subset_of_columns() {
        fn check<T: Persistable>() {
            for column in T::FILLABLE {
                assert!(T::has_column(column), "{} not a column of {}", column, T::TABLE);
                assert_ne!(*column, T::PRIMARY_KEY);
            }
        }
        check::<User>();
        check::<Sensor>();
        check::<Plant>();
        check::<Reading>();
        check::<UserSettings>();
        check::<Notification>();
    }

    #[test]
    fn test_dto_attributes_are_fillable() {
        let attrs = NewSensor {
            name: "bed-9".to_string(),
            plant_id: Some(1),
            description: Some("d".to_string()),
            location: Some("greenhouse".to_string()),
            status: Some(SensorStatus::Inactive),
            plot_type: Some(PlotType::Humidity),
        }
        .into_attributes();
        for column in attrs.keys() {
            assert!(Sensor::is_fillable(column));
        }
        assert_eq!(attrs.get("status"), Some(&Value::from("inactive")));
    }

    #[test]
    fn test_changes_omit_unset_fields() {
        let attrs = PlantChanges {
            species: Some("Ocimum basilicum".to_string()),
            ..Default::default()
        }
        .into_attributes();
        assert_eq!(attrs.len(), 1);
        assert!(attrs.contains_key("species"));
    }

    #[test]
    fn test_filter_fillable_drops_guarded_columns() {
        let attrs = attributes! {
            "name" => "bed-9",
            "user_id" => 99,
            "id" => 1,
            "last_reading" => 3.0,
        };
        let filtered = Sensor::filter_fillable(attrs);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("name"));
    }

    #[test]
    fn test_user_password_is_hidden_and_not_serialized() -> Result<(), serde_json::Error> {
        assert!(User::is_hidden("password_hash"));
        let user = User {
            id: Some(1),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: "secret".to_string(),
            created_at: None,
            updated_at: None,
        };
        let json = serde_json::to_string(&user)?;
        assert!(!json.contains("secret"));
        Ok(())
    }

    #[test]
    fn test_settings_defaults() {
        let settings = UserSettings::defaults(7);
        assert!(settings.email_notifications);
        assert_eq!(settings.update_interval, 300);
        assert_eq!(settings.theme, Theme::Light);
        assert_eq!(settings.language, "en");
        assert_eq!(settings.timezone, "UTC");
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let mut attrs = sample_sensor().to_attributes();
        attrs.insert("status".to_string(), Value::from("exploded"));
        assert!(matches!(
            Sensor::from_attributes(&attrs),
            Err(ValidationError::InvalidValue { .. })
        ));
    }
}
