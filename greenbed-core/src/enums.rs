//! Enum types shared across crates

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity type discriminator, used for cache key families and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    User,
    Sensor,
    Plant,
    Reading,
    Settings,
    Notification,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::User,
        EntityType::Sensor,
        EntityType::Plant,
        EntityType::Reading,
        EntityType::Settings,
        EntityType::Notification,
    ];

    /// Prefix used when a cache key is rendered as text.
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            EntityType::User => "users",
            EntityType::Sensor => "sensors",
            EntityType::Plant => "plants",
            EntityType::Reading => "readings",
            EntityType::Settings => "settings",
            EntityType::Notification => "notifications",
        }
    }

    pub fn from_cache_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.cache_prefix() == prefix)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Operational status of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Active,
    Inactive,
    Maintenance,
}

impl SensorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Active => "active",
            SensorStatus::Inactive => "inactive",
            SensorStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SensorStatus::Active),
            "inactive" => Some(SensorStatus::Inactive),
            "maintenance" => Some(SensorStatus::Maintenance),
            _ => None,
        }
    }
}

/// What a sensor's plot displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotType {
    Moisture,
    Temperature,
    Humidity,
}

impl PlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlotType::Moisture => "moisture",
            PlotType::Temperature => "temperature",
            PlotType::Humidity => "humidity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "moisture" => Some(PlotType::Moisture),
            "temperature" => Some(PlotType::Temperature),
            "humidity" => Some(PlotType::Humidity),
            _ => None,
        }
    }
}

/// Interface theme stored in user settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_prefix_round_trip() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::from_cache_prefix(t.cache_prefix()), Some(t));
        }
        assert_eq!(EntityType::from_cache_prefix("widgets"), None);
    }

    #[test]
    fn test_sensor_status_parse() {
        assert_eq!(SensorStatus::parse("maintenance"), Some(SensorStatus::Maintenance));
        assert_eq!(SensorStatus::parse("Active"), None);
    }

    #[test]
    fn test_plot_type_serde_lowercase() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&PlotType::Humidity)?, "\"humidity\"");
        Ok(())
    }
}
