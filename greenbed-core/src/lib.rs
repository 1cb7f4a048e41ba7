//! Greenbed Core - Entity Types
//!
//! Data structures, persistence contracts, configuration and errors shared by
//! the storage and service crates. No I/O happens here.

mod macros;
mod clock;
mod config;
mod entities;
mod enums;
mod error;
mod identity;
mod persist;
mod value;

pub use clock::{chrono_duration, Clock, ManualClock, SystemClock};
pub use config::{CacheBackendKind, GreenbedConfig, RetentionConfig};
pub use entities::{
    NewNotification, NewPlant, NewReading, NewSensor, Notification, Plant, PlantChanges, Reading,
    Sensor, SensorChanges, SettingsChanges, User, UserSettings, MAX_UPDATE_INTERVAL,
    MIN_UPDATE_INTERVAL,
};
pub use enums::{EntityType, PlotType, SensorStatus, Theme};
pub use error::{
    CacheError, ConfigError, GreenbedError, GreenbedResult, RateLimitError, StoreError,
    ValidationError,
};
pub use identity::{RecordId, Timestamp, UserId};
pub use persist::{Fillable, Persistable};
pub use value::{AttributeMap, AttributeMapExt, Value};
