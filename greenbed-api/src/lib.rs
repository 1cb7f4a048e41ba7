//! Greenbed API - Services Over the Persistence Core
//!
//! Entity services for sensors, plants, readings, settings and
//! notifications. Reads are served through the TTL cache; every mutation is
//! authenticated, rate limited, validated, applied in one transaction and
//! followed by cache invalidation of the affected families.
//!
//! Also hosts the retention maintenance job and the process-level ambient
//! stack (configuration and tracing setup).

pub mod auth;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod services;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use auth::AuthContext;
pub use config::ApiConfig;
pub use context::ServiceContext;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{maintenance_task, run_maintenance_cycle, MaintenanceConfig, MaintenanceMetrics};
pub use orchestrator::{MutationOrchestrator, UnitOfWork};
pub use services::{
    NotificationService, PlantService, ReadingService, SensorService, SettingsService,
};
pub use telemetry::{init_tracing, TelemetryConfig};
