//! Service-layer configuration: core settings plus telemetry.

use greenbed_core::{ConfigError, GreenbedConfig};

use crate::jobs::MaintenanceConfig;
use crate::telemetry::TelemetryConfig;

/// Everything a greenbed process reads from its environment at startup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiConfig {
    pub core: GreenbedConfig,
    pub telemetry: TelemetryConfig,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            core: GreenbedConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    pub fn with_core(mut self, core: GreenbedConfig) -> Self {
        self.core = core;
        self
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig::from_retention(&self.core.retention)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core.validate()?;
        if self.telemetry.service_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "service_name".to_string(),
            });
        }
        Ok(())
    }
}
