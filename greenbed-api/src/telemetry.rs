//! Tracing Subscriber Initialization
//!
//! Installs one global `tracing` subscriber: an `EnvFilter` (honouring
//! `RUST_LOG`) in front of a formatter that writes JSON lines in production
//! and human-readable lines in development.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "greenbed".to_string(),
            environment: "development".to_string(),
            json: true,
            default_filter: "greenbed_api=debug,greenbed_storage=info,info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Load from `GREENBED_SERVICE_NAME`, `GREENBED_ENVIRONMENT`,
    /// `GREENBED_LOG_JSON` and `GREENBED_LOG_FILTER`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("GREENBED_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            environment: std::env::var("GREENBED_ENVIRONMENT").unwrap_or(defaults.environment),
            json: std::env::var("GREENBED_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.json),
            default_filter: std::env::var("GREENBED_LOG_FILTER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.default_filter),
        }
    }
}

/// Install the global subscriber.
///
/// Call once at startup before any tracing occurs. A second call fails with
/// `InternalError` because a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        environment = config.environment,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}
