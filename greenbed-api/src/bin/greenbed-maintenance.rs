//! Greenbed Maintenance Worker
//!
//! Runs the retention maintenance job against the configured database until
//! interrupted. Configuration comes from `GREENBED_*` environment variables.
//!
//! Usage:
//!   GREENBED_DATABASE_PATH=/var/lib/greenbed/greenbed.db greenbed-maintenance

use std::sync::Arc;

use greenbed_api::{
    init_tracing, maintenance_task, ApiConfig, ApiError, ApiResult, ServiceContext,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ApiConfig::from_env();
    config.validate()?;
    init_tracing(&config.telemetry)?;

    let ctx = Arc::new(ServiceContext::from_config(&config.core)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(maintenance_task(ctx, config.maintenance(), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to listen for shutdown: {}", e)))?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let metrics = handle
        .await
        .map_err(|e| ApiError::internal_error(format!("Maintenance task failed: {}", e)))?;

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.maintenance_cycles,
        alerts = snapshot.alerts_raised,
        errors = snapshot.maintenance_errors,
        "Maintenance worker stopped"
    );
    Ok(())
}
