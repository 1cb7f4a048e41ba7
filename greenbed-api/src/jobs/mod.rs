//! Background Jobs for Greenbed
//!
//! - `maintenance`: prunes readings, notifications and rate-limit entries
//!   that have outlived their retention window, then raises soil moisture
//!   and temperature alerts
//!
//! # Usage
//!
//! ```ignore
//! use greenbed_api::jobs::{maintenance_task, MaintenanceConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(maintenance_task(Arc::clone(&ctx), MaintenanceConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod maintenance;

pub use maintenance::{
    maintenance_task, run_maintenance_cycle, CycleReport, MaintenanceConfig, MaintenanceMetrics,
    MaintenanceSnapshot,
};
