//! Retention Maintenance Background Task
//!
//! Periodically removes data that has aged out of its retention window:
//!
//! - readings older than `readings_retention`
//! - notifications older than `notifications_retention`
//! - rate-limit entries older than `rate_limits_retention`
//!
//! Readings and notifications are pruned in one transaction on the entity
//! connection. Once it commits, the reading and notification cache families
//! of every owner that lost rows are dropped. Rate-limit entries live with
//! the limiter (its own connection, or process memory for a `:memory:`
//! database) and are pruned after that.
//!
//! The cycle ends with an alert check for every owner that has sensors.
//! A failing owner is logged and skipped; the others are still checked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use greenbed_core::{
    chrono_duration, EntityType, Notification, Persistable, Reading, RetentionConfig, Sensor,
    Timestamp, UserId, Value,
};
use greenbed_storage::{Conditions, Mapper};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::context::ServiceContext;
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::TxGuard;
use crate::services::NotificationService;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the maintenance background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// How often a cycle runs (default: 1 hour)
    pub check_interval: Duration,

    /// Age after which readings are deleted (default: 30 days)
    pub readings_retention: Duration,

    /// Age after which notifications are deleted (default: 90 days)
    pub notifications_retention: Duration,

    /// Age after which rate-limit entries are deleted (default: 24 hours)
    pub rate_limits_retention: Duration,

    /// Whether each cycle evaluates alert rules (default: true)
    pub check_alerts: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_retention(&RetentionConfig::default())
    }
}

impl MaintenanceConfig {
    pub fn from_retention(retention: &RetentionConfig) -> Self {
        Self {
            check_interval: retention.interval,
            readings_retention: retention.readings,
            notifications_retention: retention.notifications,
            rate_limits_retention: retention.rate_limits,
            check_alerts: true,
        }
    }

    /// Short intervals for local runs.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            readings_retention: Duration::from_secs(3600),
            notifications_retention: Duration::from_secs(3600),
            rate_limits_retention: Duration::from_secs(600),
            check_alerts: true,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters accumulated over the task's lifetime.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    pub readings_pruned: AtomicU64,
    pub notifications_pruned: AtomicU64,
    pub rate_limits_pruned: AtomicU64,
    pub alerts_raised: AtomicU64,

    /// Cycles that ran, successful or not
    pub maintenance_cycles: AtomicU64,

    /// Cycles that failed
    pub maintenance_errors: AtomicU64,
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: &CycleReport) {
        self.readings_pruned
            .fetch_add(report.readings, Ordering::Relaxed);
        self.notifications_pruned
            .fetch_add(report.notifications, Ordering::Relaxed);
        self.rate_limits_pruned
            .fetch_add(report.rate_limits, Ordering::Relaxed);
        self.alerts_raised
            .fetch_add(report.alerts, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            readings_pruned: self.readings_pruned.load(Ordering::Relaxed),
            notifications_pruned: self.notifications_pruned.load(Ordering::Relaxed),
            rate_limits_pruned: self.rate_limits_pruned.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            maintenance_cycles: self.maintenance_cycles.load(Ordering::Relaxed),
            maintenance_errors: self.maintenance_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSnapshot {
    pub readings_pruned: u64,
    pub notifications_pruned: u64,
    pub rate_limits_pruned: u64,
    pub alerts_raised: u64,
    pub maintenance_cycles: u64,
    pub maintenance_errors: u64,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub readings: u64,
    pub notifications: u64,
    pub rate_limits: u64,
    /// Alert notifications created
    pub alerts: u64,
    /// Owners whose alert check failed
    pub alert_failures: u64,
}

impl CycleReport {
    /// Rows removed.
    pub fn total(&self) -> u64 {
        self.readings + self.notifications + self.rate_limits
    }
}

// ============================================================================
// CYCLE
// ============================================================================

fn cutoff(now: Timestamp, retention: Duration) -> Timestamp {
    now.checked_sub_signed(chrono_duration(retention))
        .unwrap_or(Timestamp::MIN_UTC)
}

fn owner_ids(values: Vec<Value>) -> Vec<UserId> {
    values.into_iter().filter_map(|v| v.as_i64()).collect()
}

/// Delete rows of `T` created before `cutoff`. Returns the count and the
/// owners that lost rows.
fn prune_expired<T: Persistable>(
    mapper: &Mapper<'_, T>,
    cutoff: Timestamp,
) -> ApiResult<(u64, Vec<UserId>)> {
    let expired = Conditions::new().before("created_at", cutoff);
    let owners = owner_ids(mapper.distinct("user_id", &expired)?);
    let removed = mapper.delete_older_than("created_at", cutoff)?;
    Ok((removed, owners))
}

fn invalidate_all(ctx: &ServiceContext, kind: EntityType, owners: &[UserId]) {
    for &owner in owners {
        if let Err(e) = ctx.cache().invalidate_kind(kind, owner) {
            tracing::warn!(%kind, owner, error = %e, "Cache invalidation failed");
        }
    }
}

/// Run one maintenance cycle synchronously.
///
/// Holds the transaction gate exclusively while the entity tables are
/// pruned. A failure rolls the entity deletions back; caches are dropped and
/// rate-limit entries pruned only once the deletions have committed.
pub fn run_maintenance_cycle(
    ctx: &Arc<ServiceContext>,
    config: &MaintenanceConfig,
) -> ApiResult<CycleReport> {
    let now = ctx.clock().now();
    let mut report = CycleReport::default();

    {
        let _gate = ctx.write_gate();
        let tx = TxGuard::begin(ctx.store())?;
        let (readings, reading_owners) =
            prune_expired(&ctx.mapper::<Reading>(), cutoff(now, config.readings_retention))?;
        let (notifications, notification_owners) = prune_expired(
            &ctx.mapper::<Notification>(),
            cutoff(now, config.notifications_retention),
        )?;
        tx.commit()?;

        // Still under the gate, so no reader repopulates from pre-commit rows.
        invalidate_all(ctx, EntityType::Reading, &reading_owners);
        invalidate_all(ctx, EntityType::Notification, &notification_owners);
        tracing::debug!(
            readings,
            notifications,
            owners = reading_owners.len().max(notification_owners.len()),
            "Retention committed"
        );
        report.readings = readings;
        report.notifications = notifications;
    }

    report.rate_limits = ctx
        .limiter()
        .prune(cutoff(now, config.rate_limits_retention))?;

    if config.check_alerts {
        check_alerts(ctx, &mut report)?;
    }

    Ok(report)
}

/// Alert check for every owner with at least one sensor.
fn check_alerts(ctx: &Arc<ServiceContext>, report: &mut CycleReport) -> ApiResult<()> {
    let owners = ctx.read(|ctx| {
        Ok(owner_ids(
            ctx.mapper::<Sensor>().distinct("user_id", &Conditions::new())?,
        ))
    })?;

    let notifications = NotificationService::new(Arc::clone(ctx));
    for owner in owners {
        match notifications.check_alerts(owner) {
            Ok(raised) => report.alerts += raised.len() as u64,
            Err(e) => {
                tracing::error!(owner, error = %e, "Alert check failed");
                report.alert_failures += 1;
            }
        }
    }
    Ok(())
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that runs a maintenance cycle every `check_interval`
/// until the shutdown signal is received.
///
/// Each cycle runs on the blocking pool, since the store is synchronous.
/// The first cycle runs immediately.
///
/// # Returns
///
/// Metrics collected during the task's lifetime
pub async fn maintenance_task(
    ctx: Arc<ServiceContext>,
    config: MaintenanceConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MaintenanceMetrics> {
    let metrics = Arc::new(MaintenanceMetrics::new());

    let mut cycle_interval = interval(config.check_interval.max(Duration::from_millis(1)));
    cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        readings_retention_secs = config.readings_retention.as_secs(),
        notifications_retention_secs = config.notifications_retention.as_secs(),
        rate_limits_retention_secs = config.rate_limits_retention.as_secs(),
        "Maintenance task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Maintenance task shutting down");
                    break;
                }
            }

            _ = cycle_interval.tick() => {
                run_cycle(&ctx, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        readings_pruned = snapshot.readings_pruned,
        notifications_pruned = snapshot.notifications_pruned,
        rate_limits_pruned = snapshot.rate_limits_pruned,
        alerts_raised = snapshot.alerts_raised,
        maintenance_cycles = snapshot.maintenance_cycles,
        maintenance_errors = snapshot.maintenance_errors,
        "Maintenance task completed"
    );

    metrics
}

async fn run_cycle(
    ctx: &Arc<ServiceContext>,
    config: &MaintenanceConfig,
    metrics: &MaintenanceMetrics,
) {
    metrics.maintenance_cycles.fetch_add(1, Ordering::Relaxed);

    let ctx = Arc::clone(ctx);
    let cycle_config = config.clone();
    let outcome = tokio::task::spawn_blocking(move || run_maintenance_cycle(&ctx, &cycle_config))
        .await
        .unwrap_or_else(|e| Err(ApiError::internal_error(format!("Maintenance cycle aborted: {}", e))));

    match outcome {
        Ok(report) => {
            metrics.record(&report);
            if report.alert_failures > 0 {
                metrics.maintenance_errors.fetch_add(1, Ordering::Relaxed);
            }
            if report.total() > 0 || report.alerts > 0 {
                tracing::info!(
                    readings = report.readings,
                    notifications = report.notifications,
                    rate_limits = report.rate_limits,
                    alerts = report.alerts,
                    alert_failures = report.alert_failures,
                    "Maintenance cycle completed"
                );
            } else {
                tracing::trace!("Maintenance cycle completed with nothing to do");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Maintenance cycle failed");
            metrics.maintenance_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
