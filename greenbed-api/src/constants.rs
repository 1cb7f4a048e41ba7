//! Constants for the Greenbed services
//!
//! Rate-limit endpoint identifiers, pagination bounds and cache sub-keys.

// ============================================================================
// RATE LIMIT ENDPOINTS
// ============================================================================

// Each mutation has its own budget; limits are counted per (user, endpoint).

pub const SENSORS_CREATE: &str = "sensors.create";
pub const SENSORS_UPDATE: &str = "sensors.update";
pub const SENSORS_UPDATE_STATUS: &str = "sensors.update_status";
pub const SENSORS_DETACH_PLANT: &str = "sensors.detach_plant";
pub const SENSORS_DELETE: &str = "sensors.delete";

pub const PLANTS_CREATE: &str = "plants.create";
pub const PLANTS_UPDATE: &str = "plants.update";
pub const PLANTS_DELETE: &str = "plants.delete";

pub const READINGS_ADD: &str = "readings.add";
pub const READINGS_ADD_BATCH: &str = "readings.add_batch";
pub const READINGS_DELETE: &str = "readings.delete";

pub const SETTINGS_UPDATE: &str = "settings.update";
pub const SETTINGS_RESET: &str = "settings.reset";

pub const NOTIFICATIONS_CREATE: &str = "notifications.create";
pub const NOTIFICATIONS_MARK_READ: &str = "notifications.mark_read";
pub const NOTIFICATIONS_MARK_ALL_READ: &str = "notifications.mark_all_read";
pub const NOTIFICATIONS_DELETE: &str = "notifications.delete";

// ============================================================================
// PAGINATION
// ============================================================================

/// Default page size for notification lists
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum page size for notification lists
pub const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// CACHE SUB-KEYS
// ============================================================================

/// Unread notification counter
pub const UNREAD_SUB_KEY: &str = "unread";

/// Prefix of paginated notification list keys: `list:<page>:<per-page>`
pub const LIST_SUB_KEY: &str = "list";

/// Most recent readings returned for a sensor
pub const RECENT_READINGS_LIMIT: u32 = 100;

/// Largest batch accepted by `ReadingService::add_batch`
pub const MAX_BATCH_READINGS: usize = 500;

// ============================================================================
// ALERTS
// ============================================================================

/// Endpoint label for alert notifications raised by the maintenance job
pub const ALERTS_CHECK: &str = "alerts.check";

/// Notification kinds raised by alert checks
pub const MOISTURE_ALERT: &str = "moisture";
pub const TEMPERATURE_ALERT: &str = "temperature";

/// Window in which a sensor raises at most one alert of each kind
pub const ALERT_DEDUP_WINDOW_SECS: u64 = 3600;

/// Acceptable air temperature, in degrees Celsius
pub const MIN_TEMPERATURE: f64 = 10.0;
pub const MAX_TEMPERATURE: f64 = 35.0;
