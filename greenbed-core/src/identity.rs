//! Identity types for Greenbed entities

use chrono::{DateTime, Utc};

/// Store-assigned row identifier (SQLite rowid).
pub type RecordId = i64;

/// Identifier of the user that owns a row.
pub type UserId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
