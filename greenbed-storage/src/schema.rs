//! Table definitions.
//!
//! Timestamps are fixed-width RFC 3339 UTC text. Rate limit entries store
//! epoch milliseconds so the window predicate is an integer comparison.
//! Foreign keys have no `ON DELETE` actions: dependents must be removed
//! explicitly inside the same transaction.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    username       TEXT NOT NULL UNIQUE,
    email          TEXT NOT NULL UNIQUE,
    password_hash  TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plants (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL,
    name                TEXT NOT NULL,
    species             TEXT,
    min_soil_moisture   REAL,
    max_soil_moisture   REAL,
    watering_frequency  INTEGER,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_plants_user ON plants (user_id);

CREATE TABLE IF NOT EXISTS sensors (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          INTEGER NOT NULL,
    plant_id         INTEGER REFERENCES plants (id),
    name             TEXT NOT NULL,
    description      TEXT,
    location         TEXT,
    status           TEXT NOT NULL DEFAULT 'active'
                     CHECK (status IN ('active', 'inactive', 'maintenance')),
    plot_type        TEXT CHECK (plot_type IN ('moisture', 'temperature', 'humidity')),
    last_reading     REAL,
    last_reading_at  TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sensors_user ON sensors (user_id);
CREATE INDEX IF NOT EXISTS idx_sensors_plant ON sensors (plant_id);

CREATE TABLE IF NOT EXISTS readings (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL,
    sensor_id    INTEGER NOT NULL REFERENCES sensors (id),
    reading      REAL NOT NULL,
    temperature  REAL,
    humidity     REAL,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_readings_sensor ON readings (sensor_id, created_at);

CREATE TABLE IF NOT EXISTS user_settings (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id              INTEGER NOT NULL UNIQUE,
    email_notifications  INTEGER NOT NULL DEFAULT 1,
    low_battery_alerts   INTEGER NOT NULL DEFAULT 1,
    moisture_alerts      INTEGER NOT NULL DEFAULT 1,
    temperature_alerts   INTEGER NOT NULL DEFAULT 1,
    update_interval      INTEGER NOT NULL DEFAULT 300,
    theme                TEXT NOT NULL DEFAULT 'light',
    language             TEXT NOT NULL DEFAULT 'en',
    timezone             TEXT NOT NULL DEFAULT 'UTC',
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    kind        TEXT NOT NULL,
    message     TEXT NOT NULL,
    data        TEXT,
    read_at     TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications (user_id, read_at);

CREATE TABLE IF NOT EXISTS rate_limits (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    subject       INTEGER NOT NULL,
    endpoint      TEXT NOT NULL,
    requested_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rate_limits_key ON rate_limits (subject, endpoint, requested_at);
"#;
