//! Relational store adapter.
//!
//! `StoreAdapter` is the only path to the database. The SQLite implementation
//! owns a single connection behind a mutex; every call locks it for the
//! duration of one statement. Transactions are flat: a nested `begin` joins
//! the one already open.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use greenbed_core::{AttributeMap, GreenbedConfig, RecordId, StoreError, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};

use crate::schema;

/// Parameterized access to a relational store.
pub trait StoreAdapter: Send + Sync {
    /// Run a read-only statement and return every row as an attribute map.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<AttributeMap>, StoreError>;

    /// Run a mutating statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    /// Run an INSERT and return the new row id, read under the same lock as
    /// the insert so no other statement can interleave.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<RecordId, StoreError>;

    /// Open a transaction. Returns `false` when one is already active, in
    /// which case the call is a no-op.
    fn begin_transaction(&self) -> Result<bool, StoreError>;

    /// Commit the active transaction.
    ///
    /// # Errors
    ///
    /// `StoreError::NoActiveTransaction` when no transaction is open.
    fn commit(&self) -> Result<(), StoreError>;

    /// Roll back the active transaction. Returns `false` (and does nothing)
    /// when none is open.
    fn rollback(&self) -> Result<bool, StoreError>;

    /// Row id of the most recent insert on this connection.
    fn last_insert_id(&self) -> Result<RecordId, StoreError>;

    fn in_transaction(&self) -> Result<bool, StoreError>;
}

impl<S: StoreAdapter + ?Sized> StoreAdapter for Arc<S> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<AttributeMap>, StoreError> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        (**self).execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<RecordId, StoreError> {
        (**self).insert(sql, params)
    }

    fn begin_transaction(&self) -> Result<bool, StoreError> {
        (**self).begin_transaction()
    }

    fn commit(&self) -> Result<(), StoreError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<bool, StoreError> {
        (**self).rollback()
    }

    fn last_insert_id(&self) -> Result<RecordId, StoreError> {
        (**self).last_insert_id()
    }

    fn in_transaction(&self) -> Result<bool, StoreError> {
        (**self).in_transaction()
    }
}

// ============================================================================
// SQLITE
// ============================================================================

/// SQLite-backed store.
pub struct SqliteStore {
    connection: Mutex<Connection>,
    path: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self, StoreError> {
        let display = path.as_ref().display().to_string();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path.as_ref(), flags)
            .map_err(|e| connection_error(&display, e))?;
        Self::configure(connection, display, busy_timeout)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection =
            Connection::open_in_memory().map_err(|e| connection_error(":memory:", e))?;
        Self::configure(connection, ":memory:".to_string(), Duration::from_millis(5_000))
    }

    /// Open the database named by the configuration and apply the schema.
    pub fn from_config(config: &GreenbedConfig) -> Result<Self, StoreError> {
        let store = if config.database_path.as_os_str() == ":memory:" {
            Self::open_in_memory()?
        } else {
            Self::open(&config.database_path, config.db_busy_timeout)?
        };
        store.migrate()?;
        Ok(store)
    }

    fn configure(
        connection: Connection,
        path: String,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        connection
            .busy_timeout(busy_timeout)
            .map_err(|e| connection_error(&path, e))?;
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| connection_error(&path, e))?;
        tracing::debug!(path = %path, "Opened SQLite store");
        Ok(Self {
            connection: Mutex::new(connection),
            path,
        })
    }

    /// Create every table and index if missing.
    pub fn migrate(&self) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard.execute_batch(schema::SCHEMA).map_err(map_sqlite_error)?;
        tracing::debug!(path = %self.path, "Applied schema");
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl StoreAdapter for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<AttributeMap>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare(sql).map_err(map_sqlite_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql_value)))
            .map_err(map_sqlite_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let mut attrs = AttributeMap::new();
            for (index, column) in columns.iter().enumerate() {
                let raw = row.get_ref(index).map_err(map_sqlite_error)?;
                attrs.insert(column.clone(), from_sql_ref(column, raw)?);
            }
            out.push(attrs);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        let affected = guard
            .execute(sql, params_from_iter(params.iter().map(to_sql_value)))
            .map_err(map_sqlite_error)?;
        Ok(affected as u64)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<RecordId, StoreError> {
        let guard = self.lock()?;
        guard
            .execute(sql, params_from_iter(params.iter().map(to_sql_value)))
            .map_err(map_sqlite_error)?;
        Ok(guard.last_insert_rowid())
    }

    fn begin_transaction(&self) -> Result<bool, StoreError> {
        let guard = self.lock()?;
        if !guard.is_autocommit() {
            return Ok(false);
        }
        guard
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StoreError::TransactionFailed {
                reason: e.to_string(),
            })?;
        Ok(true)
    }

    fn commit(&self) -> Result<(), StoreError> {
        let guard = self.lock()?;
        if guard.is_autocommit() {
            return Err(StoreError::NoActiveTransaction);
        }
        guard
            .execute_batch("COMMIT")
            .map_err(|e| StoreError::TransactionFailed {
                reason: e.to_string(),
            })
    }

    fn rollback(&self) -> Result<bool, StoreError> {
        let guard = self.lock()?;
        if guard.is_autocommit() {
            return Ok(false);
        }
        guard
            .execute_batch("ROLLBACK")
            .map_err(|e| StoreError::TransactionFailed {
                reason: e.to_string(),
            })?;
        Ok(true)
    }

    fn last_insert_id(&self) -> Result<RecordId, StoreError> {
        Ok(self.lock()?.last_insert_rowid())
    }

    fn in_transaction(&self) -> Result<bool, StoreError> {
        Ok(!self.lock()?.is_autocommit())
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
    }
}

fn from_sql_ref(column: &str, raw: ValueRef<'_>) -> Result<Value, StoreError> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(v) => Ok(Value::Integer(v)),
        ValueRef::Real(v) => Ok(Value::Real(v)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|e| StoreError::Decode {
                column: column.to_string(),
                reason: e.to_string(),
            }),
        ValueRef::Blob(_) => Err(StoreError::Decode {
            column: column.to_string(),
            reason: "blob columns are not supported".to_string(),
        }),
    }
}

fn connection_error(path: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Connection {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

/// Classify a SQLite failure into the store error taxonomy.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    use rusqlite::ErrorCode;

    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => StoreError::ConstraintViolation {
                reason: err.to_string(),
            },
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Busy {
                reason: err.to_string(),
            },
            _ => StoreError::Query {
                reason: err.to_string(),
            },
        },
        _ => StoreError::Query {
            reason: err.to_string(),
        },
    }
}
