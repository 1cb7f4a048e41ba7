//! Record mapper.
//!
//! `Mapper<T>` turns `Persistable` constants into SQL against a
//! `StoreAdapter`. `Record<T>` carries the attribute set of one row together
//! with the snapshot taken when it was loaded, so `save` can write only the
//! columns that changed, or nothing at all.
//!
//! Column names reaching SQL always come from `T::COLUMNS`; caller-supplied
//! names are checked against that list before any statement is built.

use std::fmt;
use std::marker::PhantomData;

use greenbed_core::{
    AttributeMap, Clock, Fillable, GreenbedResult, Persistable, RecordId, StoreError, Timestamp,
    ValidationError, Value,
};
use serde::{Deserialize, Serialize};

use crate::adapter::StoreAdapter;

// ============================================================================
// QUERY PARTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(String, Value),
    /// Inclusive on both ends.
    Between(String, Value, Value),
    After(String, Value),
    Before(String, Value),
}

impl Clause {
    fn column(&self) -> &str {
        match self {
            Clause::Eq(column, _)
            | Clause::Between(column, _, _)
            | Clause::After(column, _)
            | Clause::Before(column, _) => column,
        }
    }
}

/// ANDed conditions. An equality against `Null` matches `IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    clauses: Vec<Clause>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(column.into(), value.into()));
        self
    }

    /// `low <= column <= high`.
    pub fn between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.clauses
            .push(Clause::Between(column.into(), low.into(), high.into()));
        self
    }

    /// `column > value`.
    pub fn after(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::After(column.into(), value.into()));
        self
    }

    /// `column < value`.
    pub fn before(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Before(column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn to_sql<T: Persistable>(
        &self,
        params: &mut Vec<Value>,
    ) -> Result<String, ValidationError> {
        if self.clauses.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            T::check_column(clause.column())?;
            match clause {
                Clause::Eq(column, value) if value.is_null() => {
                    parts.push(format!("{} IS NULL", quote(column)));
                }
                Clause::Eq(column, value) => {
                    params.push(value.clone());
                    parts.push(format!("{} = ?{}", quote(column), params.len()));
                }
                Clause::Between(column, low, high) => {
                    params.push(low.clone());
                    params.push(high.clone());
                    parts.push(format!(
                        "{} BETWEEN ?{} AND ?{}",
                        quote(column),
                        params.len() - 1,
                        params.len()
                    ));
                }
                Clause::After(column, value) => {
                    params.push(value.clone());
                    parts.push(format!("{} > ?{}", quote(column), params.len()));
                }
                Clause::Before(column, value) => {
                    params.push(value.clone());
                    parts.push(format!("{} < ?{}", quote(column), params.len()));
                }
            }
        }
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

/// Sort order for `all` and `paginate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    fn to_sql<T: Persistable>(&self) -> Result<String, ValidationError> {
        T::check_column(&self.column)?;
        let direction = if self.descending { "DESC" } else { "ASC" };
        // Primary key as tiebreaker keeps pagination stable.
        Ok(format!(
            " ORDER BY {} {}, {} {}",
            quote(&self.column),
            direction,
            quote(T::PRIMARY_KEY),
            direction
        ))
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
}

/// What `Mapper::save` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(RecordId),
    Updated { columns: usize },
    /// Nothing changed since load; the store was not touched.
    Unchanged,
}

impl SaveOutcome {
    /// Whether the store was written.
    pub fn wrote(&self) -> bool {
        !matches!(self, SaveOutcome::Unchanged)
    }
}

fn quote(column: &str) -> String {
    format!("\"{}\"", column)
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_list<T: Persistable>() -> String {
    T::COLUMNS
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// RECORD
// ============================================================================

/// One row of `T` with dirty tracking.
pub struct Record<T> {
    attributes: AttributeMap,
    original: AttributeMap,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("attributes", &self.attributes)
            .field("original", &self.original)
            .finish()
    }
}

impl<T: Persistable> Default for Record<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Persistable> Record<T> {
    /// An empty, unsaved record.
    pub fn new() -> Self {
        Self {
            attributes: AttributeMap::new(),
            original: AttributeMap::new(),
            _entity: PhantomData,
        }
    }

    /// Wrap an entity. An entity with a primary key counts as loaded and
    /// clean; one without is unsaved.
    pub fn from_entity(entity: &T) -> Self {
        let attributes = entity.to_attributes();
        let original = if entity.primary_key().is_some() {
            attributes.clone()
        } else {
            AttributeMap::new()
        };
        Self {
            attributes,
            original,
            _entity: PhantomData,
        }
    }

    fn loaded(attributes: AttributeMap) -> Self {
        Self {
            original: attributes.clone(),
            attributes,
            _entity: PhantomData,
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.attributes.get(T::PRIMARY_KEY).and_then(Value::as_i64)
    }

    pub fn is_persisted(&self) -> bool {
        self.original
            .get(T::PRIMARY_KEY)
            .is_some_and(|v| !v.is_null())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Assign any column. Meant for trusted, server-side values; untrusted
    /// input goes through `fill`.
    ///
    /// # Errors
    ///
    /// `UnknownColumn` for a column outside the table, `ImmutableField` when
    /// changing the primary key of a persisted record.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<(), ValidationError> {
        T::check_column(column)?;
        let value = value.into();
        if column == T::PRIMARY_KEY && self.is_persisted() && self.original.get(column) != Some(&value)
        {
            return Err(ValidationError::ImmutableField {
                field: column.to_string(),
            });
        }
        self.attributes.insert(column.to_string(), value);
        Ok(())
    }

    /// Bulk-assign untrusted attributes; anything not fillable is dropped.
    pub fn fill(&mut self, attributes: AttributeMap) -> &mut Self {
        for (column, value) in attributes {
            if T::is_fillable(&column) {
                self.attributes.insert(column, value);
            } else {
                tracing::debug!(table = T::TABLE, column = %column, "Ignoring non-fillable attribute");
            }
        }
        self
    }

    pub fn fill_from<F: Fillable<Target = T>>(&mut self, payload: F) -> &mut Self {
        self.fill(payload.into_attributes())
    }

    /// Columns whose value differs from the loaded snapshot.
    pub fn changes(&self) -> AttributeMap {
        self.attributes
            .iter()
            .filter(|(column, value)| self.original.get(column.as_str()) != Some(value))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.attributes
            .iter()
            .any(|(column, value)| self.original.get(column.as_str()) != Some(value))
    }

    pub fn entity(&self) -> Result<T, ValidationError> {
        T::from_attributes(&self.attributes)
    }

    /// Attributes minus the hidden columns.
    pub fn to_public_map(&self) -> AttributeMap {
        self.attributes
            .iter()
            .filter(|(column, _)| !T::is_hidden(column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }
}

/// Lazily decoded result set of `Mapper::all`.
pub struct Records<T> {
    rows: std::vec::IntoIter<AttributeMap>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Persistable> Iterator for Records<T> {
    type Item = Result<T, ValidationError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| T::from_attributes(&row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

// ============================================================================
// MAPPER
// ============================================================================

/// Typed table access for `T`.
pub struct Mapper<'a, T> {
    store: &'a dyn StoreAdapter,
    clock: &'a dyn Clock,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: Persistable> Mapper<'a, T> {
    pub fn new(store: &'a dyn StoreAdapter, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            clock,
            _entity: PhantomData,
        }
    }

    /// Load a row by primary key. Absence is `Ok(None)`.
    pub fn find(&self, id: RecordId) -> GreenbedResult<Option<Record<T>>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select_list::<T>(),
            T::TABLE,
            quote(T::PRIMARY_KEY)
        );
        let mut rows = self.store.query(&sql, &[Value::from(id)])?;
        Ok(rows.pop().map(Record::loaded))
    }

    pub fn find_entity(&self, id: RecordId) -> GreenbedResult<Option<T>> {
        match self.find(id)? {
            Some(record) => Ok(Some(record.entity()?)),
            None => Ok(None),
        }
    }

    /// Every row matching `conditions`; empty conditions return the whole
    /// table. There is no implicit limit.
    pub fn all(
        &self,
        conditions: &Conditions,
        order: Option<&OrderBy>,
    ) -> GreenbedResult<Records<T>> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", select_list::<T>(), T::TABLE);
        sql.push_str(&conditions.to_sql::<T>(&mut params)?);
        if let Some(order) = order {
            sql.push_str(&order.to_sql::<T>()?);
        }
        let rows = self.store.query(&sql, &params)?;
        Ok(Records {
            rows: rows.into_iter(),
            _entity: PhantomData,
        })
    }

    /// First row where `column = value`.
    pub fn find_by(
        &self,
        column: &str,
        value: impl Into<Value>,
    ) -> GreenbedResult<Option<Record<T>>> {
        let mut params = Vec::new();
        let conditions = Conditions::new().eq(column, value);
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} ASC LIMIT 1",
            select_list::<T>(),
            T::TABLE,
            conditions.to_sql::<T>(&mut params)?,
            quote(T::PRIMARY_KEY)
        );
        let mut rows = self.store.query(&sql, &params)?;
        Ok(rows.pop().map(Record::loaded))
    }

    pub fn count(&self, conditions: &Conditions) -> GreenbedResult<u64> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {}{}",
            T::TABLE,
            conditions.to_sql::<T>(&mut params)?
        );
        let rows = self.store.query(&sql, &params)?;
        let n = rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Distinct non-null values of `column` over matching rows, ascending.
    pub fn distinct(&self, column: &str, conditions: &Conditions) -> GreenbedResult<Vec<Value>> {
        T::check_column(column)?;
        let mut params = Vec::new();
        let sql = format!(
            "SELECT DISTINCT {col} AS value FROM {}{} ORDER BY value ASC",
            T::TABLE,
            conditions.to_sql::<T>(&mut params)?,
            col = quote(column)
        );
        Ok(self
            .store
            .query(&sql, &params)?
            .into_iter()
            .filter_map(|mut row| row.remove("value"))
            .filter(|value| !value.is_null())
            .collect())
    }

    /// Mean of numeric `column` over matching rows; `None` when nothing
    /// matches.
    pub fn average(&self, column: &str, conditions: &Conditions) -> GreenbedResult<Option<f64>> {
        T::check_column(column)?;
        let mut params = Vec::new();
        let sql = format!(
            "SELECT AVG({}) AS average FROM {}{}",
            quote(column),
            T::TABLE,
            conditions.to_sql::<T>(&mut params)?
        );
        let rows = self.store.query(&sql, &params)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("average"))
            .and_then(Value::as_f64))
    }

    /// One page of matching rows; pages are 1-based.
    pub fn paginate(
        &self,
        conditions: &Conditions,
        order: Option<&OrderBy>,
        page: u32,
        per_page: u32,
    ) -> GreenbedResult<Page<T>> {
        if page == 0 {
            return Err(out_of_range("page", page, 1, u32::MAX).into());
        }
        if per_page == 0 {
            return Err(out_of_range("per_page", per_page, 1, u32::MAX).into());
        }

        let total = self.count(conditions)?;
        let last_page = u32::try_from(total.div_ceil(u64::from(per_page)))
            .unwrap_or(u32::MAX)
            .max(1);

        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", select_list::<T>(), T::TABLE);
        sql.push_str(&conditions.to_sql::<T>(&mut params)?);
        match order {
            Some(order) => sql.push_str(&order.to_sql::<T>()?),
            None => sql.push_str(&format!(" ORDER BY {} ASC", quote(T::PRIMARY_KEY))),
        }
        let offset = u64::from(page - 1) * u64::from(per_page);
        params.push(Value::from(i64::from(per_page)));
        params.push(Value::from(i64::try_from(offset).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() - 1, params.len()));

        let items = self
            .store
            .query(&sql, &params)?
            .iter()
            .map(T::from_attributes)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total,
            per_page,
            current_page: page,
            last_page,
        })
    }

    /// Insert a row from untrusted attributes. Non-fillable keys are dropped.
    pub fn create(&self, attributes: AttributeMap) -> GreenbedResult<Record<T>> {
        let mut record = Record::new();
        record.fill(attributes);
        self.save(&mut record)?;
        Ok(record)
    }

    /// Insert a row from a typed payload plus trusted server-side columns
    /// such as the owning user.
    pub fn create_from<F: Fillable<Target = T>>(
        &self,
        payload: F,
        trusted: AttributeMap,
    ) -> GreenbedResult<Record<T>> {
        let mut record = Record::new();
        record.fill_from(payload);
        for (column, value) in trusted {
            record.set(&column, value)?;
        }
        self.save(&mut record)?;
        Ok(record)
    }

    /// Apply untrusted attributes to an existing row. The modification
    /// timestamp is written even when no fillable attribute survives.
    pub fn update(
        &self,
        id: RecordId,
        attributes: AttributeMap,
    ) -> GreenbedResult<Option<Record<T>>> {
        let Some(mut record) = self.find(id)? else {
            return Ok(None);
        };
        record.fill(attributes);
        self.save_inner(&mut record, true)?;
        Ok(Some(record))
    }

    pub fn update_from<F: Fillable<Target = T>>(
        &self,
        id: RecordId,
        payload: F,
    ) -> GreenbedResult<Option<Record<T>>> {
        self.update(id, payload.into_attributes())
    }

    /// Insert an unsaved record, or write the changed columns of a loaded
    /// one. A clean record causes no store access.
    pub fn save(&self, record: &mut Record<T>) -> GreenbedResult<SaveOutcome> {
        self.save_inner(record, false)
    }

    fn save_inner(&self, record: &mut Record<T>, touch: bool) -> GreenbedResult<SaveOutcome> {
        let now = Value::from(self.clock.now());

        if !record.is_persisted() {
            for column in [T::CREATED_AT, T::UPDATED_AT].into_iter().flatten() {
                let unset = record.attributes.get(column).is_none_or(Value::is_null);
                if unset {
                    record.attributes.insert(column.to_string(), now.clone());
                }
            }

            let (columns, params): (Vec<String>, Vec<Value>) = record
                .attributes
                .iter()
                .filter(|(column, value)| !(column.as_str() == T::PRIMARY_KEY && value.is_null()))
                .map(|(column, value)| (quote(column), value.clone()))
                .unzip();

            let sql = if columns.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", T::TABLE)
            } else {
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    T::TABLE,
                    columns.join(", "),
                    placeholders(1, params.len())
                )
            };
            let id = self.store.insert(&sql, &params)?;
            record
                .attributes
                .insert(T::PRIMARY_KEY.to_string(), Value::from(id));
            record.sync_original();
            tracing::trace!(table = T::TABLE, id, "Inserted record");
            return Ok(SaveOutcome::Inserted(id));
        }

        let original_id = record.original.get(T::PRIMARY_KEY).cloned().unwrap_or_default();
        if record.attributes.get(T::PRIMARY_KEY) != Some(&original_id) {
            return Err(ValidationError::ImmutableField {
                field: T::PRIMARY_KEY.to_string(),
            }
            .into());
        }

        let mut changes = record.changes();
        if changes.is_empty() && !touch {
            return Ok(SaveOutcome::Unchanged);
        }
        if let Some(column) = T::UPDATED_AT {
            if !changes.contains_key(column) {
                record.attributes.insert(column.to_string(), now.clone());
                changes.insert(column.to_string(), now);
            }
        }
        if changes.is_empty() {
            return Ok(SaveOutcome::Unchanged);
        }

        let assignments = changes
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", quote(column), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = changes.values().cloned().collect();
        params.push(original_id.clone());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            T::TABLE,
            assignments,
            quote(T::PRIMARY_KEY),
            params.len()
        );
        let affected = self.store.execute(&sql, &params)?;
        if affected == 0 {
            return Err(StoreError::Query {
                reason: format!("{} row {} no longer exists", T::TABLE, original_id),
            }
            .into());
        }
        record.sync_original();
        tracing::trace!(table = T::TABLE, id = %original_id, columns = changes.len(), "Updated record");
        Ok(SaveOutcome::Updated {
            columns: changes.len(),
        })
    }

    /// Physically remove a row. Dependents are the caller's responsibility.
    pub fn delete(&self, id: RecordId) -> GreenbedResult<bool> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", T::TABLE, quote(T::PRIMARY_KEY));
        let affected = self.store.execute(&sql, &[Value::from(id)])?;
        Ok(affected > 0)
    }

    /// Remove every row matching non-empty `conditions`.
    pub fn delete_where(&self, conditions: &Conditions) -> GreenbedResult<u64> {
        if conditions.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "conditions".to_string(),
            }
            .into());
        }
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {}{}",
            T::TABLE,
            conditions.to_sql::<T>(&mut params)?
        );
        Ok(self.store.execute(&sql, &params)?)
    }

    /// Remove rows whose timestamp `column` is strictly before `cutoff`.
    pub fn delete_older_than(&self, column: &str, cutoff: Timestamp) -> GreenbedResult<u64> {
        T::check_column(column)?;
        let sql = format!("DELETE FROM {} WHERE {} < ?1", T::TABLE, quote(column));
        Ok(self.store.execute(&sql, &[Value::from(cutoff)])?)
    }

    /// Write trusted `values` to every row matching non-empty `conditions`,
    /// stamping the modification time.
    pub fn update_where(
        &self,
        conditions: &Conditions,
        values: AttributeMap,
    ) -> GreenbedResult<u64> {
        if conditions.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "conditions".to_string(),
            }
            .into());
        }
        let mut values = values;
        if let Some(column) = T::UPDATED_AT {
            values
                .entry(column.to_string())
                .or_insert_with(|| Value::from(self.clock.now()));
        }
        if values.is_empty() {
            return Ok(0);
        }

        let mut params = Vec::with_capacity(values.len());
        let mut assignments = Vec::with_capacity(values.len());
        for (column, value) in values {
            T::check_column(&column)?;
            if column == T::PRIMARY_KEY {
                return Err(ValidationError::ImmutableField { field: column }.into());
            }
            params.push(value);
            assignments.push(format!("{} = ?{}", quote(&column), params.len()));
        }
        let where_sql = conditions.to_sql::<T>(&mut params)?;
        let sql = format!("UPDATE {} SET {}{}", T::TABLE, assignments.join(", "), where_sql);
        Ok(self.store.execute(&sql, &params)?)
    }
}

fn out_of_range(field: &str, value: u32, min: u32, max: u32) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        min: min.to_string(),
        max: max.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SqliteStore;
    use greenbed_core::{
        attributes, GreenbedError, ManualClock, NewPlant, NewSensor, Plant, Sensor, SensorChanges,
        SensorStatus, User,
    };
    use std::time::Duration;

    fn setup() -> (SqliteStore, ManualClock) {
        let store = SqliteStore::open_in_memory().expect("open");
        store.migrate().expect("migrate");
        (store, ManualClock::at_epoch_2024())
    }

    fn owner(user_id: i64) -> AttributeMap {
        attributes! { "user_id" => user_id }
    }

    #[test]
    fn test_create_assigns_primary_key_and_timestamps() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        let record = sensors
            .create_from(NewSensor::named("bed-1"), owner(42))
            .expect("create");

        let id = record.id().expect("id assigned");
        assert!(record.is_persisted());
        assert!(!record.is_dirty());

        let sensor = sensors.find_entity(id).expect("find").expect("present");
        assert_eq!(sensor.name, "bed-1");
        assert_eq!(sensor.user_id, 42);
        assert_eq!(sensor.status, SensorStatus::Active);
        assert_eq!(sensor.created_at, Some(clock.now()));
    }

    #[test]
    fn test_find_missing_is_none() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        assert!(plants.find(999).expect("find").is_none());
    }

    #[test]
    fn test_create_drops_non_fillable_attributes() {
        let (store, clock) = setup();
        let users = Mapper::<User>::new(&store, &clock);
        let mut record = Record::<User>::new();
        record.fill(attributes! {
            "username" => "ada",
            "email" => "ada@example.com",
            "password_hash" => "injected",
            "id" => 500,
        });
        record.set("password_hash", "server-side").expect("trusted set");
        users.save(&mut record).expect("save");

        let stored = users
            .find_entity(record.id().expect("id"))
            .expect("find")
            .expect("present");
        assert_eq!(stored.password_hash, "server-side");
        assert_ne!(stored.id, Some(500));
    }

    #[test]
    fn test_update_filters_and_touches_timestamp() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        let id = sensors
            .create_from(NewSensor::named("bed-1"), owner(42))
            .expect("create")
            .id()
            .expect("id");

        clock.advance(Duration::from_secs(10));
        let updated = sensors
            .update(id, attributes! { "user_id" => 7, "last_reading" => 99.0 })
            .expect("update")
            .expect("present");

        let sensor = updated.entity().expect("decode");
        assert_eq!(sensor.user_id, 42);
        assert_eq!(sensor.last_reading, None);
        assert_eq!(sensor.updated_at, Some(clock.now()));
        assert_ne!(sensor.created_at, sensor.updated_at);
    }

    #[test]
    fn test_update_missing_row_is_none() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        let result = sensors
            .update_from(12, SensorChanges::default())
            .expect("update");
        assert!(result.is_none());
    }

    #[test]
    fn test_save_clean_record_is_unchanged() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        let id = plants
            .create_from(NewPlant::named("basil"), owner(1))
            .expect("create")
            .id()
            .expect("id");
        let mut record = plants.find(id).expect("find").expect("present");
        assert_eq!(plants.save(&mut record).expect("save"), SaveOutcome::Unchanged);
    }

    #[test]
    fn test_save_writes_only_changed_columns() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        let id = plants
            .create_from(NewPlant::named("basil"), owner(1))
            .expect("create")
            .id()
            .expect("id");
        let mut record = plants.find(id).expect("find").expect("present");
        record.set("species", "Ocimum basilicum").expect("set");
        clock.advance(Duration::from_secs(1));
        // species + updated_at
        assert_eq!(
            plants.save(&mut record).expect("save"),
            SaveOutcome::Updated { columns: 2 }
        );
        assert!(!record.is_dirty());
    }

    #[test]
    fn test_primary_key_is_immutable_once_persisted() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        let mut record = plants
            .create_from(NewPlant::named("basil"), owner(1))
            .expect("create");
        let result = record.set("id", 77);
        assert_eq!(
            result,
            Err(ValidationError::ImmutableField {
                field: "id".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_condition_column_fails_before_sql() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        let result = sensors.all(&Conditions::new().eq("1=1; DROP TABLE sensors; --", 1), None);
        assert!(matches!(
            result,
            Err(GreenbedError::Validation(ValidationError::UnknownColumn { .. }))
        ));
    }

    #[test]
    fn test_all_with_conditions_and_order() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        for (name, user) in [("c", 1), ("a", 1), ("b", 2)] {
            sensors
                .create_from(NewSensor::named(name), owner(user))
                .expect("create");
        }

        let names: Vec<String> = sensors
            .all(&Conditions::new().eq("user_id", 1), Some(&OrderBy::asc("name")))
            .expect("all")
            .map(|s| s.map(|s| s.name))
            .collect::<Result<_, _>>()
            .expect("decode");
        assert_eq!(names, vec!["a".to_string(), "c".to_string()]);

        let everything = sensors.all(&Conditions::new(), None).expect("all");
        assert_eq!(everything.count(), 3);
    }

    #[test]
    fn test_paginate() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        for i in 0..5 {
            plants
                .create_from(NewPlant::named(format!("plant-{}", i)), owner(3))
                .expect("create");
        }
        let conditions = Conditions::new().eq("user_id", 3);
        let page = plants
            .paginate(&conditions, Some(&OrderBy::asc("name")), 2, 2)
            .expect("paginate");
        assert_eq!(page.total, 5);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.current_page, 2);
        let names: Vec<_> = page.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["plant-2", "plant-3"]);

        let empty = plants
            .paginate(&Conditions::new().eq("user_id", 99), None, 1, 10)
            .expect("paginate");
        assert_eq!(empty.total, 0);
        assert_eq!(empty.last_page, 1);
        assert!(empty.items.is_empty());

        assert!(plants.paginate(&conditions, None, 0, 10).is_err());
    }

    #[test]
    fn test_find_by_and_count() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        plants
            .create_from(NewPlant::named("mint"), owner(5))
            .expect("create");
        let found = plants.find_by("name", "mint").expect("find_by").expect("present");
        assert_eq!(found.get("user_id"), Some(&Value::Integer(5)));
        assert_eq!(plants.count(&Conditions::new().eq("user_id", 5)).expect("count"), 1);
    }

    #[test]
    fn test_delete_and_delete_where() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        let id = plants
            .create_from(NewPlant::named("mint"), owner(5))
            .expect("create")
            .id()
            .expect("id");
        assert!(plants.delete(id).expect("delete"));
        assert!(!plants.delete(id).expect("second delete"));

        assert!(plants.delete_where(&Conditions::new()).is_err());
    }

    #[test]
    fn test_delete_older_than() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        plants
            .create_from(NewPlant::named("old"), owner(5))
            .expect("create");
        clock.advance(Duration::from_secs(3600));
        let cutoff = clock.now();
        plants
            .create_from(NewPlant::named("new"), owner(5))
            .expect("create");
        assert_eq!(plants.delete_older_than("created_at", cutoff).expect("prune"), 1);
        assert_eq!(plants.count(&Conditions::new()).expect("count"), 1);
    }

    #[test]
    fn test_between_is_inclusive_and_after_is_strict() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        let mut stamps = Vec::new();
        for name in ["a", "b", "c"] {
            stamps.push(clock.now());
            plants
                .create_from(NewPlant::named(name), owner(5))
                .expect("create");
            clock.advance(Duration::from_secs(60));
        }

        let middle = Conditions::new().between("created_at", stamps[0], stamps[1]);
        assert_eq!(plants.count(&middle).expect("count"), 2);
        let later = Conditions::new().after("created_at", stamps[1]);
        assert_eq!(plants.count(&later).expect("count"), 1);

        let err = plants
            .count(&Conditions::new().between("created_at; --", stamps[0], stamps[2]))
            .unwrap_err();
        assert!(matches!(
            err,
            GreenbedError::Validation(ValidationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_distinct_skips_nulls_and_honours_before() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        for owner_id in [5, 5, 9] {
            sensors
                .create_from(NewSensor::named("bed"), owner(owner_id))
                .expect("create");
        }
        clock.advance(Duration::from_secs(60));
        let cutoff = clock.now();
        sensors
            .create_from(NewSensor::named("late"), owner(11))
            .expect("create");

        let all = sensors.distinct("user_id", &Conditions::new()).expect("distinct");
        assert_eq!(all, vec![Value::from(5), Value::from(9), Value::from(11)]);
        let early = sensors
            .distinct("user_id", &Conditions::new().before("created_at", cutoff))
            .expect("distinct");
        assert_eq!(early, vec![Value::from(5), Value::from(9)]);
        assert!(sensors
            .distinct("plant_id", &Conditions::new())
            .expect("distinct")
            .is_empty());
    }

    #[test]
    fn test_average_over_matches() {
        let (store, clock) = setup();
        let plants = Mapper::<Plant>::new(&store, &clock);
        for (name, min) in [("a", 20.0), ("b", 40.0)] {
            let mut plant = NewPlant::named(name);
            plant.min_soil_moisture = Some(min);
            plants.create_from(plant, owner(5)).expect("create");
        }

        let mine = Conditions::new().eq("user_id", 5);
        assert_eq!(
            plants.average("min_soil_moisture", &mine).expect("average"),
            Some(30.0)
        );
        let nobody = Conditions::new().eq("user_id", 6);
        assert_eq!(plants.average("min_soil_moisture", &nobody).expect("average"), None);
    }

    #[test]
    fn test_update_where_matches_null() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        for name in ["a", "b"] {
            sensors
                .create_from(NewSensor::named(name), owner(9))
                .expect("create");
        }
        let changed = sensors
            .update_where(
                &Conditions::new().eq("user_id", 9).eq("plant_id", Value::Null),
                attributes! { "status" => "maintenance" },
            )
            .expect("update_where");
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_to_public_map_strips_hidden() {
        let mut record = Record::<User>::new();
        record.set("password_hash", "secret").expect("set");
        record.set("username", "ada").expect("set");
        let public = record.to_public_map();
        assert!(public.contains_key("username"));
        assert!(!public.contains_key("password_hash"));
    }

    #[test]
    fn test_foreign_key_violation_surfaces_as_store_error() {
        let (store, clock) = setup();
        let sensors = Mapper::<Sensor>::new(&store, &clock);
        let mut payload = NewSensor::named("orphan");
        payload.plant_id = Some(404);
        let result = sensors.create_from(payload, owner(1));
        assert!(matches!(
            result,
            Err(GreenbedError::Store(StoreError::ConstraintViolation { .. }))
        ));
    }
}
