//! Persistence contracts between entities and the record mapper.
//!
//! An entity declares its table, column set and the subset of columns that
//! untrusted input may assign. The mapper never reflects over a type; it only
//! reads these constants.

use crate::{AttributeMap, EntityType, RecordId, UserId, ValidationError};

/// A typed entity backed by one table.
pub trait Persistable: Sized + Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";

    /// Every column the table carries, primary key included.
    const COLUMNS: &'static [&'static str];

    /// Columns assignable from untrusted attribute maps.
    const FILLABLE: &'static [&'static str];

    /// Columns excluded from public serialization.
    const HIDDEN: &'static [&'static str] = &[];

    const CREATED_AT: Option<&'static str> = Some("created_at");
    const UPDATED_AT: Option<&'static str> = Some("updated_at");

    fn entity_type() -> EntityType;

    /// Primary key, `None` until first persisted.
    fn primary_key(&self) -> Option<RecordId>;

    /// The user owning this row.
    fn owner_id(&self) -> UserId;

    fn to_attributes(&self) -> AttributeMap;

    fn from_attributes(attrs: &AttributeMap) -> Result<Self, ValidationError>;

    fn has_column(column: &str) -> bool {
        Self::COLUMNS.contains(&column)
    }

    fn is_fillable(column: &str) -> bool {
        Self::FILLABLE.contains(&column)
    }

    fn is_hidden(column: &str) -> bool {
        Self::HIDDEN.contains(&column)
    }

    /// Fail with `UnknownColumn` unless `column` belongs to the table.
    fn check_column(column: &str) -> Result<(), ValidationError> {
        if Self::has_column(column) {
            Ok(())
        } else {
            Err(ValidationError::UnknownColumn {
                table: Self::TABLE.to_string(),
                column: column.to_string(),
            })
        }
    }

    /// Keep only the fillable attributes of an untrusted map.
    fn filter_fillable(attrs: AttributeMap) -> AttributeMap {
        attrs
            .into_iter()
            .filter(|(column, _)| Self::is_fillable(column))
            .collect()
    }
}

/// A create or update payload that can only name fillable columns.
///
/// Implementors are plain structs whose fields are exactly the assignable
/// columns of `Target`, so a non-fillable column cannot be expressed.
pub trait Fillable {
    type Target: Persistable;

    fn into_attributes(self) -> AttributeMap;
}
