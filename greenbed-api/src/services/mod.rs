//! Service Layer
//!
//! One service per garden entity. Each holds a [`MutationOrchestrator`] over
//! the shared [`ServiceContext`](crate::context::ServiceContext): reads go
//! through the cache, writes through the orchestrator. Every operation checks
//! row ownership against the authenticated caller.

mod notification;
mod plant;
mod reading;
mod sensor;
mod settings;

pub use notification::NotificationService;
pub use plant::PlantService;
pub use reading::ReadingService;
pub use sensor::SensorService;
pub use settings::SettingsService;

use greenbed_core::{Persistable, RecordId, UserId};
use greenbed_storage::{Mapper, Record, Records};

use crate::error::{ApiError, ApiResult};

/// Decode every row, failing on the first malformed one.
pub(crate) fn collect_records<T: Persistable>(records: Records<T>) -> ApiResult<Vec<T>> {
    Ok(records.collect::<Result<Vec<_>, _>>()?)
}

/// Load row `id` if `owner` owns it. Foreign and missing rows are both
/// `EntityNotFound`.
pub(crate) fn find_owned<T: Persistable>(
    mapper: &Mapper<'_, T>,
    id: RecordId,
    owner: UserId,
) -> ApiResult<Record<T>> {
    let not_found = || ApiError::entity_not_found(&T::entity_type().to_string(), id);
    let record = mapper.find(id)?.ok_or_else(not_found)?;
    if record.entity()?.owner_id() != owner {
        return Err(not_found());
    }
    Ok(record)
}
