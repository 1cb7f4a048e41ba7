//! Sensor Service

use std::sync::Arc;

use greenbed_core::{
    attributes, EntityType, NewSensor, Plant, RecordId, Reading, Sensor, SensorChanges,
    SensorStatus, UserId, Value,
};
use greenbed_storage::{CacheKey, Conditions, OrderBy};

use super::{collect_records, find_owned};
use crate::auth::{require_owned, AuthContext};
use crate::constants::{
    SENSORS_CREATE, SENSORS_DELETE, SENSORS_DETACH_PLANT, SENSORS_UPDATE, SENSORS_UPDATE_STATUS,
};
use crate::context::ServiceContext;
use crate::error::ApiResult;
use crate::orchestrator::{MutationOrchestrator, UnitOfWork};
use crate::validation::ValidatePayload;

/// Sensors of the calling user.
#[derive(Debug, Clone)]
pub struct SensorService {
    orchestrator: MutationOrchestrator,
}

/// Fail unless `plant_id` names a plant of the unit's owner.
fn check_plant(uow: &UnitOfWork<'_>, plant_id: Option<RecordId>) -> ApiResult<()> {
    if let Some(plant_id) = plant_id {
        find_owned(&uow.mapper::<Plant>(), plant_id, uow.owner())?;
    }
    Ok(())
}

impl SensorService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            orchestrator: MutationOrchestrator::new(ctx),
        }
    }

    fn ctx(&self) -> &ServiceContext {
        self.orchestrator.context()
    }

    /// All sensors of the caller ordered by name, cached as `sensors:<owner>`.
    pub fn list(&self, auth: &AuthContext) -> ApiResult<Vec<Sensor>> {
        let owner = auth.require_user()?;
        self.ctx()
            .cached(&CacheKey::new(EntityType::Sensor, owner), |ctx| {
                load_sensors(ctx, owner)
            })
    }

    pub fn get(&self, auth: &AuthContext, id: RecordId) -> ApiResult<Sensor> {
        let owner = auth.require_user()?;
        self.ctx()
            .read(|ctx| require_owned(ctx.mapper::<Sensor>().find_entity(id)?, owner, id))
    }

    /// Register a sensor. A referenced plant must belong to the caller.
    pub fn create(&self, auth: &AuthContext, sensor: NewSensor) -> ApiResult<Sensor> {
        self.orchestrator.run(
            auth,
            SENSORS_CREATE,
            sensor,
            NewSensor::validate,
            |uow, sensor| {
                check_plant(uow, sensor.plant_id)?;
                let owner = uow.owner();
                let record = uow
                    .mapper::<Sensor>()
                    .create_from(sensor, attributes! { "user_id" => owner })?;
                uow.invalidate(EntityType::Sensor);
                let created = record.entity()?;
                tracing::info!(owner, sensor_id = ?created.id, "Sensor created");
                Ok(created)
            },
        )
    }

    /// Apply a partial update. Fields equal to the stored values cause no
    /// write at all.
    pub fn update(
        &self,
        auth: &AuthContext,
        id: RecordId,
        changes: SensorChanges,
    ) -> ApiResult<Sensor> {
        self.orchestrator.run(
            auth,
            SENSORS_UPDATE,
            changes,
            SensorChanges::validate,
            |uow, changes| {
                check_plant(uow, changes.plant_id)?;
                let mapper = uow.mapper::<Sensor>();
                let mut record = find_owned(&mapper, id, uow.owner())?;
                record.fill_from(changes);
                if mapper.save(&mut record)?.wrote() {
                    uow.invalidate(EntityType::Sensor);
                }
                Ok(record.entity()?)
            },
        )
    }

    pub fn update_status(
        &self,
        auth: &AuthContext,
        id: RecordId,
        status: SensorStatus,
    ) -> ApiResult<Sensor> {
        self.orchestrator.run(
            auth,
            SENSORS_UPDATE_STATUS,
            status,
            |_| Ok(()),
            |uow, status| {
                let mapper = uow.mapper::<Sensor>();
                let mut record = find_owned(&mapper, id, uow.owner())?;
                record.set("status", status.as_str())?;
                if mapper.save(&mut record)?.wrote() {
                    uow.invalidate(EntityType::Sensor);
                }
                Ok(record.entity()?)
            },
        )
    }

    /// Unlink a sensor from its plant. `SensorChanges` can only point a
    /// sensor at another plant, never at none.
    pub fn detach_plant(&self, auth: &AuthContext, id: RecordId) -> ApiResult<Sensor> {
        self.orchestrator
            .run(auth, SENSORS_DETACH_PLANT, id, |_| Ok(()), |uow, id| {
                let mapper = uow.mapper::<Sensor>();
                let mut record = find_owned(&mapper, id, uow.owner())?;
                record.set("plant_id", Value::Null)?;
                if mapper.save(&mut record)?.wrote() {
                    uow.invalidate(EntityType::Sensor);
                }
                Ok(record.entity()?)
            })
    }

    /// Delete a sensor together with its readings.
    pub fn delete(&self, auth: &AuthContext, id: RecordId) -> ApiResult<()> {
        self.orchestrator.run(auth, SENSORS_DELETE, id, |_| Ok(()), |uow, id| {
            let mapper = uow.mapper::<Sensor>();
            find_owned(&mapper, id, uow.owner())?;
            let readings = uow
                .mapper::<Reading>()
                .delete_where(&Conditions::new().eq("sensor_id", id))?;
            mapper.delete(id)?;
            uow.invalidate(EntityType::Sensor);
            uow.invalidate(EntityType::Reading);
            tracing::info!(owner = uow.owner(), sensor_id = id, readings, "Sensor deleted");
            Ok(())
        })
    }
}

fn load_sensors(ctx: &ServiceContext, owner: UserId) -> ApiResult<Vec<Sensor>> {
    collect_records(ctx.mapper::<Sensor>().all(
        &Conditions::new().eq("user_id", owner),
        Some(&OrderBy::asc("name")),
    )?)
}
