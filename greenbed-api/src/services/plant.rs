//! Plant Service

use std::sync::Arc;

use greenbed_core::{attributes, EntityType, NewPlant, Plant, PlantChanges, RecordId, Sensor, UserId};
use greenbed_storage::{CacheKey, Conditions, OrderBy};

use super::{collect_records, find_owned};
use crate::auth::{require_owned, AuthContext};
use crate::constants::{PLANTS_CREATE, PLANTS_DELETE, PLANTS_UPDATE};
use crate::context::ServiceContext;
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::MutationOrchestrator;
use crate::validation::ValidatePayload;

/// Plants of the calling user.
#[derive(Debug, Clone)]
pub struct PlantService {
    orchestrator: MutationOrchestrator,
}

impl PlantService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            orchestrator: MutationOrchestrator::new(ctx),
        }
    }

    fn ctx(&self) -> &ServiceContext {
        self.orchestrator.context()
    }

    /// All plants of the caller ordered by name, cached as `plants:<owner>`.
    pub fn list(&self, auth: &AuthContext) -> ApiResult<Vec<Plant>> {
        let owner = auth.require_user()?;
        self.ctx()
            .cached(&CacheKey::new(EntityType::Plant, owner), |ctx| {
                load_plants(ctx, owner)
            })
    }

    pub fn get(&self, auth: &AuthContext, id: RecordId) -> ApiResult<Plant> {
        let owner = auth.require_user()?;
        self.ctx()
            .read(|ctx| require_owned(ctx.mapper::<Plant>().find_entity(id)?, owner, id))
    }

    pub fn create(&self, auth: &AuthContext, plant: NewPlant) -> ApiResult<Plant> {
        self.orchestrator
            .run(auth, PLANTS_CREATE, plant, NewPlant::validate, |uow, plant| {
                let owner = uow.owner();
                let record = uow
                    .mapper::<Plant>()
                    .create_from(plant, attributes! { "user_id" => owner })?;
                uow.invalidate(EntityType::Plant);
                Ok(record.entity()?)
            })
    }

    /// Apply a partial update.
    ///
    /// Moisture bounds are checked again against the merged row, so moving
    /// only one bound past the other is refused.
    pub fn update(
        &self,
        auth: &AuthContext,
        id: RecordId,
        changes: PlantChanges,
    ) -> ApiResult<Plant> {
        self.orchestrator
            .run(auth, PLANTS_UPDATE, changes, PlantChanges::validate, |uow, changes| {
                let mapper = uow.mapper::<Plant>();
                let mut record = find_owned(&mapper, id, uow.owner())?;
                record.fill_from(changes);

                let merged = record.entity()?;
                if let (Some(min), Some(max)) = (merged.min_soil_moisture, merged.max_soil_moisture)
                {
                    if min > max {
                        return Err(ApiError::validation_failed(
                            "min_soil_moisture must not exceed max_soil_moisture",
                        ));
                    }
                }

                if mapper.save(&mut record)?.wrote() {
                    uow.invalidate(EntityType::Plant);
                }
                Ok(record.entity()?)
            })
    }

    /// Delete a plant. Refused while any sensor still references it.
    pub fn delete(&self, auth: &AuthContext, id: RecordId) -> ApiResult<()> {
        self.orchestrator
            .run(auth, PLANTS_DELETE, id, |_| Ok(()), |uow, id| {
                let mapper = uow.mapper::<Plant>();
                find_owned(&mapper, id, uow.owner())?;

                let sensors = uow
                    .mapper::<Sensor>()
                    .count(&Conditions::new().eq("plant_id", id))?;
                if sensors > 0 {
                    return Err(ApiError::state_conflict(format!(
                        "Plant {} still has {} sensor(s) attached",
                        id, sensors
                    ))
                    .with_details(serde_json::json!({ "sensors": sensors })));
                }

                mapper.delete(id)?;
                uow.invalidate(EntityType::Plant);
                Ok(())
            })
    }
}

fn load_plants(ctx: &ServiceContext, owner: UserId) -> ApiResult<Vec<Plant>> {
    collect_records(ctx.mapper::<Plant>().all(
        &Conditions::new().eq("user_id", owner),
        Some(&OrderBy::asc("name")),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use greenbed_core::GreenbedConfig;

    fn service() -> PlantService {
        let config = GreenbedConfig::default().with_database_path(":memory:");
        PlantService::new(Arc::new(ServiceContext::from_config(&config).expect("context")))
    }

    #[test]
    fn test_list_is_ordered_and_scoped() {
        let plants = service();
        let auth = AuthContext::authenticated(42);
        plants.create(&auth, NewPlant::named("tomato")).expect("create");
        plants.create(&auth, NewPlant::named("basil")).expect("create");
        plants
            .create(&AuthContext::authenticated(7), NewPlant::named("mint"))
            .expect("create");

        let names: Vec<String> = plants
            .list(&auth)
            .expect("list")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["basil", "tomato"]);
    }

    #[test]
    fn test_update_checks_merged_bounds() {
        let plants = service();
        let auth = AuthContext::authenticated(42);
        let mut payload = NewPlant::named("basil");
        payload.min_soil_moisture = Some(30.0);
        payload.max_soil_moisture = Some(60.0);
        let id = plants.create(&auth, payload).expect("create").id.expect("id");

        let err = plants
            .update(
                &auth,
                id,
                PlantChanges {
                    min_soil_moisture: Some(80.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(plants.get(&auth, id).expect("get").min_soil_moisture, Some(30.0));
    }

    #[test]
    fn test_delete_unreferenced_plant() {
        let plants = service();
        let auth = AuthContext::authenticated(42);
        let id = plants
            .create(&auth, NewPlant::named("basil"))
            .expect("create")
            .id
            .expect("id");
        plants.delete(&auth, id).expect("delete");
        assert_eq!(
            plants.get(&auth, id).unwrap_err().code,
            ErrorCode::EntityNotFound
        );
        assert_eq!(
            plants.delete(&auth, id).unwrap_err().code,
            ErrorCode::EntityNotFound
        );
    }
}
