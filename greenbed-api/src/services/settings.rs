//! Settings Service
//!
//! A user has at most one settings row. Until they save something the
//! defaults are served without touching the table.

use std::sync::Arc;

use greenbed_core::{EntityType, Persistable, SettingsChanges, UserId, UserSettings};
use greenbed_storage::{CacheKey, Mapper, Record};

use crate::auth::AuthContext;
use crate::constants::{SETTINGS_RESET, SETTINGS_UPDATE};
use crate::context::ServiceContext;
use crate::error::ApiResult;
use crate::orchestrator::MutationOrchestrator;
use crate::validation::ValidatePayload;

#[derive(Debug, Clone)]
pub struct SettingsService {
    orchestrator: MutationOrchestrator,
}

fn find_settings(
    mapper: &Mapper<'_, UserSettings>,
    owner: UserId,
) -> ApiResult<Option<Record<UserSettings>>> {
    Ok(mapper.find_by("user_id", owner)?)
}

impl SettingsService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            orchestrator: MutationOrchestrator::new(ctx),
        }
    }

    fn ctx(&self) -> &ServiceContext {
        self.orchestrator.context()
    }

    /// The caller's settings, cached as `settings:<owner>`.
    pub fn get(&self, auth: &AuthContext) -> ApiResult<UserSettings> {
        let owner = auth.require_user()?;
        self.ctx()
            .cached(&CacheKey::new(EntityType::Settings, owner), |ctx| {
                match find_settings(&ctx.mapper(), owner)? {
                    Some(record) => Ok(record.entity()?),
                    None => Ok(UserSettings::defaults(owner)),
                }
            })
    }

    /// Merge `changes` into the stored settings, creating the row from the
    /// defaults on first save.
    pub fn update(&self, auth: &AuthContext, changes: SettingsChanges) -> ApiResult<UserSettings> {
        self.orchestrator.run(
            auth,
            SETTINGS_UPDATE,
            changes,
            SettingsChanges::validate,
            |uow, changes| {
                let owner = uow.owner();
                let mapper = uow.mapper::<UserSettings>();
                let mut record = match find_settings(&mapper, owner)? {
                    Some(record) => record,
                    None => Record::from_entity(&UserSettings::defaults(owner)),
                };
                record.fill_from(changes);
                if mapper.save(&mut record)?.wrote() {
                    uow.invalidate(EntityType::Settings);
                }
                Ok(record.entity()?)
            },
        )
    }

    /// Put every setting back to its default. A user without a row keeps
    /// having none.
    pub fn reset(&self, auth: &AuthContext) -> ApiResult<UserSettings> {
        self.orchestrator.run(auth, SETTINGS_RESET, (), |_| Ok(()), |uow, ()| {
            let owner = uow.owner();
            let mapper = uow.mapper::<UserSettings>();
            let defaults = UserSettings::defaults(owner);
            let Some(mut record) = find_settings(&mapper, owner)? else {
                return Ok(defaults);
            };

            let attributes = defaults.to_attributes();
            for column in UserSettings::FILLABLE {
                if let Some(value) = attributes.get(*column) {
                    record.set(column, value.clone())?;
                }
            }
            if mapper.save(&mut record)?.wrote() {
                uow.invalidate(EntityType::Settings);
            }
            Ok(record.entity()?)
        })
    }
}
