//! Authentication Context
//!
//! Session handling lives in the transport in front of the services; by the
//! time a call reaches a service the caller is either a known user id or
//! anonymous. Services only ever ask two questions: who is calling, and does
//! this row belong to them.

use greenbed_core::{Persistable, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// The authenticated subject of a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthContext {
    /// Session user, `None` for anonymous callers
    pub user_id: Option<UserId>,
}

impl AuthContext {
    pub fn authenticated(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.user_id, Some(id) if id > 0)
    }

    /// The calling user.
    ///
    /// # Errors
    /// `Unauthorized` when there is no session or the id is not a valid row id.
    pub fn require_user(&self) -> ApiResult<UserId> {
        match self.user_id {
            Some(id) if id > 0 => Ok(id),
            _ => Err(ApiError::unauthorized("Authentication required")),
        }
    }
}

/// Hide rows owned by someone else.
///
/// A foreign row is reported exactly like a missing one so ids cannot be
/// probed across accounts.
pub fn owned_by<T: Persistable>(entity: Option<T>, owner: UserId) -> Option<T> {
    entity.filter(|e| e.owner_id() == owner)
}

/// Like [`owned_by`], but turns absence into `EntityNotFound`.
pub fn require_owned<T: Persistable>(
    entity: Option<T>,
    owner: UserId,
    id: impl std::fmt::Display,
) -> ApiResult<T> {
    owned_by(entity, owner).ok_or_else(|| {
        ApiError::entity_not_found(&T::entity_type().to_string(), id)
    })
}
