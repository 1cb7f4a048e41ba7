//! Mutation Orchestrator
//!
//! Every state-changing service call runs through [`MutationOrchestrator::run`]:
//!
//! ```text
//! authenticate -> rate check -> validate -> begin -> mutate -> commit
//!              -> invalidate cache -> respond
//! ```
//!
//! Any failure after `begin` rolls the transaction back and skips the cache
//! step, so cached data is only ever dropped for changes that are durable.
//! Nothing touches the entity store before validation has passed.

use std::collections::BTreeSet;
use std::sync::Arc;

use greenbed_core::{Clock, EntityType, Persistable, StoreError, Timestamp, UserId};
use greenbed_storage::{Mapper, StoreAdapter};

use crate::auth::AuthContext;
use crate::context::ServiceContext;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// TRANSACTION GUARD
// ============================================================================

/// Rolls back on drop unless committed.
///
/// Covers early returns and panics inside the mutation closure alike.
pub(crate) struct TxGuard<'a> {
    store: &'a dyn StoreAdapter,
    /// Whether this guard opened the transaction; a joined one belongs to
    /// the outer caller.
    owned: bool,
    finished: bool,
}

impl<'a> TxGuard<'a> {
    pub(crate) fn begin(store: &'a dyn StoreAdapter) -> Result<Self, StoreError> {
        let owned = store.begin_transaction()?;
        Ok(Self {
            store,
            owned,
            finished: false,
        })
    }

    pub(crate) fn commit(mut self) -> Result<(), StoreError> {
        if self.owned {
            self.store.commit()?;
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if self.finished || !self.owned {
            return;
        }
        match self.store.rollback() {
            Ok(true) => tracing::debug!("Transaction rolled back"),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Rollback failed"),
        }
    }
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

/// What a mutation closure sees: typed table access inside the open
/// transaction, plus a list of cache families to drop after commit.
pub struct UnitOfWork<'a> {
    store: &'a dyn StoreAdapter,
    clock: &'a dyn Clock,
    owner: UserId,
    invalidations: BTreeSet<(EntityType, UserId)>,
}

impl<'a> UnitOfWork<'a> {
    fn new(store: &'a dyn StoreAdapter, clock: &'a dyn Clock, owner: UserId) -> Self {
        Self {
            store,
            clock,
            owner,
            invalidations: BTreeSet::new(),
        }
    }

    /// The authenticated user the work runs for.
    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn mapper<T: Persistable>(&self) -> Mapper<'a, T> {
        Mapper::new(self.store, self.clock)
    }

    /// Drop the caller's `kind` family once the transaction commits.
    pub fn invalidate(&mut self, kind: EntityType) {
        self.invalidations.insert((kind, self.owner));
    }

    pub fn invalidate_for(&mut self, kind: EntityType, owner: UserId) {
        self.invalidations.insert((kind, owner));
    }

    pub fn pending_invalidations(&self) -> impl Iterator<Item = &(EntityType, UserId)> {
        self.invalidations.iter()
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Runs mutations against a shared [`ServiceContext`].
#[derive(Debug, Clone)]
pub struct MutationOrchestrator {
    ctx: Arc<ServiceContext>,
}

impl MutationOrchestrator {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Authenticate the caller and consume one request from their budget
    /// for `endpoint`.
    ///
    /// # Errors
    /// `Unauthorized` without a session; `TooManyRequests` carrying the
    /// seconds until the oldest counted request leaves the window.
    pub fn admit(&self, auth: &AuthContext, endpoint: &str) -> ApiResult<UserId> {
        let owner = auth.require_user()?;
        let limiter = self.ctx.limiter();
        if limiter.check(owner, endpoint)? {
            return Ok(owner);
        }

        let reset = limiter.reset_time(owner, endpoint)?;
        let wait_ms = u64::try_from((reset - self.ctx.clock().now()).num_milliseconds()).unwrap_or(0);
        // Round up so the hint never points at a moment that is still throttled.
        let secs = wait_ms.div_ceil(1000).max(1);
        tracing::info!(owner, endpoint, retry_after_secs = secs, "Request throttled");
        Err(ApiError::too_many_requests(Some(secs)))
    }

    /// Run `work` on `request` as one atomic unit for the authenticated
    /// caller.
    ///
    /// `validate` sees the request after the rate check and before the
    /// transaction opens. The cache families `work` registers are dropped
    /// only if the commit succeeds, while the gate is still held, so no
    /// reader can observe the new rows alongside a stale cache entry.
    pub fn run<R, T, V, W>(
        &self,
        auth: &AuthContext,
        endpoint: &str,
        request: R,
        validate: V,
        work: W,
    ) -> ApiResult<T>
    where
        V: FnOnce(&R) -> ApiResult<()>,
        W: FnOnce(&mut UnitOfWork<'_>, R) -> ApiResult<T>,
    {
        let owner = self.admit(auth, endpoint)?;
        validate(&request)?;
        self.execute(owner, endpoint, request, work)
    }

    /// The transactional half of [`MutationOrchestrator::run`] for a caller
    /// that is already trusted: no session check, no rate budget. Background
    /// jobs act on behalf of `owner` through this.
    pub fn execute<R, T, W>(
        &self,
        owner: UserId,
        endpoint: &str,
        request: R,
        work: W,
    ) -> ApiResult<T>
    where
        W: FnOnce(&mut UnitOfWork<'_>, R) -> ApiResult<T>,
    {
        let _gate = self.ctx.write_gate();
        let tx = TxGuard::begin(self.ctx.store())?;
        let mut uow = UnitOfWork::new(self.ctx.store(), self.ctx.clock(), owner);

        let output = match work(&mut uow, request) {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(owner, endpoint, error = %e, "Mutation aborted");
                return Err(e);
            }
        };
        tx.commit()?;

        let cache = self.ctx.cache();
        for &(kind, family_owner) in uow.pending_invalidations() {
            match cache.invalidate_kind(kind, family_owner) {
                Ok(removed) => tracing::trace!(%kind, owner = family_owner, removed, "Invalidated cache family"),
                Err(e) => tracing::warn!(%kind, owner = family_owner, error = %e, "Cache invalidation failed"),
            }
        }

        tracing::debug!(
            owner,
            endpoint,
            invalidated = uow.invalidations.len(),
            "Mutation committed"
        );
        Ok(output)
    }
}
