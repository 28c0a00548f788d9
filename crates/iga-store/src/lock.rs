//! Scoped identity locks.
//!
//! [`IdentityLock`] releases on drop, so every exit path (early return, `?`,
//! panic unwinding) gives the lock back. A failed release is logged and not
//! retried.

use std::sync::Arc;

use iga_core::IdentityId;
use tracing::{debug, warn};

use crate::context::{LockToken, PersistenceContext};
use crate::error::StoreResult;

/// A held lock on one identity.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct IdentityLock<C: PersistenceContext> {
    ctx: Arc<C>,
    identity: IdentityId,
    token: LockToken,
    released: bool,
}

impl<C: PersistenceContext> IdentityLock<C> {
    /// Acquires the lock with a fresh token.
    pub async fn acquire(ctx: Arc<C>, identity: IdentityId) -> StoreResult<Self> {
        Self::acquire_with(ctx, identity, LockToken::new()).await
    }

    pub async fn acquire_with(
        ctx: Arc<C>,
        identity: IdentityId,
        token: LockToken,
    ) -> StoreResult<Self> {
        ctx.acquire_lock(identity, &token).await?;
        debug!(identity_id = %identity, token = %token, "Identity locked");
        Ok(Self {
            ctx,
            identity,
            token,
            released: false,
        })
    }

    #[must_use]
    pub fn identity(&self) -> IdentityId {
        self.identity
    }

    #[must_use]
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Releases now, reporting any failure to the caller.
    pub fn release(mut self) -> StoreResult<()> {
        self.released = true;
        self.ctx.release_lock(self.identity, &self.token)
    }
}

impl<C: PersistenceContext> Drop for IdentityLock<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.ctx.release_lock(self.identity, &self.token) {
            warn!(identity_id = %self.identity, error = %e, "Failed to release identity lock");
        }
    }
}

impl<C: PersistenceContext> std::fmt::Debug for IdentityLock<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLock")
            .field("identity", &self.identity)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryContext;

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let ctx = Arc::new(InMemoryContext::new());
        let identity = IdentityId::new();
        {
            let _guard = IdentityLock::acquire(Arc::clone(&ctx), identity).await.unwrap();
            assert!(ctx.lock_holder(identity).is_some());
        }
        assert!(ctx.lock_holder(identity).is_none());
    }

    #[tokio::test]
    async fn test_guard_releases_on_error_path() {
        async fn failing(ctx: Arc<InMemoryContext>, identity: IdentityId) -> StoreResult<()> {
            let _guard = IdentityLock::acquire(ctx, identity).await?;
            Err(crate::error::StoreError::transient("boom"))
        }

        let ctx = Arc::new(InMemoryContext::new());
        let identity = IdentityId::new();
        assert!(failing(Arc::clone(&ctx), identity).await.is_err());
        assert!(ctx.lock_holder(identity).is_none());
    }

    #[tokio::test]
    async fn test_second_guard_contends() {
        let ctx = Arc::new(InMemoryContext::new());
        let identity = IdentityId::new();
        let held = IdentityLock::acquire(Arc::clone(&ctx), identity).await.unwrap();
        assert!(IdentityLock::acquire(Arc::clone(&ctx), identity).await.is_err());
        held.release().unwrap();
        assert!(IdentityLock::acquire(ctx, identity).await.is_ok());
    }
}
