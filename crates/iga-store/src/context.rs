//! The persistence context contract.
//!
//! A context is a unit-of-work session over a shared object store:
//!
//! ```text
//! save/remove ──▶ pending (session) ──commit──▶ store
//!                      │
//!            rollback / reconnect discard
//! ```
//!
//! Reads observe the session's own pending writes. Identity locks live in the
//! store, not the session, so they survive a reconnect and are visible to
//! every session.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use iga_core::{IdentityId, ObjectRef, Persistent};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::filter::{Filter, QueryOptions};

/// Opaque owner token written into an identity lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn named(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for LockToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generic object store with unit-of-work semantics.
#[async_trait]
pub trait PersistenceContext: Send + Sync + 'static {
    async fn get<T: Persistent>(&self, id: T::Id) -> StoreResult<Option<T>>;

    async fn get_by_name<T: Persistent>(&self, name: &str) -> StoreResult<Option<T>>;

    async fn search<T: Persistent>(&self, options: &QueryOptions) -> StoreResult<Vec<T>>;

    /// Projects matching ids without loading objects into the session.
    async fn search_ids<T: Persistent>(&self, options: &QueryOptions) -> StoreResult<Vec<T::Id>>;

    async fn count<T: Persistent>(&self, filter: &Filter) -> StoreResult<usize>;

    async fn save<T: Persistent>(&self, object: T) -> StoreResult<()>;

    async fn remove<T: Persistent>(&self, id: T::Id) -> StoreResult<()>;

    /// Bulk delete by query. Returns the number of objects removed.
    async fn remove_where<T: Persistent>(&self, filter: &Filter) -> StoreResult<usize>;

    /// Bulk update by query. Returns the number of objects updated.
    async fn update_where<T, F>(&self, filter: &Filter, update: F) -> StoreResult<usize>
    where
        T: Persistent,
        F: Fn(&mut T) + Send + Sync;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;

    /// Clears the session cache. Pending writes are kept.
    fn decache(&self);

    fn decache_object(&self, object: ObjectRef);

    /// Drops the session and starts a fresh one. Pending writes are lost.
    async fn reconnect(&self) -> StoreResult<()>;

    /// Opens an independent session over the same store.
    async fn new_session(&self) -> StoreResult<Self>
    where
        Self: Sized;

    /// Takes the lock on an identity. Re-acquiring with the same token succeeds.
    async fn acquire_lock(&self, identity: IdentityId, token: &LockToken) -> StoreResult<()>;

    /// Releases the lock on an identity. Synchronous so guards can release on drop.
    fn release_lock(&self, identity: IdentityId, token: &LockToken) -> StoreResult<()>;

    async fn find_one<T: Persistent>(&self, filter: Filter) -> StoreResult<Option<T>> {
        let options = QueryOptions::filter(filter).with_limit(1);
        Ok(self.search::<T>(&options).await?.into_iter().next())
    }
}
