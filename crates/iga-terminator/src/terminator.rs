//! # Terminator
//!
//! Deletes an object together with everything that refers to it.
//!
//! ```text
//! delete_object(object)
//!   └── visit_<kind>
//!         ├── null optional references held by survivors
//!         ├── prune ids out of survivor collections
//!         ├── delete dependants (recursing through delete_object)
//!         └── inner_delete: remove, commit, decache
//! ```
//!
//! Every dependant update is committed as it happens, so a failure part way
//! through leaves a consistent, partially pruned graph and the object itself
//! in place. Running the deletion again finishes the job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use iga_core::{
    ActivityDataSource, BundleArchive, CertificationDefinition, Configuration, DeletedObject,
    DynamicScope, ExternalAttribute, Form, Identity, IdentityArchive, IdentityEntitlement,
    IdentityHistoryItem, IdentityId, IdentitySnapshot, IntegrationConfig, LocalizedAttribute,
    Object, ObjectKind, ObjectRef, Owned, Persistent, PolicyViolation, Profile,
    ProvisioningRequest, Request, RoleIndex, SodConstraint, TargetAssociation, TaskResult,
    WorkItem, WorkItemConfig, Workflow,
};
use iga_store::{Filter, IdentityLock, PersistenceContext, ProjectionIterator, QueryOptions};
use tracing::{debug, info, instrument};

use crate::config::TerminatorConfig;
use crate::error::{TerminatorError, TerminatorResult};

/// Boxed future returned by the recursive entry point.
pub type DeleteFuture<'a> = Pin<Box<dyn Future<Output = TerminatorResult<()>> + Send + 'a>>;

/// Cascading deleter bound to one persistence context.
pub struct Terminator<C: PersistenceContext> {
    pub(crate) ctx: Arc<C>,
    pub(crate) config: TerminatorConfig,
    terminate: Arc<AtomicBool>,
    deleted: AtomicUsize,
}

impl<C: PersistenceContext> Terminator<C> {
    #[must_use]
    pub fn new(ctx: Arc<C>) -> Self {
        Self {
            ctx,
            config: TerminatorConfig::default(),
            terminate: Arc::new(AtomicBool::new(false)),
            deleted: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TerminatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a termination flag with the caller, typically a running task.
    #[must_use]
    pub fn with_terminate_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.terminate = flag;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TerminatorConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &Arc<C> {
        &self.ctx
    }

    /// Asks bulk loops to stop after the current object.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Objects removed by this deleter, dependants included.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted.load(Ordering::Relaxed)
    }

    /// Deletes any object, cascading according to its kind.
    pub fn delete_object(&self, object: Object) -> DeleteFuture<'_> {
        Box::pin(async move {
            if self.config.trace {
                info!(object = %object.object_ref(), name = ?object.name(), "Deleting object");
            }
            self.dispatch(object).await
        })
    }

    pub async fn delete<T: Persistent>(&self, object: T) -> TerminatorResult<()> {
        self.delete_object(object.into()).await
    }

    /// Loads and deletes an object. A missing object is an error.
    pub async fn delete_by_id<T: Persistent>(&self, id: T::Id) -> TerminatorResult<()> {
        let object = self
            .ctx
            .get::<T>(id)
            .await?
            .ok_or_else(|| TerminatorError::NotFound {
                kind: T::KIND,
                id: id.into(),
            })?;
        self.delete(object).await
    }

    /// Deletes every object matching `filter`, one at a time.
    ///
    /// Returns the number of objects deleted. Stops early when terminated.
    #[instrument(skip(self, filter), fields(kind = %T::KIND))]
    pub async fn delete_where<T: Persistent>(&self, filter: Filter) -> TerminatorResult<usize> {
        let mut objects =
            ProjectionIterator::<T>::query(self.ctx.as_ref(), &QueryOptions::filter(filter))
                .await?;
        let mut count = 0usize;
        while let Some(object) = objects.fetch_next(self.ctx.as_ref()).await? {
            if self.is_terminated() {
                info!(deleted = count, "Deletion loop terminated");
                break;
            }
            self.delete(object).await?;
            count += 1;
            self.periodic_decache(count);
        }
        Ok(count)
    }

    async fn dispatch(&self, object: Object) -> TerminatorResult<()> {
        match object {
            Object::Identity(o) => self.visit_identity(o).await,
            Object::Link(o) => self.visit_link(o).await,
            Object::Application(o) => self.visit_application(o).await,
            Object::ManagedAttribute(o) => self.visit_managed_attribute(o).await,
            Object::Bundle(o) => self.visit_bundle(o).await,
            Object::Rule(o) => self.visit_rule(o).await,
            Object::Policy(o) => self.visit_policy(o).await,
            Object::Scorecard(o) => self.visit_scorecard(o).await,
            Object::ApplicationScorecard(o) => self.visit_application_scorecard(o).await,
            Object::RoleScorecard(o) => self.visit_role_scorecard(o).await,
            Object::TaskDefinition(o) => self.visit_task_definition(o).await,
            Object::Target(o) => self.visit_target(o).await,
            // Nothing refers to these.
            Object::WorkItem(o) => self.inner_delete::<WorkItem>(o.id).await,
            Object::SodConstraint(o) => self.inner_delete::<SodConstraint>(o.id).await,
            Object::PolicyViolation(o) => self.inner_delete::<PolicyViolation>(o.id).await,
            Object::IdentitySnapshot(o) => self.inner_delete::<IdentitySnapshot>(o.id).await,
            Object::IdentityHistoryItem(o) => self.inner_delete::<IdentityHistoryItem>(o.id).await,
            Object::IdentityEntitlement(o) => self.inner_delete::<IdentityEntitlement>(o.id).await,
            Object::ExternalAttribute(o) => self.inner_delete::<ExternalAttribute>(o.id).await,
            Object::IdentityArchive(o) => self.inner_delete::<IdentityArchive>(o.id).await,
            Object::BundleArchive(o) => self.inner_delete::<BundleArchive>(o.id).await,
            Object::Profile(o) => self.inner_delete::<Profile>(o.id).await,
            Object::TaskResult(o) => self.inner_delete::<TaskResult>(o.id).await,
            Object::Request(o) => self.inner_delete::<Request>(o.id).await,
            Object::IntegrationConfig(o) => self.inner_delete::<IntegrationConfig>(o.id).await,
            Object::RoleIndex(o) => self.inner_delete::<RoleIndex>(o.id).await,
            Object::Workflow(o) => self.inner_delete::<Workflow>(o.id).await,
            Object::TargetAssociation(o) => self.inner_delete::<TargetAssociation>(o.id).await,
            Object::DeletedObject(o) => self.inner_delete::<DeletedObject>(o.id).await,
            Object::Configuration(o) => self.inner_delete::<Configuration>(o.id).await,
            Object::WorkItemConfig(o) => self.inner_delete::<WorkItemConfig>(o.id).await,
            Object::DynamicScope(o) => self.inner_delete::<DynamicScope>(o.id).await,
            Object::ProvisioningRequest(o) => self.inner_delete::<ProvisioningRequest>(o.id).await,
            Object::ActivityDataSource(o) => self.inner_delete::<ActivityDataSource>(o.id).await,
            Object::CertificationDefinition(o) => self.inner_delete::<CertificationDefinition>(o.id).await,
            Object::Form(o) => self.inner_delete::<Form>(o.id).await,
            Object::LocalizedAttribute(o) => self.inner_delete::<LocalizedAttribute>(o.id).await,
        }
    }

    /// Removes the object itself, commits and drops it from the cache.
    pub(crate) async fn inner_delete<T: Persistent>(&self, id: T::Id) -> TerminatorResult<()> {
        self.ctx.remove::<T>(id).await?;
        self.ctx.commit().await?;
        if !self.config.no_decache {
            self.ctx.decache_object(ObjectRef::new(T::KIND, id));
        }
        self.deleted.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %T::KIND, id = %id, "Object removed");
        Ok(())
    }

    /// Bulk removal of leaf objects nothing else refers to.
    pub(crate) async fn remove_where<T: Persistent>(&self, filter: Filter) -> TerminatorResult<usize> {
        let removed = self.ctx.remove_where::<T>(&filter).await?;
        if removed > 0 {
            self.ctx.commit().await?;
            self.deleted.fetch_add(removed, Ordering::Relaxed);
            debug!(kind = %T::KIND, removed, "Dependants removed");
        }
        Ok(removed)
    }

    /// Fetches each match, applies `update`, saves and commits it.
    pub(crate) async fn update_each<T, F>(&self, filter: Filter, mut update: F) -> TerminatorResult<usize>
    where
        T: Persistent,
        F: FnMut(&mut T) + Send,
    {
        let mut objects =
            ProjectionIterator::<T>::query(self.ctx.as_ref(), &QueryOptions::filter(filter))
                .await?;
        let mut count = 0usize;
        while let Some(mut object) = objects.fetch_next(self.ctx.as_ref()).await? {
            let reference = object.object_ref();
            update(&mut object);
            self.ctx.save(object).await?;
            self.ctx.commit().await?;
            if !self.config.no_decache {
                self.ctx.decache_object(reference);
            }
            count += 1;
        }
        if count > 0 {
            debug!(kind = %T::KIND, updated = count, "Dependants updated");
        }
        Ok(count)
    }

    /// Like [`update_each`](Self::update_each) for identities, holding each
    /// identity's lock for the duration of its update unless locking is off.
    pub(crate) async fn update_identities<F>(
        &self,
        filter: Filter,
        skip: Option<IdentityId>,
        mut update: F,
    ) -> TerminatorResult<usize>
    where
        F: FnMut(&mut Identity) + Send,
    {
        let mut ids =
            ProjectionIterator::<Identity>::query(self.ctx.as_ref(), &QueryOptions::filter(filter))
                .await?;
        let mut count = 0usize;
        while let Some(id) = ids.next_id() {
            if Some(id) == skip {
                continue;
            }
            let lock = if self.config.no_locking {
                None
            } else {
                Some(IdentityLock::acquire(Arc::clone(&self.ctx), id).await?)
            };
            // Re-read under the lock.
            let Some(mut identity) = self.ctx.get::<Identity>(id).await? else {
                continue;
            };
            update(&mut identity);
            self.ctx.save(identity).await?;
            self.ctx.commit().await?;
            if let Some(lock) = lock {
                lock.release()?;
            }
            if !self.config.no_decache {
                self.ctx.decache_object(ObjectRef::new(ObjectKind::Identity, id));
            }
            count += 1;
        }
        Ok(count)
    }

    /// Clears the owner of every object of kind `T` owned by `owner`.
    pub(crate) async fn prune_owner<T: Owned>(&self, owner: IdentityId) -> TerminatorResult<usize> {
        self.update_each::<T, _>(Filter::eq("owner", owner), |object| object.set_owner(None))
            .await
    }

    fn periodic_decache(&self, processed: usize) {
        if self.config.no_decache || self.config.decache_interval == 0 {
            return;
        }
        if processed % self.config.decache_interval == 0 {
            self.ctx.decache();
        }
    }
}

impl<C: PersistenceContext> std::fmt::Debug for Terminator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminator")
            .field("config", &self.config)
            .field("terminated", &self.is_terminated())
            .field("deleted", &self.deleted_count())
            .finish()
    }
}
