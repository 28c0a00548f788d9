//! Identity and link deletion.

use iga_core::{
    Application, Bundle, CertificationDefinition, DynamicScope, ExternalAttribute, ExternalOwner,
    Identity, IdentityArchive, IdentityEntitlement, IdentityHistoryItem, IdentityId,
    IdentitySnapshot, Link, ManagedAttribute, ObjectKind, ObjectRef, Policy, PolicyViolation,
    Profile, ProvisioningRequest, Request, Scorecard, SodConstraint, TargetAssociation,
    TaskDefinition, TaskResult, WorkItem, WorkItemConfig,
};
use iga_store::{Filter, PersistenceContext, QueryOptions};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::TerminatorResult;
use crate::terminator::Terminator;

impl<C: PersistenceContext> Terminator<C> {
    #[instrument(skip(self, identity), fields(identity_id = %identity.id, identity = %identity.name))]
    pub(crate) async fn visit_identity(&self, identity: Identity) -> TerminatorResult<()> {
        if identity.protected {
            info!("Identity is protected, not deleting");
            return Ok(());
        }
        let id = identity.id;

        if identity.workgroup {
            let members = self
                .update_identities(Filter::contains("workgroups", id), Some(id), move |member| {
                    member.workgroups.retain(|w| *w != id)
                })
                .await?;
            debug!(members, "Workgroup memberships removed");
        }

        self.detach_identity_scorecard(id).await?;

        let links = self
            .ctx
            .search::<Link>(&QueryOptions::filter(Filter::or([
                Filter::eq("identity", id),
                Filter::id_in(&identity.links),
            ])))
            .await?;
        for link in links {
            self.delete_link(link, false).await?;
        }

        self.update_identities(Filter::eq("owner", id), Some(id), |o| o.owner = None)
            .await?;
        self.prune_owner::<Bundle>(id).await?;
        self.prune_owner::<Application>(id).await?;
        self.prune_owner::<TaskResult>(id).await?;
        self.prune_owner::<Profile>(id).await?;
        self.prune_owner::<CertificationDefinition>(id).await?;
        self.prune_owner::<Policy>(id).await?;
        self.prune_owner::<SodConstraint>(id).await?;
        self.prune_owner::<ManagedAttribute>(id).await?;
        self.prune_owner::<PolicyViolation>(id).await?;
        self.prune_owner::<TaskDefinition>(id).await?;

        self.reassign_work_items(id).await?;
        self.delete_where::<Request>(Filter::eq("owner", id)).await?;
        self.delete_where::<WorkItem>(Filter::eq("requester", id)).await?;
        self.update_each::<WorkItem, _>(Filter::eq("assignee", id), |w| w.assignee = None)
            .await?;
        self.update_each::<Policy, _>(Filter::eq("violation_owner", id), |p| {
            p.violation_owner = None
        })
        .await?;
        self.update_each::<SodConstraint, _>(Filter::eq("violation_owner", id), |c| {
            c.violation_owner = None
        })
        .await?;

        self.delete_where::<PolicyViolation>(Filter::eq("identity", id)).await?;
        self.delete_where::<IdentitySnapshot>(Filter::eq("identity_id", id)).await?;
        self.delete_where::<IdentityHistoryItem>(Filter::eq("identity", id)).await?;
        self.delete_where::<Scorecard>(Filter::eq("identity", id)).await?;

        self.update_identities(Filter::eq("manager", id), Some(id), |s| s.manager = None)
            .await?;
        self.update_identities(Filter::eq("administrator", id), Some(id), |s| {
            s.administrator = None
        })
        .await?;
        self.update_identities(Filter::contains("extended", id), Some(id), move |s| {
            s.extended.retain(|_, v| *v != id)
        })
        .await?;

        self.update_each::<WorkItemConfig, _>(Filter::contains("owners", id), move |c| {
            c.owners.retain(|o| *o != id)
        })
        .await?;
        self.update_each::<DynamicScope, _>(
            Filter::or([
                Filter::contains("inclusions", id),
                Filter::contains("exclusions", id),
            ]),
            move |scope| {
                scope.inclusions.retain(|i| *i != id);
                scope.exclusions.retain(|i| *i != id);
            },
        )
        .await?;

        self.remove_external_attributes(ExternalOwner::Identity, id.into())
            .await?;
        self.delete_where::<IdentityArchive>(Filter::eq("source_id", id)).await?;
        self.delete_where::<ProvisioningRequest>(Filter::eq("identity", id)).await?;
        self.remove_where::<IdentityEntitlement>(Filter::eq("identity", id)).await?;
        self.remove_where::<TargetAssociation>(Filter::eq("owner_id", id)).await?;

        self.inner_delete::<Identity>(id).await
    }

    pub(crate) async fn visit_link(&self, link: Link) -> TerminatorResult<()> {
        self.delete_link(link, false).await
    }

    /// Deletes a link and detaches it from its identity.
    ///
    /// The holding identity is not locked; callers that reach here from an
    /// aggregation already hold it. With `preserve_entitlements` the
    /// identity's entitlement index rows for the account are left in place.
    #[instrument(skip(self, link), fields(link_id = %link.id, native_identity = %link.native_identity))]
    pub async fn delete_link(&self, link: Link, preserve_entitlements: bool) -> TerminatorResult<()> {
        let link_id = link.id;

        let holders = self
            .ctx
            .search::<Identity>(&QueryOptions::filter(Filter::contains("links", link_id)))
            .await?;
        if holders.len() > 1 {
            warn!(holders = holders.len(), "Link is held by more than one identity");
        }
        let holder_ids: Vec<IdentityId> = holders.iter().map(|h| h.id).collect();
        for mut holder in holders {
            holder.links.retain(|l| *l != link_id);
            self.ctx.save(holder).await?;
        }

        if !preserve_entitlements {
            if let Some(identity) = link.identity {
                self.remove_where::<IdentityEntitlement>(Filter::and([
                    Filter::eq("identity", identity),
                    Filter::eq("application", link.application),
                    Filter::eq("native_identity", link.native_identity.as_str()),
                ]))
                .await?;
            }
        }

        self.remove_external_attributes(ExternalOwner::Link, link_id.into())
            .await?;
        self.inner_delete::<Link>(link_id).await?;

        if !self.config.no_decache {
            for holder in holder_ids {
                self.ctx
                    .decache_object(ObjectRef::new(ObjectKind::Identity, holder));
            }
        }
        Ok(())
    }

    pub(crate) async fn remove_external_attributes(
        &self,
        owner_kind: ExternalOwner,
        object_id: Uuid,
    ) -> TerminatorResult<usize> {
        self.remove_where::<ExternalAttribute>(Filter::and([
            Filter::eq("owner_kind", owner_kind.as_str()),
            Filter::eq("object_id", object_id),
        ]))
        .await
    }

    async fn detach_identity_scorecard(&self, id: IdentityId) -> TerminatorResult<()> {
        if let Some(mut identity) = self.ctx.get::<Identity>(id).await? {
            if identity.scorecard.take().is_some() {
                self.ctx.save(identity).await?;
                self.ctx.commit().await?;
            }
        }
        Ok(())
    }

    /// Hands work items owned by `id` to the administrator identity, or
    /// leaves them unowned when there is none.
    async fn reassign_work_items(&self, id: IdentityId) -> TerminatorResult<usize> {
        let admin = self
            .ctx
            .get_by_name::<Identity>(&self.config.admin_identity)
            .await?
            .map(|admin| admin.id)
            .filter(|admin| *admin != id);
        if admin.is_none() {
            debug!(admin = %self.config.admin_identity, "No administrator to inherit work items");
        }
        self.update_each::<WorkItem, _>(Filter::eq("owner", id), move |w| w.owner = admin)
            .await
    }
}
