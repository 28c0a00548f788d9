//! Role deletion.

use iga_core::{
    Bundle, BundleArchive, IntegrationConfig, LocalizedAttribute, RoleIndex, RoleScorecard,
    SodConstraint, TargetAssociation,
};
use iga_store::{Filter, PersistenceContext};
use tracing::{debug, instrument};

use crate::error::TerminatorResult;
use crate::terminator::Terminator;

impl<C: PersistenceContext> Terminator<C> {
    #[instrument(skip(self, bundle), fields(bundle_id = %bundle.id, bundle = %bundle.name))]
    pub(crate) async fn visit_bundle(&self, bundle: Bundle) -> TerminatorResult<()> {
        let id = bundle.id;

        if let Some(mut current) = self.ctx.get::<Bundle>(id).await? {
            if current.scorecard.take().is_some() {
                self.ctx.save(current).await?;
                self.ctx.commit().await?;
            }
        }

        self.update_each::<Bundle, _>(
            Filter::or([
                Filter::contains("inheritance", id),
                Filter::contains("permits", id),
                Filter::contains("requirements", id),
            ]),
            move |other| {
                other.inheritance.retain(|b| *b != id);
                other.permits.retain(|b| *b != id);
                other.requirements.retain(|b| *b != id);
            },
        )
        .await?;

        let holders = self
            .update_identities(
                Filter::or([
                    Filter::contains("detected_roles", id),
                    Filter::contains("assigned_roles", id),
                ]),
                None,
                move |identity| {
                    identity.detected_roles.retain(|b| *b != id);
                    identity.assigned_roles.retain(|b| *b != id);
                },
            )
            .await?;
        debug!(holders, "Role removed from identities");

        self.delete_where::<RoleScorecard>(Filter::eq("role", id)).await?;
        self.delete_where::<RoleIndex>(Filter::eq("bundle", id)).await?;

        self.update_each::<IntegrationConfig, _>(
            Filter::or([
                Filter::contains("synchronized_roles", id),
                Filter::eq("role_sync_container", id),
            ]),
            move |config| {
                config.synchronized_roles.retain(|b| *b != id);
                if config.role_sync_container == Some(id) {
                    config.role_sync_container = None;
                }
            },
        )
        .await?;

        self.update_each::<SodConstraint, _>(
            Filter::or([
                Filter::contains("left_bundles", id),
                Filter::contains("right_bundles", id),
            ]),
            move |constraint| {
                constraint.left_bundles.retain(|b| *b != id);
                constraint.right_bundles.retain(|b| *b != id);
            },
        )
        .await?;

        self.delete_where::<BundleArchive>(Filter::eq("source_id", id)).await?;
        self.remove_where::<TargetAssociation>(Filter::eq("owner_id", id)).await?;
        self.remove_where::<LocalizedAttribute>(Filter::eq("target_id", id)).await?;

        self.inner_delete::<Bundle>(id).await
    }

    pub(crate) async fn visit_role_scorecard(&self, scorecard: RoleScorecard) -> TerminatorResult<()> {
        let id = scorecard.id;
        self.update_each::<Bundle, _>(Filter::eq("scorecard", id), |b| b.scorecard = None)
            .await?;
        self.inner_delete::<RoleScorecard>(id).await
    }
}
