//! Deletion of policies, scorecards, tasks and entitlement catalog objects.

use iga_core::{
    Application, ApplicationScorecard, LocalizedAttribute, ManagedAttribute, Policy,
    PolicyViolation, Scorecard, SodConstraint, Target, TargetAssociation, TaskDefinition,
    TaskResult,
};
use iga_store::{Filter, PersistenceContext};
use tracing::instrument;

use crate::error::TerminatorResult;
use crate::terminator::Terminator;

impl<C: PersistenceContext> Terminator<C> {
    #[instrument(skip(self, attribute), fields(managed_attribute_id = %attribute.id, value = %attribute.value))]
    pub(crate) async fn visit_managed_attribute(
        &self,
        attribute: ManagedAttribute,
    ) -> TerminatorResult<()> {
        let id = attribute.id;
        self.update_each::<ManagedAttribute, _>(Filter::contains("inheritance", id), move |other| {
            other.inheritance.retain(|i| *i != id)
        })
        .await?;
        self.remove_where::<TargetAssociation>(Filter::eq("owner_id", id)).await?;
        self.remove_where::<LocalizedAttribute>(Filter::eq("target_id", id)).await?;
        self.inner_delete::<ManagedAttribute>(id).await
    }

    pub(crate) async fn visit_target(&self, target: Target) -> TerminatorResult<()> {
        self.remove_where::<TargetAssociation>(Filter::eq("target", target.id))
            .await?;
        self.inner_delete::<Target>(target.id).await
    }

    pub(crate) async fn visit_policy(&self, policy: Policy) -> TerminatorResult<()> {
        let id = policy.id;
        self.delete_where::<SodConstraint>(Filter::eq("policy", id)).await?;
        self.update_each::<PolicyViolation, _>(Filter::eq("policy", id), |v| v.policy = None)
            .await?;
        self.inner_delete::<Policy>(id).await
    }

    pub(crate) async fn visit_scorecard(&self, scorecard: Scorecard) -> TerminatorResult<()> {
        let id = scorecard.id;
        self.update_identities(Filter::eq("scorecard", id), None, |i| i.scorecard = None)
            .await?;
        self.inner_delete::<Scorecard>(id).await
    }

    pub(crate) async fn visit_application_scorecard(
        &self,
        scorecard: ApplicationScorecard,
    ) -> TerminatorResult<()> {
        let id = scorecard.id;
        self.update_each::<Application, _>(Filter::eq("scorecard", id), |a| a.scorecard = None)
            .await?;
        self.inner_delete::<ApplicationScorecard>(id).await
    }

    pub(crate) async fn visit_task_definition(
        &self,
        definition: TaskDefinition,
    ) -> TerminatorResult<()> {
        let id = definition.id;
        self.delete_where::<TaskResult>(Filter::eq("definition", id)).await?;
        self.inner_delete::<TaskDefinition>(id).await
    }
}
