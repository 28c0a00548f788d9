//! Rule deletion. Rules are referenced from many places, none of which own
//! them, so deletion only nulls or prunes.

use std::iter;

use iga_core::{
    ActivityDataSource, Application, Bundle, IntegrationConfig, Policy, Rule, RuleId, Workflow,
};
use iga_store::{Filter, PersistenceContext};
use tracing::{debug, instrument};

use crate::error::TerminatorResult;
use crate::terminator::Terminator;

impl<C: PersistenceContext> Terminator<C> {
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule = %rule.name))]
    pub(crate) async fn visit_rule(&self, rule: Rule) -> TerminatorResult<()> {
        let id = rule.id;

        self.update_each::<Rule, _>(Filter::contains("referenced_rules", id), move |r| {
            r.referenced_rules.retain(|x| *x != id)
        })
        .await?;
        self.update_each::<Workflow, _>(Filter::contains("rule_libraries", id), move |w| {
            w.rule_libraries.retain(|x| *x != id)
        })
        .await?;
        self.update_each::<ActivityDataSource, _>(
            Filter::or([
                Filter::eq("correlation_rule", id),
                Filter::eq("transformation_rule", id),
            ]),
            move |source| {
                clear(&mut source.correlation_rule, id);
                clear(&mut source.transformation_rule, id);
            },
        )
        .await?;
        let applications = self
            .update_each::<Application, _>(Filter::contains("rules", id), move |a| {
                clear_application_rules(a, id)
            })
            .await?;
        debug!(applications, "Rule detached from applications");

        self.update_each::<Policy, _>(Filter::eq("violation_rule", id), |p| {
            p.violation_rule = None
        })
        .await?;
        self.update_each::<Bundle, _>(Filter::eq("selector_rule", id), |b| b.selector_rule = None)
            .await?;
        self.update_each::<IntegrationConfig, _>(Filter::eq("plan_initializer", id), |c| {
            c.plan_initializer = None
        })
        .await?;

        self.inner_delete::<Rule>(id).await
    }
}

fn clear(slot: &mut Option<RuleId>, rule: RuleId) {
    if *slot == Some(rule) {
        *slot = None;
    }
}

fn clear_application_rules(application: &mut Application, rule: RuleId) {
    clear(&mut application.correlation_rule, rule);
    clear(&mut application.creation_rule, rule);
    clear(&mut application.customization_rule, rule);
    clear(&mut application.managed_attribute_customization_rule, rule);
    for schema in iter::once(&mut application.account_schema).chain(application.group_schemas.iter_mut()) {
        clear(&mut schema.creation_rule, rule);
        clear(&mut schema.customization_rule, rule);
        clear(&mut schema.refresh_rule, rule);
    }
}
