//! Managed attribute promotion during account aggregation.

use std::collections::{HashMap, HashSet};

use iga_core::{Application, ApplicationId, Link, ManagedAttribute};
use iga_store::PersistenceContext;
use tracing::debug;

use super::reconciler::group_filter;
use crate::aggregator::Aggregator;
use crate::error::AggregationResult;
use crate::run::ApplicationRun;

/// Values already known to exist, per application.
#[derive(Debug, Clone, Default)]
pub struct PromotionCache {
    known: HashMap<ApplicationId, HashSet<(String, String)>>,
}

impl PromotionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, application: ApplicationId, attribute: &str, value: &str) -> bool {
        self.known
            .get(&application)
            .is_some_and(|values| values.contains(&(attribute.to_string(), value.to_string())))
    }

    pub fn insert(&mut self, application: ApplicationId, attribute: &str, value: &str) {
        self.known
            .entry(application)
            .or_default()
            .insert((attribute.to_string(), value.to_string()));
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }
}

impl<C: PersistenceContext> Aggregator<C> {
    /// Creates a stub managed attribute for every value of a managed account
    /// attribute that has none yet.
    pub(crate) async fn promote_values(
        &self,
        cache: &mut PromotionCache,
        app_run: &mut ApplicationRun<C>,
        application: &Application,
        link: &Link,
    ) -> AggregationResult<()> {
        for attribute in application.account_schema.managed_attributes() {
            let Some(values) = link.attributes.get(&attribute.name) else {
                continue;
            };
            for value in iga_core::values_as_strings(values) {
                if cache.contains(application.id, &attribute.name, &value) {
                    continue;
                }
                let existing = self
                    .ctx
                    .find_one::<ManagedAttribute>(group_filter(application.id, &attribute.name, &value))
                    .await?;
                if existing.is_none() {
                    let object_type = attribute
                        .schema_object_type
                        .clone()
                        .unwrap_or_else(|| attribute.name.clone());
                    self.ctx
                        .save(ManagedAttribute::stub(application.id, object_type, attribute.name.clone(), value.clone()))
                        .await?;
                    app_run.stats.managed_attributes_promoted += 1;
                    debug!(application = %application.name, attribute = %attribute.name, value = %value, "Managed attribute promoted");
                }
                cache.insert(application.id, &attribute.name, &value);
            }
        }
        Ok(())
    }
}
