//! Group record reconciliation.

use chrono::Utc;
use iga_core::{Application, ApplicationId, ManagedAttribute, ManagedAttributeId, Schema};
use iga_store::{Filter, PersistenceContext};
use tracing::{debug, info};

use super::hierarchy::prune_cycles;
use crate::aggregator::Aggregator;
use crate::error::{AggregationError, AggregationResult};
use crate::record::ResourceObject;
use crate::run::{ApplicationRun, RunContext};
use crate::statistics::RecordOutcome;

/// Filter selecting the managed attribute for one attribute value.
#[must_use]
pub fn group_filter(application: ApplicationId, attribute: &str, value: &str) -> Filter {
    Filter::and([
        Filter::eq("application", application),
        Filter::eq("attribute", attribute),
        Filter::eq("value", value),
    ])
}

impl<C: PersistenceContext> Aggregator<C> {
    /// Creates, updates or deletes the managed attribute behind a group
    /// record. Returns the saved group, or `None` when nothing remains.
    pub(crate) async fn reconcile_group(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        record: &ResourceObject,
    ) -> AggregationResult<Option<ManagedAttribute>> {
        let application = app_run.application.clone();
        let object_type = record.object_type.as_str();
        let schema = application
            .group_schema(object_type)
            .cloned()
            .ok_or_else(|| AggregationError::missing_schema(&application.name, object_type))?;

        let Some(native) = record.native() else {
            if record.is_delete() {
                app_run.count(&application.name, object_type, RecordOutcome::Ignored);
                return Ok(None);
            }
            return Err(AggregationError::missing_native_identity(object_type));
        };

        let attribute = application.group_attribute_for(object_type);
        let existing = self
            .ctx
            .find_one::<ManagedAttribute>(group_filter(application.id, &attribute, native))
            .await?;

        if record.is_delete() {
            let Some(group) = existing else {
                debug!(application = %application.name, native_identity = native, "Deleted group was never aggregated");
                app_run.count(&application.name, object_type, RecordOutcome::Ignored);
                return Ok(None);
            };
            self.record_deleted_object(&application, record, native).await?;
            self.terminator.delete(group).await?;
            app_run.stats.groups_deleted += 1;
            app_run.count(&application.name, object_type, RecordOutcome::Deleted);
            info!(application = %application.name, value = native, "Group deleted");
            self.mark_restart(run, app_run, native, None).await?;
            return Ok(None);
        }

        let created = existing.is_none();
        let mut group = existing.unwrap_or_else(|| {
            ManagedAttribute::stub(application.id, object_type, attribute.as_str(), native)
        });
        self.refresh_group(run, app_run, &application, &schema, &mut group, record)
            .await?;
        if let Some(hook) = &self.group_hook {
            group = hook.refresh(&application, group, record).await?;
        }
        self.ctx.save(group.clone()).await?;
        self.ctx.commit().await?;

        if created {
            app_run.stats.groups_created += 1;
            app_run.count(&application.name, object_type, RecordOutcome::Created);
        } else {
            app_run.stats.groups_updated += 1;
            app_run.count(&application.name, object_type, RecordOutcome::Updated);
        }
        debug!(application = %application.name, value = native, created, "Group refreshed");
        self.mark_restart(run, app_run, native, Some(created)).await?;
        Ok(Some(group))
    }

    async fn refresh_group(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        application: &Application,
        schema: &Schema,
        group: &mut ManagedAttribute,
        record: &ResourceObject,
    ) -> AggregationResult<()> {
        let partial = record.is_partial();
        if let Some(display_name) = &record.display_name {
            group.display_name = Some(display_name.clone());
        }
        if let Some(uuid) = &record.uuid {
            group.uuid = Some(uuid.clone());
        }

        let mut attributes = record.attributes.clone();
        for structural in [&schema.member_attribute, &schema.hierarchy_attribute]
            .into_iter()
            .flatten()
        {
            attributes.remove(structural);
        }
        if partial {
            group.attributes.extend(attributes);
        } else {
            group.attributes = attributes;
        }

        for definition in &schema.attributes {
            let Some(slot) = definition.correlation_key else {
                continue;
            };
            match record.string_attribute(&definition.name) {
                Some(value) => {
                    group.correlation_keys.insert(slot, value);
                }
                None if !partial => {
                    group.correlation_keys.remove(&slot);
                }
                None => {}
            }
        }

        if let Some(name) = &self.config.group_description_attribute {
            if let Some(description) = record.string_attribute(name) {
                group.description = Some(description);
            }
        }
        if let Some(name) = &self.config.group_classification_attribute {
            if record.attributes.contains_key(name) {
                group.classifications = record.values(name);
            }
        }

        if let Some(hierarchy) = &schema.hierarchy_attribute {
            if !partial || record.attributes.contains_key(hierarchy) {
                let parents = self.resolve_parents(application, group, &record.values(hierarchy)).await?;
                group.inheritance = if self.config.detect_cycles {
                    let (kept, pruned) = prune_cycles(self.ctx.as_ref(), group.id, parents).await?;
                    if !pruned.is_empty() {
                        app_run.stats.cycles_pruned += u32::try_from(pruned.len()).unwrap_or(u32::MAX);
                        run.state.messages.warn(format!(
                            "{}: group {} would inherit from itself, {} parent(s) dropped",
                            application.name,
                            group.value,
                            pruned.len()
                        ));
                    }
                    kept
                } else {
                    parents
                };
            }
        }

        let now = Utc::now();
        group.last_refresh = Some(now);
        group.modified = Some(now);
        Ok(())
    }

    /// Resolves parent values to managed attribute ids, creating stubs for
    /// parents not aggregated yet.
    async fn resolve_parents(
        &self,
        application: &Application,
        group: &ManagedAttribute,
        values: &[String],
    ) -> AggregationResult<Vec<ManagedAttributeId>> {
        let mut parents = Vec::with_capacity(values.len());
        for value in values {
            if *value == group.value {
                parents.push(group.id);
                continue;
            }
            let existing = self
                .ctx
                .find_one::<ManagedAttribute>(group_filter(application.id, &group.attribute, value))
                .await?;
            let parent = match existing {
                Some(parent) => parent.id,
                None => {
                    let stub = ManagedAttribute::stub(
                        application.id,
                        group.object_type.as_str(),
                        group.attribute.as_str(),
                        value.as_str(),
                    );
                    let id = stub.id;
                    self.ctx.save(stub).await?;
                    debug!(application = %application.name, value = %value, "Parent group stub created");
                    id
                }
            };
            parents.push(parent);
        }
        Ok(parents)
    }
}
