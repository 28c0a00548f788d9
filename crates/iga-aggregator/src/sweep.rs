//! Delete detection.
//!
//! After a complete, error-free full pass, every link of the aggregated
//! applications that existed before the pass started and was not refreshed
//! during it belongs to an account the source no longer has.

use chrono::{DateTime, Utc};
use iga_core::{Application, ApplicationId, IdentityId, Link, ManagedAttribute};
use iga_store::{Filter, IdentityLock, PersistenceContext, ProjectionIterator, QueryOptions};
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::AggregationType;
use crate::error::{AggregationError, AggregationResult};
use crate::run::RunContext;
use crate::statistics::{AggregationStatistics, RecordOutcome};

/// Objects of `applications` created before `pass_start` and not refreshed
/// since.
#[must_use]
pub fn stale_filter(applications: &[ApplicationId], pass_start: DateTime<Utc>) -> Filter {
    Filter::and([
        Filter::or(applications.iter().map(|id| Filter::eq("application", *id))),
        Filter::lt("created", pass_start),
        Filter::or([
            Filter::lt("last_refresh", pass_start),
            Filter::is_null("last_refresh"),
        ]),
    ])
}

impl<C: PersistenceContext> Aggregator<C> {
    /// Why delete detection cannot run for this pass, if it cannot.
    fn sweep_blocker(&self, run: &RunContext<C>) -> Option<&'static str> {
        if !self.config.check_deleted {
            Some("not requested")
        } else if run.state.terminated || self.is_terminated() {
            Some("run terminated")
        } else if run.manual {
            Some("manual aggregation")
        } else if self.config.delta {
            Some("delta aggregation")
        } else if self.config.max_accounts.is_some() {
            Some("account limit set")
        } else if run.state.check_deleted_cancelled {
            Some("errors during aggregation")
        } else {
            None
        }
    }

    pub(crate) async fn check_deleted(&self, run: &mut RunContext<C>) -> AggregationResult<()> {
        if let Some(reason) = self.sweep_blocker(run) {
            info!(reason, "Delete detection skipped");
            if self.config.check_deleted && run.state.check_deleted_cancelled {
                run.state
                    .messages
                    .warn("Delete detection skipped because of errors during aggregation");
            }
            return Ok(());
        }
        let Some(pass_start) = run.state.pass_start else {
            warn!("No pass start recorded, delete detection skipped");
            return Ok(());
        };

        for name in self.config.applications.clone() {
            if self.is_terminated() {
                break;
            }
            if run.state.check_deleted_disabled.contains(&name) {
                warn!(application = %name, "Delete detection disabled after retry overflow");
                run.state.messages.warn(format!(
                    "{name}: delete detection disabled, too many records needed a retry"
                ));
                continue;
            }
            let application = match self.load_application(&name).await {
                Ok(application) => application,
                Err(e) => {
                    self.application_failed(run, &name, e)?;
                    continue;
                }
            };
            let result = match self.config.aggregation_type {
                AggregationType::Account => self.sweep_accounts(run, &application, pass_start).await,
                AggregationType::Group => self.sweep_groups(run, &application, pass_start).await,
            };
            if let Err(e) = result {
                self.application_failed(run, &name, e)?;
            }
        }
        Ok(())
    }

    fn over_threshold(&self, run: &mut RunContext<C>, application: &Application, stale: usize) -> bool {
        let Some(threshold) = self.config.check_deleted_threshold else {
            return false;
        };
        if stale <= threshold {
            return false;
        }
        warn!(application = %application.name, stale, threshold, "Delete detection threshold exceeded");
        run.state.messages.warn(format!(
            "{}: {} objects would be deleted, more than the threshold of {}; nothing was deleted",
            application.name, stale, threshold
        ));
        true
    }

    async fn sweep_accounts(
        &self,
        run: &mut RunContext<C>,
        application: &Application,
        pass_start: DateTime<Utc>,
    ) -> AggregationResult<()> {
        let mut applications = vec![application.id];
        applications.extend(
            self.ctx
                .search_ids::<Application>(&QueryOptions::filter(Filter::eq("proxy", application.id)))
                .await?,
        );
        let filter = stale_filter(&applications, pass_start);
        let stale = self.ctx.count::<Link>(&filter).await?;
        debug!(application = %application.name, stale, "Stale accounts counted");
        if stale == 0 || self.over_threshold(run, application, stale) {
            return Ok(());
        }

        let object_type = application.account_schema.object_type.clone();
        let mut stats = AggregationStatistics::new();
        let mut links = ProjectionIterator::<Link>::query(self.ctx.as_ref(), &QueryOptions::filter(filter)).await?;
        while let Some(link) = links.fetch_next(self.ctx.as_ref()).await? {
            if self.is_terminated() {
                info!(deleted = stats.deleted, "Delete detection terminated");
                break;
            }
            let native = link.native_identity.clone();
            match self.delete_stale_link(link).await {
                Ok(()) => {
                    info!(application = %application.name, native_identity = %native, "Stale account deleted");
                    stats.record(&application.name, &object_type, RecordOutcome::Deleted);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(application = %application.name, native_identity = %native, error = %e, "Stale account deletion failed");
                    run.state
                        .messages
                        .error(format!("{}: {}: {}", application.name, native, e));
                    stats.errors += 1;
                    if let Err(e) = self.ctx.rollback().await {
                        warn!(error = %e, "Rollback failed");
                    }
                    self.ctx.reconnect().await?;
                    run.governor.reset();
                }
            }
            if run.governor.completed() {
                self.ctx.decache();
            }
        }
        run.state.statistics.merge(&stats);
        Ok(())
    }

    async fn delete_stale_link(&self, link: Link) -> AggregationResult<()> {
        let holder: Option<IdentityId> = link.identity;
        let lock = match holder {
            Some(id) if !self.config.no_locking => {
                Some(IdentityLock::acquire(std::sync::Arc::clone(&self.ctx), id).await?)
            }
            _ => None,
        };
        self.terminator.delete_link(link, false).await?;
        if let Some(id) = holder {
            self.refresh_holder(id).await?;
        }
        if let Some(lock) = lock {
            lock.release()?;
        }
        Ok(())
    }

    async fn sweep_groups(
        &self,
        run: &mut RunContext<C>,
        application: &Application,
        pass_start: DateTime<Utc>,
    ) -> AggregationResult<()> {
        let object_types: Vec<&str> = application
            .group_schemas
            .iter()
            .map(|schema| schema.object_type.as_str())
            .collect();
        if object_types.is_empty() {
            return Ok(());
        }
        let filter = Filter::and([
            stale_filter(&[application.id], pass_start),
            Filter::or(object_types.iter().map(|ot| Filter::eq("object_type", *ot))),
        ]);
        let stale = self.ctx.count::<ManagedAttribute>(&filter).await?;
        debug!(application = %application.name, stale, "Stale groups counted");
        if stale == 0 || self.over_threshold(run, application, stale) {
            return Ok(());
        }

        let mut stats = AggregationStatistics::new();
        let mut groups =
            ProjectionIterator::<ManagedAttribute>::query(self.ctx.as_ref(), &QueryOptions::filter(filter)).await?;
        while let Some(group) = groups.fetch_next(self.ctx.as_ref()).await? {
            if self.is_terminated() {
                break;
            }
            let value = group.value.clone();
            let object_type = group.object_type.clone();
            match self.terminator.delete(group).await.map_err(AggregationError::from) {
                Ok(()) => {
                    info!(application = %application.name, value = %value, "Stale group deleted");
                    stats.groups_deleted += 1;
                    stats.record(&application.name, &object_type, RecordOutcome::Deleted);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(application = %application.name, value = %value, error = %e, "Stale group deletion failed");
                    run.state
                        .messages
                        .error(format!("{}: group {}: {}", application.name, value, e));
                    stats.errors += 1;
                    if let Err(e) = self.ctx.rollback().await {
                        warn!(error = %e, "Rollback failed");
                    }
                    self.ctx.reconnect().await?;
                    run.governor.reset();
                }
            }
            if run.governor.completed() {
                self.ctx.decache();
            }
        }
        run.state.statistics.merge(&stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_stale_filter_respects_watermark() {
        let start = Utc::now();
        let app = ApplicationId::new();
        let mut link = Link::new(IdentityId::new(), app, "u1");
        link.created = start - Duration::hours(1);
        let filter = stale_filter(&[app], start);
        assert!(filter.matches(&link));

        link.last_refresh = Some(start + Duration::seconds(1));
        assert!(!filter.matches(&link));

        let mut created_during_pass = Link::new(IdentityId::new(), app, "u2");
        created_during_pass.created = start + Duration::seconds(1);
        assert!(!filter.matches(&created_during_pass));
    }

    #[test]
    fn test_stale_filter_covers_proxied_applications() {
        let start = Utc::now();
        let proxy = ApplicationId::new();
        let child = ApplicationId::new();
        let mut link = Link::new(IdentityId::new(), child, "u1");
        link.created = start - Duration::hours(1);
        assert!(!stale_filter(&[proxy], start).matches(&link));
        assert!(stale_filter(&[proxy, child], start).matches(&link));
    }
}
