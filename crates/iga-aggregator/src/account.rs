//! Per-record account processing and identity completion.

use chrono::Utc;
use iga_core::{Application, DeletedObject, Identity, Link};
use iga_store::{IdentityLock, PersistenceContext, QueryOptions, Filter};
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::buffer::OpenIdentity;
use crate::error::{AggregationError, AggregationResult};
use crate::external::ExternalAttributeUpdate;
use crate::gate::{decide, multiplex_key, GateDecision};
use crate::identity::account_filter;
use crate::record::ResourceObject;
use crate::run::{ApplicationRun, RunContext};
use crate::statistics::RecordOutcome;

impl<C: PersistenceContext> Aggregator<C> {
    /// Processes one record, absorbing anything short of a fatal failure.
    pub(crate) async fn process_record(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        record: ResourceObject,
    ) -> AggregationResult<()> {
        if let (Some(tracker), Some(native)) = (&app_run.restart, record.native()) {
            if tracker.is_completed(native) {
                debug!(native_identity = native, "Completed before restart, skipped");
                app_run.stats.skipped += 1;
                return Ok(());
            }
        }
        if !app_run.doing_retries {
            app_run.stats.scanned(&app_run.application.name, &record.object_type);
        }
        if let Some(delay) = self.config.throttle_delay() {
            tokio::time::sleep(delay).await;
        }

        let result = if app_run.is_group(&record.object_type) {
            self.reconcile_group(run, app_run, &record).await.map(|_| ())
        } else {
            self.reconcile_account(run, app_run, &record).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => self.record_failed(run, app_run, record, e).await,
        }
    }

    async fn reconcile_account(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        record: &ResourceObject,
    ) -> AggregationResult<()> {
        let object_type = record.object_type.as_str();
        let Some(native) = record.native() else {
            if record.is_delete() {
                debug!(application = %app_run.application.name, "Delete without native identity ignored");
                app_run.count(&app_run.application.name.clone(), object_type, RecordOutcome::Ignored);
                return Ok(());
            }
            return Err(AggregationError::missing_native_identity(object_type));
        };
        if let Some(previous) = &record.previous_identity {
            warn!(
                application = %app_run.application.name,
                native_identity = native,
                previous_identity = %previous,
                "Account rename is not supported, record ignored"
            );
            app_run.count(&app_run.application.name.clone(), object_type, RecordOutcome::Ignored);
            return Ok(());
        }

        let application = self.target_application(app_run, record).await?;
        let key = multiplex_key(record, self.config.multiplex_attribute.as_deref())
            .unwrap_or_else(|| native.to_string());
        if let Some(open) = app_run.buffer.advance(Some(&key)) {
            self.complete_identity(run, app_run, open).await?;
            app_run.buffer.flushed();
        }

        let existing = self
            .ctx
            .find_one::<Link>(account_filter(application.id, native, record.instance.as_deref()))
            .await?;
        let multiplexed = self.config.multiplex_attribute.is_some() && app_run.buffer.holds(&key);
        let decision = decide(
            record,
            existing.as_ref(),
            multiplexed,
            self.config.optimize(),
            &self.config.comparison_exclusions(),
        );
        debug!(application = %application.name, native_identity = native, decision = ?decision, "Record routed");

        match decision {
            GateDecision::CorrelationError(message) => Err(AggregationError::correlation(message)),
            GateDecision::Optimized => {
                if let Some(link) = existing {
                    if app_run.touch.push(link.id) {
                        app_run.touch.flush(self.ctx.as_ref(), Utc::now()).await?;
                    }
                }
                app_run.count(&application.name, object_type, RecordOutcome::Optimized);
                app_run.seen.insert(native.to_string());
                self.mark_restart(run, app_run, native, None).await
            }
            GateDecision::Delete => {
                self.delete_account(run, app_run, &application, record, native, existing)
                    .await
            }
            GateDecision::Create | GateDecision::Update => {
                self.refresh_account(run, app_run, &application, record, native, &key, existing)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn refresh_account(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        application: &Application,
        record: &ResourceObject,
        native: &str,
        key: &str,
        existing: Option<Link>,
    ) -> AggregationResult<()> {
        if !app_run.buffer.holds(key) {
            let identity = match self
                .identities
                .correlate(application, record, existing.as_ref(), false)
                .await?
            {
                Some(identity) => identity,
                None if self.config.correlate_only => {
                    debug!(application = %application.name, native_identity = native, "No correlation, record ignored");
                    app_run.count(&application.name, &record.object_type, RecordOutcome::Ignored);
                    app_run.seen.insert(native.to_string());
                    return Ok(());
                }
                None => self.identities.create(application, record).await?,
            };
            let open = self.open_identity(key, identity).await?;
            if let Some(previous) = app_run.buffer.open(open) {
                self.complete_identity(run, app_run, previous).await?;
            }
        }

        let Some(open) = app_run.buffer.current_mut() else {
            return Err(AggregationError::correlation(format!(
                "no identity open for {native}"
            )));
        };
        let link = self
            .identities
            .refresh_link(&mut open.identity, application, record)
            .await?;
        let external = ExternalAttributeUpdate::for_link(application, &link);
        run.external.stage(&external).await?;
        if self.config.promote_managed_attributes {
            self.promote_values(&mut run.promotion, app_run, application, &link)
                .await?;
        }
        self.ctx.commit().await?;
        run.external.publish(external).await;

        let created = existing.is_none();
        if let Some(open) = app_run.buffer.current_mut() {
            open.push(native, created);
        }
        app_run.seen.insert(native.to_string());
        let outcome = if created {
            RecordOutcome::Created
        } else {
            RecordOutcome::Updated
        };
        app_run.count(&application.name, &record.object_type, outcome);
        Ok(())
    }

    /// Locks the identity, unless locking is off, and reloads it under the
    /// lock. A pending, uncommitted identity is kept as is.
    async fn open_identity(&self, key: &str, identity: Identity) -> AggregationResult<OpenIdentity<C>> {
        if self.config.no_locking {
            return Ok(OpenIdentity::new(key, identity, None));
        }
        let lock = IdentityLock::acquire(std::sync::Arc::clone(&self.ctx), identity.id).await?;
        let identity = self.ctx.get::<Identity>(identity.id).await?.unwrap_or(identity);
        Ok(OpenIdentity::new(key, identity, Some(lock)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn delete_account(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        application: &Application,
        record: &ResourceObject,
        native: &str,
        existing: Option<Link>,
    ) -> AggregationResult<()> {
        app_run.seen.insert(native.to_string());
        let Some(link) = existing else {
            debug!(application = %application.name, native_identity = native, "Deleted account has no link");
            app_run.count(&application.name, &record.object_type, RecordOutcome::Ignored);
            return Ok(());
        };
        self.record_deleted_object(application, record, native).await?;

        let link_id = link.id;
        let holder = link.identity;
        let held_open = app_run
            .buffer
            .current_mut()
            .is_some_and(|open| open.identity.links.contains(&link_id));
        if held_open {
            self.terminator.delete_link(link, false).await?;
            if let Some(open) = app_run.buffer.current_mut() {
                open.identity.links.retain(|l| *l != link_id);
            }
        } else {
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
        }

        info!(application = %application.name, native_identity = native, "Account deleted");
        app_run.count(&application.name, &record.object_type, RecordOutcome::Deleted);
        self.mark_restart(run, app_run, native, None).await
    }

    /// Refreshes an identity that lost a link outside the open buffer.
    pub(crate) async fn refresh_holder(&self, identity: iga_core::IdentityId) -> AggregationResult<()> {
        let Some(identity) = self.ctx.get::<Identity>(identity).await? else {
            return Ok(());
        };
        let outcome = self.identities.refresh(identity).await?;
        if !outcome.deleted && !outcome.committed {
            self.ctx.commit().await?;
        }
        Ok(())
    }

    pub(crate) async fn record_deleted_object(
        &self,
        application: &Application,
        record: &ResourceObject,
        native: &str,
    ) -> AggregationResult<()> {
        if !self.config.record_deleted_objects {
            return Ok(());
        }
        let mut deleted = DeletedObject::new(
            application.id,
            record.object_type.as_str(),
            native,
            record.uuid.clone(),
        );
        deleted.name = record.display_name.clone();
        self.ctx.save(deleted).await?;
        Ok(())
    }

    /// The application a record belongs to: the aggregated one, or a proxied
    /// application named by the source application attribute.
    async fn target_application(
        &self,
        app_run: &mut ApplicationRun<C>,
        record: &ResourceObject,
    ) -> AggregationResult<Application> {
        let proxy = &app_run.application;
        let Some(name) = self
            .config
            .source_application_attribute
            .as_deref()
            .and_then(|attribute| record.string_attribute(attribute))
        else {
            return Ok(proxy.clone());
        };
        if name == proxy.name {
            return Ok(proxy.clone());
        }
        if let Some(application) = app_run.proxies.get(&name) {
            return Ok(application.clone());
        }

        let mut matches = self
            .ctx
            .search::<Application>(&QueryOptions::filter(Filter::eq("name", name.as_str())))
            .await?;
        let application = match matches.len() {
            0 => {
                let generated = Application::generated_proxy(name.as_str(), proxy);
                self.ctx.save(generated.clone()).await?;
                self.ctx.commit().await?;
                info!(application = %name, proxy = %proxy.name, "Proxied application generated");
                generated
            }
            1 if matches[0].proxy == Some(proxy.id) => matches.remove(0),
            _ => {
                return Err(AggregationError::AmbiguousProxy {
                    name,
                    proxy: proxy.name.clone(),
                })
            }
        };
        app_run.proxies.insert(name, application.clone());
        Ok(application)
    }

    /// Finishes the identity built up from one or more records.
    ///
    /// Only session recovery failures propagate; a failed completion is
    /// counted as damage and the run continues.
    pub(crate) async fn complete_identity(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        mut open: OpenIdentity<C>,
    ) -> AggregationResult<()> {
        let result = self.finish_identity(open.identity.clone()).await;
        open.release();
        match result {
            Ok(()) => {
                debug!(identity = %open.identity.name, records = open.records.len(), "Identity completed");
                for record in &open.records {
                    self.mark_restart(run, app_run, &record.native_identity, Some(record.created))
                        .await?;
                }
                if run.governor.completed() {
                    self.ctx.decache();
                    debug!("Session decached");
                }
                Ok(())
            }
            Err(e) => {
                error!(identity = %open.identity.name, error = %e, "Identity completion failed");
                let object_type = app_run.object_type.clone();
                app_run.stats.damage(&app_run.application.name, &object_type);
                run.state.check_deleted_cancelled = true;
                run.state
                    .messages
                    .error(format!("Identity {}: {}", open.identity.name, e));
                if let Err(e) = self.ctx.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
                self.reconnect(run, app_run).await
            }
        }
    }

    async fn finish_identity(&self, mut identity: Identity) -> AggregationResult<()> {
        identity.needs_refresh = true;
        identity.modified = Some(Utc::now());
        self.ctx.save(identity.clone()).await?;
        self.ctx.commit().await?;
        let outcome = self.identities.refresh(identity).await?;
        if outcome.deleted {
            debug!("Identity removed by refresh");
        } else if !outcome.committed {
            self.ctx.commit().await?;
        }
        Ok(())
    }

    /// Records a native identity as done for restart purposes, saving the run
    /// state when a flush is due.
    pub(crate) async fn mark_restart(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        native: &str,
        created: Option<bool>,
    ) -> AggregationResult<()> {
        let Some(tracker) = app_run.restart.as_mut() else {
            return Ok(());
        };
        if tracker.complete(native, created) {
            let ledger = tracker.flush();
            run.state.restart.insert(app_run.partition.clone(), ledger);
            self.save_state(&run.state, false).await?;
        }
        Ok(())
    }

    /// Recovers from a failed record: rolls back, recovers the open identity
    /// and either queues the record for retry or reports it.
    async fn record_failed(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        record: ResourceObject,
        error: AggregationError,
    ) -> AggregationResult<()> {
        let native = record.native().unwrap_or("<none>").to_string();
        if let Err(e) = self.ctx.rollback().await {
            warn!(error = %e, "Rollback failed");
        }
        let abandoned = app_run.buffer.abandon();
        self.reconnect(run, app_run).await?;
        if let Some(mut open) = abandoned {
            if open.records.is_empty() {
                open.release();
            } else {
                match self.ctx.get::<Identity>(open.identity.id).await? {
                    Some(identity) => {
                        open.identity = identity;
                        self.complete_identity(run, app_run, open).await?;
                    }
                    None => open.release(),
                }
            }
        }

        if error.is_retryable() && !app_run.doing_retries && app_run.retry.push(record) {
            debug!(native_identity = %native, error = %error, "Record queued for retry");
            return Ok(());
        }

        error!(application = %app_run.application.name, native_identity = %native, error = %error, "Record failed");
        run.state
            .messages
            .error(format!("{}: {}: {}", app_run.application.name, native, error));
        run.state.check_deleted_cancelled = true;
        app_run.stats.errors += 1;

        let errors = run.error_count() + app_run.stats.errors;
        let over_limit = self.config.max_errors.is_some_and(|max| errors > max);
        if self.config.halt_on_error || over_limit {
            warn!(errors, "Error limit reached, terminating");
            self.terminate();
        }
        Ok(())
    }

    /// Clears the session and reloads the application being aggregated.
    pub(crate) async fn reconnect(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
    ) -> AggregationResult<()> {
        self.ctx.reconnect().await?;
        run.governor.reset();
        run.promotion.clear();
        app_run.proxies.clear();
        match self.ctx.get::<Application>(app_run.application.id).await? {
            Some(application) => {
                app_run.application = application;
                Ok(())
            }
            None => Err(AggregationError::ApplicationVanished {
                name: app_run.application.name.clone(),
            }),
        }
    }
}
