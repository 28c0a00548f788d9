//! The aggregation driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use iga_core::{Application, ObjectKind, TaskResult, TaskResultId};
use iga_store::{PersistenceContext, StoreError};
use iga_terminator::{Terminator, TerminatorConfig};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AggregationConfig, AggregationType};
use crate::error::{AggregationError, AggregationResult};
use crate::external::{ExternalAttributeSink, ExternalAttributeWriter};
use crate::groups::GroupRefreshHook;
use crate::identity::IdentityService;
use crate::record::ResourceObject;
use crate::result::{AggregationSummary, Phase, RunState};
use crate::run::{ApplicationRun, RunContext};
use crate::source::{IterateOptions, Partition, RecordSource};
use crate::stream::AccountStream;

/// Reconciles identity records read from applications with the identity
/// store.
pub struct Aggregator<C: PersistenceContext> {
    pub(crate) ctx: Arc<C>,
    pub(crate) source: Arc<dyn RecordSource>,
    pub(crate) identities: Arc<dyn IdentityService>,
    pub(crate) terminator: Terminator<C>,
    pub(crate) config: AggregationConfig,
    pub(crate) group_hook: Option<Arc<dyn GroupRefreshHook>>,
    task_result: Option<TaskResultId>,
    terminate: Arc<AtomicBool>,
}

impl<C: PersistenceContext> Aggregator<C> {
    #[must_use]
    pub fn new(
        ctx: Arc<C>,
        source: Arc<dyn RecordSource>,
        identities: Arc<dyn IdentityService>,
        config: AggregationConfig,
    ) -> Self {
        let terminate = Arc::new(AtomicBool::new(false));
        let terminator = Terminator::new(Arc::clone(&ctx))
            .with_config(TerminatorConfig {
                no_locking: config.no_locking,
                ..TerminatorConfig::default()
            })
            .with_terminate_flag(Arc::clone(&terminate));
        Self {
            ctx,
            source,
            identities,
            terminator,
            config,
            group_hook: None,
            task_result: None,
            terminate,
        }
    }

    #[must_use]
    pub fn with_group_hook(mut self, hook: Arc<dyn GroupRefreshHook>) -> Self {
        self.group_hook = Some(hook);
        self
    }

    /// Persists run state on this task result, and resumes from it.
    #[must_use]
    pub fn with_task_result(mut self, task_result: TaskResultId) -> Self {
        self.task_result = Some(task_result);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Flag that stops the run after the record in flight.
    #[must_use]
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    pub fn terminate(&self) {
        if !self.terminate.swap(true, Ordering::SeqCst) {
            info!("Aggregation termination requested");
        }
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Runs every phase not already completed by an earlier invocation.
    #[instrument(skip(self), fields(applications = ?self.config.applications, kind = %self.config.aggregation_type))]
    pub async fn run(&self) -> AggregationResult<AggregationSummary> {
        let mut run = self.begin(false).await?;
        let outcome = self.run_phases(&mut run, &Phase::ALL, true).await;
        let saved = self.end(&mut run).await;
        outcome?;
        saved?;
        Ok(run.summary())
    }

    /// Runs a single phase, as a partitioned task does.
    #[instrument(skip(self), fields(applications = ?self.config.applications))]
    pub async fn run_phase(&self, phase: Phase) -> AggregationResult<AggregationSummary> {
        let mut run = self.begin(false).await?;
        let outcome = self.run_phases(&mut run, &[phase], false).await;
        let saved = self.end(&mut run).await;
        outcome?;
        saved?;
        Ok(run.summary())
    }

    /// Aggregates caller-supplied records for one application. Delete
    /// detection never runs for such a pass.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn aggregate_manual(
        &self,
        application: &str,
        records: Vec<ResourceObject>,
    ) -> AggregationResult<AggregationSummary> {
        let mut run = self.begin(true).await?;
        run.state.pass_start.get_or_insert_with(Utc::now);
        let outcome = self.aggregate_records(&mut run, application, records).await;
        let finished = match outcome {
            Ok(()) => self.finish(&mut run).await,
            Err(e) => Err(e),
        };
        if finished.is_ok() && !self.is_terminated() {
            run.state.completed_phases.insert(Phase::Finish);
        }
        let saved = self.end(&mut run).await;
        finished?;
        saved?;
        Ok(run.summary())
    }

    async fn aggregate_records(
        &self,
        run: &mut RunContext<C>,
        application: &str,
        records: Vec<ResourceObject>,
    ) -> AggregationResult<()> {
        let application = match self.load_application(application).await {
            Ok(application) => application,
            Err(e) => return self.application_failed(run, application, e),
        };
        let object_type = application.account_schema.object_type.clone();
        let mut app_run = ApplicationRun::new(application, object_type, "manual", &self.config, None);
        let drained = self
            .drain(run, &mut app_run, AccountStream::manual(records))
            .await;
        let completed = matches!(drained, Ok(true));
        let name = app_run.application.name.clone();
        self.close_application_run(run, app_run, completed);
        match drained {
            Ok(_) => Ok(()),
            Err(e) => self.application_failed(run, &name, e),
        }
    }

    async fn begin(&self, manual: bool) -> AggregationResult<RunContext<C>> {
        self.config.validate()?;
        let cap = self.config.max_result_messages;
        let mut state = match self.load_state().await? {
            Some(state) if !manual && !state.completed_phases.contains(&Phase::Finish) => {
                info!(
                    completed_partitions = state.completed_partitions.len(),
                    "Resuming from saved run state"
                );
                state
            }
            _ => RunState::new(cap),
        };
        state.messages.set_cap(cap);
        state.terminated = false;

        let external = if self.config.external_attribute_worker {
            ExternalAttributeSink::Background(
                ExternalAttributeWriter::spawn(
                    self.ctx.as_ref(),
                    self.config.external_attribute_queue,
                    self.config.external_attribute_wait(),
                )
                .await?,
            )
        } else {
            ExternalAttributeSink::Inline(Arc::clone(&self.ctx))
        };
        Ok(RunContext::new(state, &self.config, external, manual))
    }

    async fn end(&self, run: &mut RunContext<C>) -> AggregationResult<()> {
        run.external.close().await;
        run.state.terminated = run.state.terminated || self.is_terminated();
        let completed = run.state.completed_phases.contains(&Phase::Finish);
        self.save_state(&run.state, completed).await
    }

    async fn run_phases(
        &self,
        run: &mut RunContext<C>,
        phases: &[Phase],
        skip_completed: bool,
    ) -> AggregationResult<()> {
        for phase in phases {
            if skip_completed && run.state.completed_phases.contains(phase) {
                debug!(phase = %phase, "Phase already completed");
                continue;
            }
            if self.is_terminated() && *phase != Phase::Finish {
                info!(phase = %phase, "Run terminated, phase skipped");
                continue;
            }
            info!(phase = %phase, "Phase started");
            match phase {
                Phase::Partition => self.partition(run).await?,
                Phase::Aggregate => self.aggregate(run).await?,
                Phase::CheckDeleted => self.check_deleted(run).await?,
                Phase::Finish => self.finish(run).await?,
            }
            run.state.terminated = self.is_terminated();
            if !run.state.terminated {
                run.state.completed_phases.insert(*phase);
            }
            self.save_state(&run.state, false).await?;
        }
        Ok(())
    }

    async fn partition(&self, run: &mut RunContext<C>) -> AggregationResult<()> {
        if run.state.pass_start.is_none() {
            run.state.pass_start = Some(Utc::now());
        }
        if !run.state.partitions.is_empty() {
            debug!(partitions = run.state.partitions.len(), "Partitions already computed");
            return Ok(());
        }
        for name in &self.config.applications {
            if let Err(e) = self.partition_application(run, name).await {
                self.application_failed(run, name, e)?;
            }
        }
        info!(partitions = run.state.partitions.len(), "Partitions computed");
        Ok(())
    }

    async fn partition_application(&self, run: &mut RunContext<C>, name: &str) -> AggregationResult<()> {
        let application = self.load_application(name).await?;
        for object_type in self.object_types(&application)? {
            let partitions = if self.config.enable_partitioning {
                self.source
                    .partitions(&application, &object_type, self.config.objects_per_partition)
                    .await?
            } else {
                vec![Partition::whole(&application.name, &object_type)]
            };
            debug!(application = %application.name, object_type = %object_type, partitions = partitions.len(), "Application partitioned");
            run.state.partitions.extend(partitions);
        }
        Ok(())
    }

    fn object_types(&self, application: &Application) -> AggregationResult<Vec<String>> {
        match self.config.aggregation_type {
            AggregationType::Account => Ok(vec![application.account_schema.object_type.clone()]),
            AggregationType::Group => {
                if application.group_schemas.is_empty() {
                    return Err(AggregationError::missing_schema(
                        &application.name,
                        iga_core::Schema::GROUP,
                    ));
                }
                Ok(application
                    .group_schemas
                    .iter()
                    .map(|schema| schema.object_type.clone())
                    .collect())
            }
        }
    }

    async fn aggregate(&self, run: &mut RunContext<C>) -> AggregationResult<()> {
        if run.state.partitions.is_empty() {
            self.partition(run).await?;
        }
        let partitions = run.state.partitions.clone();
        for partition in &partitions {
            if self.is_terminated() {
                break;
            }
            if run.state.completed_partitions.contains(&partition.name) {
                debug!(partition = %partition.name, "Partition already completed");
                continue;
            }
            match self.aggregate_partition(run, partition).await {
                Ok(true) => {
                    run.state.completed_partitions.insert(partition.name.clone());
                    run.state.restart.remove(&partition.name);
                    self.save_state(&run.state, false).await?;
                }
                Ok(false) => {
                    info!(partition = %partition.name, "Partition interrupted");
                }
                Err(e) => self.application_failed(run, &partition.application, e)?,
            }
        }

        if self.config.delta
            && self.config.aggregation_type == AggregationType::Account
            && !self.is_terminated()
        {
            for name in &self.config.applications {
                let application = match self.load_application(name).await {
                    Ok(application) => application,
                    Err(e) => {
                        self.application_failed(run, name, e)?;
                        continue;
                    }
                };
                if !application.features.group_membership_on_group {
                    continue;
                }
                if let Err(e) = self.reconcile_delta_membership(run, &application).await {
                    self.application_failed(run, name, e)?;
                }
            }
        }
        Ok(())
    }

    /// Aggregates one partition. Returns whether it ran to completion.
    #[instrument(skip(self, run), fields(partition = %partition.name))]
    async fn aggregate_partition(&self, run: &mut RunContext<C>, partition: &Partition) -> AggregationResult<bool> {
        let application = self.load_application(&partition.application).await?;
        let ledger = self
            .config
            .restartable
            .then(|| run.state.restart.get(&partition.name).cloned().unwrap_or_default());
        if let Some(ledger) = &ledger {
            if !ledger.is_empty() {
                info!(completed = ledger.len(), "Resuming partition");
            }
        }
        let options = IterateOptions {
            delta: self.config.delta,
            partition: Some(partition.clone()),
            ..IterateOptions::default()
        };
        let stream = self
            .source
            .iterate(&application, &partition.object_type, &options)
            .await?;
        let mut app_run = ApplicationRun::new(
            application,
            partition.object_type.as_str(),
            partition.name.as_str(),
            &self.config,
            ledger,
        );
        let drained = self
            .drain(run, &mut app_run, AccountStream::Source(stream))
            .await;
        self.close_application_run(run, app_run, matches!(drained, Ok(true)));
        drained
    }

    /// Feeds every record of `stream` through the pipeline, then replays the
    /// records that failed transiently. Returns whether the stream was read to
    /// the end.
    async fn drain(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        mut stream: AccountStream,
    ) -> AggregationResult<bool> {
        let read = self.read_stream(run, app_run, &mut stream).await;
        stream.close().await;
        self.flush_open_identity(run, app_run).await?;
        self.flush_touch(app_run).await?;
        let mut completed = read?;

        if completed && !app_run.retry.is_empty() {
            let records = app_run.retry.take();
            info!(application = %app_run.application.name, records = records.len(), "Retrying failed records");
            app_run.doing_retries = true;
            for record in records {
                if self.is_terminated() {
                    completed = false;
                    break;
                }
                app_run.stats.retried += 1;
                self.process_record(run, app_run, record).await?;
            }
            app_run.doing_retries = false;
            self.flush_open_identity(run, app_run).await?;
            self.flush_touch(app_run).await?;
        }
        Ok(completed)
    }

    async fn read_stream(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
        stream: &mut AccountStream,
    ) -> AggregationResult<bool> {
        loop {
            if self.is_terminated() {
                return Ok(false);
            }
            if let Some(max) = self.config.max_accounts {
                if run.records_read >= max {
                    info!(max_accounts = max, "Account limit reached");
                    return Ok(true);
                }
            }
            let Some(record) = stream.next().await? else {
                return Ok(true);
            };
            if self.is_terminated() {
                debug!("Terminated while reading, record not processed");
                return Ok(false);
            }
            run.records_read += 1;
            self.process_record(run, app_run, record).await?;
        }
    }

    /// Completes the open identity, if any.
    pub(crate) async fn flush_open_identity(
        &self,
        run: &mut RunContext<C>,
        app_run: &mut ApplicationRun<C>,
    ) -> AggregationResult<()> {
        if let Some(open) = app_run.buffer.advance(None) {
            self.complete_identity(run, app_run, open).await?;
            app_run.buffer.flushed();
        }
        Ok(())
    }

    pub(crate) async fn flush_touch(&self, app_run: &mut ApplicationRun<C>) -> AggregationResult<()> {
        app_run.touch.flush(self.ctx.as_ref(), Utc::now()).await?;
        Ok(())
    }

    /// Folds a finished partition's counters and bookkeeping into the run.
    fn close_application_run(&self, run: &mut RunContext<C>, app_run: ApplicationRun<C>, completed: bool) {
        let ApplicationRun {
            application,
            partition,
            retry,
            seen,
            restart,
            stats,
            ..
        } = app_run;
        if retry.is_overflowed() {
            warn!(application = %application.name, "Retry ledger overflowed, delete detection disabled");
            run.state.check_deleted_disabled.insert(application.name.clone());
        }
        if completed {
            run.state.statistics.merge(&stats);
        } else {
            run.unpersisted.merge(&stats);
            if let Some(mut tracker) = restart {
                run.state.restart.insert(partition, tracker.flush());
            }
        }
        run.seen.entry(application.name).or_default().extend(seen);
    }

    async fn finish(&self, run: &mut RunContext<C>) -> AggregationResult<()> {
        if !self.is_terminated() {
            run.state.restart.clear();
        }
        let summary = run.summary();
        let stats = &summary.statistics;
        info!(
            total = stats.total,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            optimized = stats.optimized,
            ignored = stats.ignored,
            damaged = stats.damaged,
            errors = stats.errors,
            terminated = self.is_terminated(),
            "Aggregation finished"
        );
        Ok(())
    }

    /// Reports a failure that stops one application, not the run.
    pub(crate) fn application_failed(
        &self,
        run: &mut RunContext<C>,
        name: &str,
        error: AggregationError,
    ) -> AggregationResult<()> {
        if error.is_fatal() {
            return Err(error);
        }
        error!(application = %name, error = %error, "Application aggregation failed");
        run.state.messages.error(format!("{name}: {error}"));
        run.state.check_deleted_cancelled = true;
        run.unpersisted.errors += 1;
        if self.config.halt_on_error && self.config.sequential && !self.config.enable_partitioning {
            self.terminate();
        }
        Ok(())
    }

    pub(crate) async fn load_application(&self, name: &str) -> AggregationResult<Application> {
        self.ctx
            .get_by_name::<Application>(name)
            .await?
            .ok_or_else(|| AggregationError::application_not_found(name))
    }

    async fn load_state(&self) -> AggregationResult<Option<RunState>> {
        let Some(id) = self.task_result else {
            return Ok(None);
        };
        match self.ctx.get::<TaskResult>(id).await? {
            Some(task_result) => RunState::load(&task_result),
            None => Err(StoreError::not_found(ObjectKind::TaskResult, id).into()),
        }
    }

    /// Writes the run state to the task result and commits.
    pub(crate) async fn save_state(&self, state: &RunState, completed: bool) -> AggregationResult<()> {
        let Some(id) = self.task_result else {
            return Ok(());
        };
        let mut task_result = self
            .ctx
            .get::<TaskResult>(id)
            .await?
            .ok_or_else(|| StoreError::not_found(ObjectKind::TaskResult, id))?;
        state.store(&mut task_result)?;
        if completed {
            task_result.completed = Some(Utc::now());
        }
        self.ctx.save(task_result).await?;
        self.ctx.commit().await?;
        Ok(())
    }
}

impl<C: PersistenceContext> std::fmt::Debug for Aggregator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("applications", &self.config.applications)
            .field("aggregation_type", &self.config.aggregation_type)
            .field("task_result", &self.task_result)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
