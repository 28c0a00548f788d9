//! Per-run and per-partition working state.

use std::collections::{BTreeSet, HashMap};

use iga_core::Application;
use iga_store::PersistenceContext;

use crate::buffer::CompletionBuffer;
use crate::config::AggregationConfig;
use crate::external::ExternalAttributeSink;
use crate::groups::PromotionCache;
use crate::restart::{RestartLedger, RestartTracker};
use crate::result::{AggregationSummary, RunState};
use crate::retry::RetryLedger;
use crate::session::SessionGovernor;
use crate::statistics::{AggregationStatistics, RecordOutcome};
use crate::touch::RefreshTouchBatch;

/// State shared by every phase of one invocation.
pub(crate) struct RunContext<C: PersistenceContext> {
    pub state: RunState,
    /// Counts from partitions that stopped early. They are reported but not
    /// persisted, since a resumed run recounts from the restart ledger.
    pub unpersisted: AggregationStatistics,
    pub governor: SessionGovernor,
    pub promotion: PromotionCache,
    pub external: ExternalAttributeSink<C>,
    pub manual: bool,
    /// Native identities seen in this invocation, per application.
    pub seen: HashMap<String, BTreeSet<String>>,
    pub records_read: usize,
}

impl<C: PersistenceContext> RunContext<C> {
    pub fn new(state: RunState, config: &AggregationConfig, external: ExternalAttributeSink<C>, manual: bool) -> Self {
        Self {
            state,
            unpersisted: AggregationStatistics::new(),
            governor: SessionGovernor::new(config.max_connection_age),
            promotion: PromotionCache::new(),
            external,
            manual,
            seen: HashMap::new(),
            records_read: 0,
        }
    }

    pub fn error_count(&self) -> u32 {
        self.state.statistics.errors + self.unpersisted.errors
    }

    pub fn summary(&self) -> AggregationSummary {
        let mut statistics = self.state.statistics.clone();
        statistics.merge(&self.unpersisted);
        AggregationSummary {
            statistics,
            messages: self.state.messages.messages().to_vec(),
            dropped_messages: self.state.messages.dropped(),
            terminated: self.state.terminated,
            check_deleted_cancelled: self.state.check_deleted_cancelled,
        }
    }
}

/// Working state while one partition of one application is aggregated.
pub(crate) struct ApplicationRun<C: PersistenceContext> {
    pub application: Application,
    pub object_type: String,
    pub partition: String,
    pub buffer: CompletionBuffer<C>,
    pub retry: RetryLedger,
    pub seen: BTreeSet<String>,
    pub touch: RefreshTouchBatch,
    pub restart: Option<RestartTracker>,
    /// Proxied applications resolved so far, by name.
    pub proxies: HashMap<String, Application>,
    pub stats: AggregationStatistics,
    pub doing_retries: bool,
}

impl<C: PersistenceContext> ApplicationRun<C> {
    pub fn new(
        application: Application,
        object_type: impl Into<String>,
        partition: impl Into<String>,
        config: &AggregationConfig,
        ledger: Option<RestartLedger>,
    ) -> Self {
        let partition = partition.into();
        let mut stats = AggregationStatistics::new();
        if let Some(ledger) = &ledger {
            stats.total = u32::try_from(ledger.len()).unwrap_or(u32::MAX);
            stats.created = ledger.created;
            stats.updated = ledger.updated;
        }
        Self {
            restart: ledger.map(|l| RestartTracker::new(partition.clone(), l, config.restart_flush_interval)),
            application,
            object_type: object_type.into(),
            partition,
            buffer: CompletionBuffer::new(),
            retry: RetryLedger::new(config.max_retry_records, config.retry_enabled),
            seen: BTreeSet::new(),
            touch: RefreshTouchBatch::new(config.last_refresh_batch_size),
            proxies: HashMap::new(),
            stats,
            doing_retries: false,
        }
    }

    /// Whether records of `object_type` are groups on this application.
    pub fn is_group(&self, object_type: &str) -> bool {
        object_type != self.application.account_schema.object_type
    }

    pub fn count(&mut self, application: &str, object_type: &str, outcome: RecordOutcome) {
        self.stats.record(application, object_type, outcome);
    }
}
