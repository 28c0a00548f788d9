//! Common fixtures for iga-aggregator integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use iga_aggregator::identity::account_filter;
use iga_aggregator::source::SourceResult;
use iga_aggregator::*;
use iga_core::*;
use iga_store::{Filter, InMemoryContext, PersistenceContext, QueryOptions};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a test subscriber when `RUST_LOG` is set.
pub fn init_tracing() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// An LDAP-like application: accounts reference groups through `groups`,
/// groups list members in `member` and parents in `memberOf`.
pub fn ldap() -> Application {
    Application::new("ldap")
        .with_account_schema(
            Schema::new(Schema::ACCOUNT)
                .with_attribute(AttributeDefinition::new("mail"))
                .with_attribute(AttributeDefinition::new("costCenter").external())
                .with_attribute(AttributeDefinition::group_reference("groups", Schema::GROUP)),
        )
        .with_group_schema(
            Schema::new(Schema::GROUP)
                .with_member_attribute("member")
                .with_hierarchy_attribute("memberOf"),
        )
}

pub fn account(native: &str) -> ResourceObject {
    ResourceObject::account(native)
        .with_display_name(native.to_uppercase())
        .with_attribute("mail", format!("{native}@example.com"))
}

/// `count` accounts named `user000`, `user001`, ...
pub fn accounts(count: usize) -> Vec<ResourceObject> {
    (0..count).map(|i| account(&format!("user{i:03}"))).collect()
}

pub struct Fixture {
    pub ctx: Arc<InMemoryContext>,
    pub source: Arc<InMemoryRecordSource>,
    pub identities: Arc<SimpleIdentitizer<InMemoryContext>>,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let ctx = Arc::new(InMemoryContext::new().with_integrity_checks());
        Self {
            identities: Arc::new(SimpleIdentitizer::new(Arc::clone(&ctx))),
            source: Arc::new(InMemoryRecordSource::new()),
            ctx,
        }
    }

    /// Seeds the application and its account feed.
    pub fn install(&self, application: &Application, records: Vec<ResourceObject>) {
        self.ctx.seed(application.clone());
        self.source
            .set_records(&application.name, Schema::ACCOUNT, records);
    }

    pub fn aggregator(&self, config: AggregationConfig) -> Aggregator<InMemoryContext> {
        self.aggregator_with(self.source.clone(), self.identities.clone(), config)
    }

    pub fn aggregator_with(
        &self,
        source: Arc<dyn RecordSource>,
        identities: Arc<dyn IdentityService>,
        config: AggregationConfig,
    ) -> Aggregator<InMemoryContext> {
        Aggregator::new(Arc::clone(&self.ctx), source, identities, config)
    }

    pub fn task_result(&self) -> TaskResult {
        let result = TaskResult::new("Aggregate ldap");
        self.ctx.seed(result.clone());
        result
    }

    /// Links of an application, ordered by native identity.
    pub async fn links(&self, application: &Application) -> Vec<Link> {
        let mut links = self
            .ctx
            .search::<Link>(&QueryOptions::filter(Filter::eq("application", application.id)))
            .await
            .unwrap();
        links.sort_by(|a, b| a.native_identity.cmp(&b.native_identity));
        links
    }

    pub async fn link(&self, application: &Application, native: &str) -> Option<Link> {
        self.ctx
            .find_one::<Link>(account_filter(application.id, native, None))
            .await
            .unwrap()
    }

    pub async fn group(&self, application: &Application, value: &str) -> Option<ManagedAttribute> {
        self.ctx
            .find_one::<ManagedAttribute>(Filter::and([
                Filter::eq("application", application.id),
                Filter::eq("value", value),
            ]))
            .await
            .unwrap()
    }

    /// Seeds an account aggregated `age` before now.
    pub fn seed_account(&self, application: &Application, native: &str, age: Duration) -> (Identity, Link) {
        let mut identity = Identity::new(native);
        let mut link = Link::new(identity.id, application.id, native);
        link.created = Utc::now() - age;
        link.last_refresh = Some(link.created);
        identity.links.push(link.id);
        self.ctx.seed(identity.clone());
        self.ctx.seed(link.clone());
        (identity, link)
    }
}

/// Stream that raises a termination flag when handing out record `after + 1`.
struct TerminatingStream {
    inner: Box<dyn RecordStream>,
    served: usize,
    after: usize,
    flag: Arc<AtomicBool>,
}

#[async_trait]
impl RecordStream for TerminatingStream {
    async fn next(&mut self) -> SourceResult<Option<ResourceObject>> {
        let record = self.inner.next().await?;
        if record.is_some() {
            self.served += 1;
            if self.served > self.after {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(record)
    }
}

/// Source that stops the aggregation after a number of records.
pub struct TerminateAfter {
    inner: Arc<InMemoryRecordSource>,
    after: usize,
    flag: OnceLock<Arc<AtomicBool>>,
}

impl TerminateAfter {
    pub fn new(inner: Arc<InMemoryRecordSource>, after: usize) -> Self {
        Self {
            inner,
            after,
            flag: OnceLock::new(),
        }
    }

    pub fn arm(&self, flag: Arc<AtomicBool>) {
        self.flag.set(flag).ok();
    }
}

#[async_trait]
impl RecordSource for TerminateAfter {
    async fn iterate(
        &self,
        application: &Application,
        object_type: &str,
        options: &IterateOptions,
    ) -> SourceResult<Box<dyn RecordStream>> {
        let inner = self.inner.iterate(application, object_type, options).await?;
        match self.flag.get() {
            Some(flag) => Ok(Box::new(TerminatingStream {
                inner,
                served: 0,
                after: self.after,
                flag: Arc::clone(flag),
            })),
            None => Ok(inner),
        }
    }

    async fn get_object(
        &self,
        application: &Application,
        object_type: &str,
        native_identity: &str,
    ) -> SourceResult<ResourceObject> {
        self.inner
            .get_object(application, object_type, native_identity)
            .await
    }
}

/// Source that runs a callback when iteration starts, after the pass began.
pub struct OnIterate {
    inner: Arc<InMemoryRecordSource>,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl OnIterate {
    pub fn new(inner: Arc<InMemoryRecordSource>, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner,
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl RecordSource for OnIterate {
    async fn iterate(
        &self,
        application: &Application,
        object_type: &str,
        options: &IterateOptions,
    ) -> SourceResult<Box<dyn RecordStream>> {
        (self.callback)();
        self.inner.iterate(application, object_type, options).await
    }

    async fn get_object(
        &self,
        application: &Application,
        object_type: &str,
        native_identity: &str,
    ) -> SourceResult<ResourceObject> {
        self.inner
            .get_object(application, object_type, native_identity)
            .await
    }
}

/// Identity service that counts correlations and can fail chosen records
/// once with a transient error.
pub struct InstrumentedIdentities {
    inner: Arc<dyn IdentityService>,
    pub correlations: AtomicUsize,
    fail_once: Mutex<HashSet<String>>,
}

impl InstrumentedIdentities {
    pub fn new(inner: Arc<dyn IdentityService>) -> Self {
        Self {
            inner,
            correlations: AtomicUsize::new(0),
            fail_once: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_once(self, native: &str) -> Self {
        if let Ok(mut fail) = self.fail_once.lock() {
            fail.insert(native.to_string());
        }
        self
    }

    pub fn correlations(&self) -> usize {
        self.correlations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityService for InstrumentedIdentities {
    async fn correlate(
        &self,
        application: &Application,
        record: &ResourceObject,
        existing: Option<&Link>,
        allow_reparent: bool,
    ) -> IdentityServiceResult<Option<Identity>> {
        self.correlations.fetch_add(1, Ordering::SeqCst);
        self.inner
            .correlate(application, record, existing, allow_reparent)
            .await
    }

    async fn create(&self, application: &Application, record: &ResourceObject) -> IdentityServiceResult<Identity> {
        self.inner.create(application, record).await
    }

    async fn refresh_link(
        &self,
        identity: &mut Identity,
        application: &Application,
        record: &ResourceObject,
    ) -> IdentityServiceResult<Link> {
        let fail = record
            .native()
            .is_some_and(|native| self.fail_once.lock().map(|mut f| f.remove(native)).unwrap_or(false));
        if fail {
            return Err(IdentityServiceError::transient("connection reset"));
        }
        self.inner.refresh_link(identity, application, record).await
    }

    async fn refresh(&self, identity: Identity) -> IdentityServiceResult<RefreshOutcome> {
        self.inner.refresh(identity).await
    }
}
