//! The record source contract.
//!
//! A source streams the accounts or groups of one application object type
//! and can fetch a single object by native identity. "Not found" is reported
//! distinctly from every other failure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use iga_core::Application;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::ResourceObject;

/// Errors raised by a record source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("{object_type} {native_identity} not found")]
    NotFound {
        object_type: String,
        native_identity: String,
    },

    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Iteration failure: {0}")]
    Iteration(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl SourceError {
    pub fn not_found(object_type: impl Into<String>, native_identity: impl Into<String>) -> Self {
        Self::NotFound {
            object_type: object_type.into(),
            native_identity: native_identity.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Iteration(_))
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Equality filter on one attribute, applied by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub attribute: String,
    pub value: String,
}

impl RecordFilter {
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, record: &ResourceObject) -> bool {
        record.values(&self.attribute).contains(&self.value)
    }
}

/// A slice of one application's object stream, processed independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub application: String,
    pub object_type: String,
    pub offset: usize,
    /// `None` reads to the end of the stream.
    pub size: Option<usize>,
}

impl Partition {
    /// The whole stream as one partition.
    #[must_use]
    pub fn whole(application: &str, object_type: &str) -> Self {
        Self {
            name: format!("{application}:{object_type}"),
            application: application.to_string(),
            object_type: object_type.to_string(),
            offset: 0,
            size: None,
        }
    }
}

/// Options passed to [`RecordSource::iterate`].
#[derive(Debug, Clone, Default)]
pub struct IterateOptions {
    /// Changes since the previous delta run only.
    pub delta: bool,
    /// Groups carry their member list.
    pub include_membership: bool,
    pub filter: Option<RecordFilter>,
    pub partition: Option<Partition>,
}

/// A closable stream of records.
#[async_trait]
pub trait RecordStream: Send {
    async fn next(&mut self) -> SourceResult<Option<ResourceObject>>;

    async fn close(&mut self) -> SourceResult<()> {
        Ok(())
    }
}

/// The connector side of aggregation.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn iterate(
        &self,
        application: &Application,
        object_type: &str,
        options: &IterateOptions,
    ) -> SourceResult<Box<dyn RecordStream>>;

    /// Reads one object by native identity.
    async fn get_object(
        &self,
        application: &Application,
        object_type: &str,
        native_identity: &str,
    ) -> SourceResult<ResourceObject>;

    /// Splits the stream into partitions of about `size` objects.
    async fn partitions(
        &self,
        application: &Application,
        object_type: &str,
        _size: usize,
    ) -> SourceResult<Vec<Partition>> {
        Ok(vec![Partition::whole(&application.name, object_type)])
    }
}

/// Stream over records already in memory.
#[derive(Debug, Default)]
pub struct VecRecordStream {
    records: VecDeque<ResourceObject>,
    closed: bool,
}

impl VecRecordStream {
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = ResourceObject>) -> Self {
        Self {
            records: records.into_iter().collect(),
            closed: false,
        }
    }
}

#[async_trait]
impl RecordStream for VecRecordStream {
    async fn next(&mut self) -> SourceResult<Option<ResourceObject>> {
        if self.closed {
            return Err(SourceError::Iteration("stream is closed".to_string()));
        }
        Ok(self.records.pop_front())
    }

    async fn close(&mut self) -> SourceResult<()> {
        self.closed = true;
        self.records.clear();
        Ok(())
    }
}

type FeedKey = (String, String);

/// In-memory source keyed by application name and object type.
///
/// Full feeds answer regular iteration, partitioning and single-object
/// reads. Delta feeds answer delta iteration and fall back to the full feed
/// when none was set.
#[derive(Debug, Default)]
pub struct InMemoryRecordSource {
    full: RwLock<HashMap<FeedKey, Vec<ResourceObject>>>,
    delta: RwLock<HashMap<FeedKey, Vec<ResourceObject>>>,
    iterations: AtomicUsize,
    lookups: AtomicUsize,
}

impl InMemoryRecordSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the full feed of an application object type.
    pub fn set_records(&self, application: &str, object_type: &str, records: Vec<ResourceObject>) {
        if let Ok(mut full) = self.full.write() {
            full.insert(key(application, object_type), records);
        }
    }

    /// Replaces the delta feed of an application object type.
    pub fn set_delta(&self, application: &str, object_type: &str, records: Vec<ResourceObject>) {
        if let Ok(mut delta) = self.delta.write() {
            delta.insert(key(application, object_type), records);
        }
    }

    /// Number of streams opened.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::SeqCst)
    }

    /// Number of single-object reads.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn feed(&self, application: &str, object_type: &str, delta: bool) -> SourceResult<Vec<ResourceObject>> {
        let key = key(application, object_type);
        if delta {
            let feeds = self
                .delta
                .read()
                .map_err(|_| SourceError::connection("delta feed lock poisoned"))?;
            if let Some(records) = feeds.get(&key) {
                return Ok(records.clone());
            }
        }
        let feeds = self
            .full
            .read()
            .map_err(|_| SourceError::connection("feed lock poisoned"))?;
        Ok(feeds.get(&key).cloned().unwrap_or_default())
    }
}

fn key(application: &str, object_type: &str) -> FeedKey {
    (application.to_string(), object_type.to_string())
}

fn strip_membership(mut record: ResourceObject, member_attribute: Option<&str>) -> ResourceObject {
    if let Some(attribute) = member_attribute {
        record.attributes.remove(attribute);
    }
    record
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn iterate(
        &self,
        application: &Application,
        object_type: &str,
        options: &IterateOptions,
    ) -> SourceResult<Box<dyn RecordStream>> {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        let records = self.feed(&application.name, object_type, options.delta)?;

        let records: Vec<ResourceObject> = match &options.partition {
            Some(partition) => records
                .into_iter()
                .skip(partition.offset)
                .take(partition.size.unwrap_or(usize::MAX))
                .collect(),
            None => records,
        };

        let member_attribute = if options.include_membership {
            None
        } else {
            application
                .group_schema(object_type)
                .and_then(|s| s.member_attribute.as_deref())
        };

        let records = records
            .into_iter()
            .filter(|r| options.filter.as_ref().map_or(true, |f| f.matches(r)))
            .map(|r| strip_membership(r, member_attribute))
            .collect::<Vec<_>>();

        Ok(Box::new(VecRecordStream::new(records)))
    }

    async fn get_object(
        &self,
        application: &Application,
        object_type: &str,
        native_identity: &str,
    ) -> SourceResult<ResourceObject> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.feed(&application.name, object_type, false)?
            .into_iter()
            .find(|r| r.native() == Some(native_identity))
            .ok_or_else(|| SourceError::not_found(object_type, native_identity))
    }

    async fn partitions(
        &self,
        application: &Application,
        object_type: &str,
        size: usize,
    ) -> SourceResult<Vec<Partition>> {
        let total = self.feed(&application.name, object_type, false)?.len();
        if size == 0 || total <= size {
            return Ok(vec![Partition::whole(&application.name, object_type)]);
        }
        Ok((0..total)
            .step_by(size)
            .enumerate()
            .map(|(index, offset)| Partition {
                name: format!("{}:{}:{}", application.name, object_type, index + 1),
                application: application.name.clone(),
                object_type: object_type.to_string(),
                offset,
                size: Some(size),
            })
            .collect())
    }
}
