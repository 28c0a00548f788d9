//! # iga-aggregator
//!
//! Reconciles accounts and groups read from applications with the identity
//! store.
//!
//! ```text
//! Partition ──▶ Aggregate ──────────────────────────────▶ CheckDeleted ──▶ Finish
//!               │ per record:                              stale links of
//!               │   gate: delete | optimize | update       the pass deleted
//!               │   correlate / create identity
//!               │   refresh link, external attributes
//!               │   complete identity on key change
//!               └ retry transient failures
//! ```
//!
//! ```ignore
//! let config = AggregationConfig::for_applications(["ldap"]);
//! let aggregator = Aggregator::new(ctx, source, identities, config);
//! let summary = aggregator.run().await?;
//! ```

pub mod aggregator;
pub mod buffer;
pub mod config;
pub mod error;
pub mod external;
pub mod gate;
pub mod groups;
pub mod identity;
pub mod membership;
pub mod record;
pub mod restart;
pub mod result;
pub mod retry;
pub mod session;
pub mod source;
pub mod statistics;
pub mod stream;
pub mod sweep;
pub mod touch;

mod account;
mod run;

pub use aggregator::Aggregator;
pub use config::{AggregationConfig, AggregationType, ConfigError};
pub use error::{AggregationError, AggregationResult};
pub use groups::GroupRefreshHook;
pub use identity::{
    IdentityService, IdentityServiceError, IdentityServiceResult, RefreshOutcome, SimpleIdentitizer, SimpleIdentitizerConfig,
};
pub use record::ResourceObject;
pub use result::{AggregationSummary, MessageLevel, Phase, RunMessage, RunState};
pub use source::{
    InMemoryRecordSource, IterateOptions, Partition, RecordFilter, RecordSource, RecordStream, SourceError,
};
pub use statistics::{AggregationStatistics, ObjectTypeStatistics, RecordOutcome};
