//! Uniform iteration over source, partition and manual record lists.

use std::collections::VecDeque;

use tracing::warn;

use crate::record::ResourceObject;
use crate::source::{RecordStream, SourceResult};

/// Where the records of one aggregation pass come from.
pub enum AccountStream {
    /// A connector stream, whole or partitioned.
    Source(Box<dyn RecordStream>),
    /// A caller-supplied list.
    Manual(VecDeque<ResourceObject>),
}

impl AccountStream {
    #[must_use]
    pub fn manual(records: impl IntoIterator<Item = ResourceObject>) -> Self {
        Self::Manual(records.into_iter().collect())
    }

    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual(_))
    }

    pub async fn next(&mut self) -> SourceResult<Option<ResourceObject>> {
        match self {
            Self::Source(stream) => stream.next().await,
            Self::Manual(records) => Ok(records.pop_front()),
        }
    }

    /// Closes the underlying stream. A failure is logged, not returned.
    pub async fn close(&mut self) {
        match self {
            Self::Source(stream) => {
                if let Err(e) = stream.close().await {
                    warn!(error = %e, "Failed to close record stream");
                }
            }
            Self::Manual(records) => records.clear(),
        }
    }
}

impl std::fmt::Debug for AccountStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(_) => f.write_str("AccountStream::Source"),
            Self::Manual(records) => write!(f, "AccountStream::Manual({})", records.len()),
        }
    }
}
