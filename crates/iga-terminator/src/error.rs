//! Error types for cascading deletion.

use iga_core::ObjectKind;
use iga_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while deleting. A failed visit leaves the object in place.
#[derive(Debug, Clone, Error)]
pub enum TerminatorError {
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: ObjectKind, id: Uuid },
}

impl TerminatorError {
    /// Whether retrying the deletion later can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::NotFound { .. } => false,
        }
    }
}

/// Result type for deletion operations.
pub type TerminatorResult<T> = Result<T, TerminatorError>;
