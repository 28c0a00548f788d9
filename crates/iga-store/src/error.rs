//! Persistence error types.

use iga_core::{IdentityId, ObjectKind, ObjectRef};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a persistence context.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: ObjectKind, id: Uuid },

    /// Another holder owns the identity lock.
    #[error("Identity {identity} is locked by {holder}")]
    LockContention { identity: IdentityId, holder: String },

    /// A release was attempted with a token that does not own the lock.
    #[error("Lock on identity {identity} is not held by this token")]
    LockNotHeld { identity: IdentityId },

    /// Removing an object would leave another object pointing at it.
    #[error("Removing {removed} would orphan a reference from {referenced_by}")]
    IntegrityViolation {
        removed: ObjectRef,
        referenced_by: ObjectRef,
    },

    /// A failure expected to clear on retry.
    #[error("Transient persistence failure: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn not_found(kind: ObjectKind, id: impl Into<Uuid>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockContention { .. } | Self::Transient(_))
    }
}

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;
