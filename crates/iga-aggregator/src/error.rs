//! Aggregation error types.

use iga_store::StoreError;
use iga_terminator::TerminatorError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::identity::IdentityServiceError;
use crate::source::SourceError;

/// Errors that can occur during aggregation.
#[derive(Debug, Clone, Error)]
pub enum AggregationError {
    /// Persistence error.
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    /// Cascading deletion failed.
    #[error("Deletion error: {0}")]
    Terminator(#[from] TerminatorError),

    /// Record source error.
    #[error("Record source error: {0}")]
    Source(#[from] SourceError),

    /// Identity service error.
    #[error("Identity service error: {0}")]
    Identity(#[from] IdentityServiceError),

    /// Invalid aggregation arguments.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A record without a native identity that is not a delete.
    #[error("Record of type {object_type} has no native identity")]
    MissingNativeIdentity { object_type: String },

    /// A sparse or incremental record that resolves to no account.
    #[error("Correlation error: {message}")]
    Correlation { message: String },

    #[error("Application not found: {name}")]
    ApplicationNotFound { name: String },

    /// The application being aggregated disappeared mid-run.
    #[error("Application {name} was deleted during aggregation")]
    ApplicationVanished { name: String },

    /// More than one proxied application carries the same name.
    #[error("Ambiguous proxied application {name} under {proxy}")]
    AmbiguousProxy { name: String, proxy: String },

    #[error("Application {application} has no schema for {object_type}")]
    MissingSchema {
        application: String,
        object_type: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AggregationError {
    /// Create a correlation error.
    pub fn correlation(message: impl Into<String>) -> Self {
        Self::Correlation {
            message: message.into(),
        }
    }

    pub fn missing_native_identity(object_type: impl Into<String>) -> Self {
        Self::MissingNativeIdentity {
            object_type: object_type.into(),
        }
    }

    pub fn application_not_found(name: impl Into<String>) -> Self {
        Self::ApplicationNotFound { name: name.into() }
    }

    pub fn missing_schema(application: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self::MissingSchema {
            application: application.into(),
            object_type: object_type.into(),
        }
    }

    /// Whether a first-pass failure of this kind should be replayed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Terminator(e) => e.is_transient(),
            Self::Identity(e) => e.is_transient(),
            Self::Source(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the failure escapes the top-level entry point.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ApplicationVanished { .. })
    }

    /// Structural problems with an application's definition.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousProxy { .. } | Self::MissingSchema { .. } | Self::ApplicationNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for AggregationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for aggregation operations.
pub type AggregationResult<T> = Result<T, AggregationError>;
