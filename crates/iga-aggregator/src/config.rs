//! Aggregation configuration.
//!
//! Built from a task's argument map with [`AggregationConfig::from_arguments`]
//! and checked with [`AggregationConfig::validate`] before a run starts.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of objects an aggregation imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    #[default]
    Account,
    Group,
}

impl AggregationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Group => "group",
        }
    }
}

impl Display for AggregationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(Self::Account),
            "group" => Ok(Self::Group),
            _ => Err(format!("Unknown aggregation type: {s}")),
        }
    }
}

/// Invalid aggregation arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid aggregation arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Options for one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Application names, aggregated in order.
    #[serde(default)]
    pub applications: Vec<String>,

    #[serde(default)]
    pub aggregation_type: AggregationType,

    /// Ask sources for changes only.
    #[serde(default)]
    pub delta: bool,

    /// Sweep children not seen by the pass.
    #[serde(default)]
    pub check_deleted: bool,

    /// Abort the sweep instead of deleting more than this many objects.
    #[serde(default)]
    pub check_deleted_threshold: Option<usize>,

    /// Ignore records that correlate to no identity.
    #[serde(default)]
    pub correlate_only: bool,

    /// Disable the unchanged-record short-circuit.
    #[serde(default)]
    pub no_optimize_reaggregation: bool,

    /// Attributes ignored when deciding whether a record changed.
    #[serde(default)]
    pub optimization_exclusions: BTreeSet<String>,

    /// Attribute grouping contiguous records of one identity.
    #[serde(default)]
    pub multiplex_attribute: Option<String>,

    /// Attribute naming the proxied application a record belongs to.
    #[serde(default)]
    pub source_application_attribute: Option<String>,

    #[serde(default)]
    pub halt_on_error: bool,

    /// Terminate once more than this many records failed.
    #[serde(default)]
    pub max_errors: Option<u32>,

    /// Applications run strictly one after another; with `halt_on_error`
    /// an application failure stops the run.
    #[serde(default)]
    pub sequential: bool,

    #[serde(default)]
    pub enable_partitioning: bool,

    #[serde(default = "default_objects_per_partition")]
    pub objects_per_partition: usize,

    #[serde(default = "default_true")]
    pub retry_enabled: bool,

    #[serde(default = "default_max_retry_records")]
    pub max_retry_records: usize,

    /// Identities completed between session decaches.
    #[serde(default = "default_max_connection_age")]
    pub max_connection_age: usize,

    #[serde(default = "default_max_result_messages")]
    pub max_result_messages: usize,

    /// Stop after this many records. Disables delete detection.
    #[serde(default)]
    pub max_accounts: Option<usize>,

    #[serde(default = "default_true")]
    pub detect_cycles: bool,

    /// Bootstrap managed attributes for account values.
    #[serde(default)]
    pub promote_managed_attributes: bool,

    #[serde(default)]
    pub group_description_attribute: Option<String>,

    #[serde(default)]
    pub group_classification_attribute: Option<String>,

    /// Persist completed native identities so an interrupted run can resume.
    #[serde(default)]
    pub restartable: bool,

    #[serde(default = "default_restart_flush_interval")]
    pub restart_flush_interval: usize,

    /// Write external attributes from a background task.
    #[serde(default)]
    pub external_attribute_worker: bool,

    #[serde(default = "default_external_attribute_queue")]
    pub external_attribute_queue: usize,

    #[serde(default = "default_external_attribute_wait_secs")]
    pub external_attribute_wait_secs: u64,

    /// Optimized links touched per bulk update.
    #[serde(default = "default_last_refresh_batch_size")]
    pub last_refresh_batch_size: usize,

    /// Delay before each record. Test-only throttle.
    #[serde(default)]
    pub throttle_delay_ms: Option<u64>,

    #[serde(default)]
    pub no_locking: bool,

    /// Keep a deleted-object row for deleted records carrying a uuid.
    #[serde(default)]
    pub record_deleted_objects: bool,
}

fn default_true() -> bool {
    true
}

fn default_objects_per_partition() -> usize {
    1000
}

fn default_max_retry_records() -> usize {
    10_000
}

fn default_max_connection_age() -> usize {
    100
}

fn default_max_result_messages() -> usize {
    100
}

fn default_restart_flush_interval() -> usize {
    100
}

fn default_external_attribute_queue() -> usize {
    1000
}

fn default_external_attribute_wait_secs() -> u64 {
    30
}

fn default_last_refresh_batch_size() -> usize {
    100
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            applications: Vec::new(),
            aggregation_type: AggregationType::default(),
            delta: false,
            check_deleted: false,
            check_deleted_threshold: None,
            correlate_only: false,
            no_optimize_reaggregation: false,
            optimization_exclusions: BTreeSet::new(),
            multiplex_attribute: None,
            source_application_attribute: None,
            halt_on_error: false,
            max_errors: None,
            sequential: false,
            enable_partitioning: false,
            objects_per_partition: default_objects_per_partition(),
            retry_enabled: true,
            max_retry_records: default_max_retry_records(),
            max_connection_age: default_max_connection_age(),
            max_result_messages: default_max_result_messages(),
            max_accounts: None,
            detect_cycles: true,
            promote_managed_attributes: false,
            group_description_attribute: None,
            group_classification_attribute: None,
            restartable: false,
            restart_flush_interval: default_restart_flush_interval(),
            external_attribute_worker: false,
            external_attribute_queue: default_external_attribute_queue(),
            external_attribute_wait_secs: default_external_attribute_wait_secs(),
            last_refresh_batch_size: default_last_refresh_batch_size(),
            throttle_delay_ms: None,
            no_locking: false,
            record_deleted_objects: false,
        }
    }
}

impl AggregationConfig {
    /// Builds a configuration for the given applications.
    #[must_use]
    pub fn for_applications<I, S>(applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            applications: applications.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parses a task argument map. Unknown keys are ignored.
    pub fn from_arguments(arguments: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(arguments)
            .map_err(|e| ConfigError::InvalidArguments(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.applications.is_empty() {
            return Err(ConfigError::invalid_value(
                "applications",
                "at least one application is required",
            ));
        }
        if self.applications.iter().any(|a| a.trim().is_empty()) {
            return Err(ConfigError::invalid_value(
                "applications",
                "application names must not be blank",
            ));
        }
        if self.enable_partitioning && self.objects_per_partition == 0 {
            return Err(ConfigError::invalid_value(
                "objects_per_partition",
                "must be greater than zero",
            ));
        }
        if self.restartable && self.restart_flush_interval == 0 {
            return Err(ConfigError::invalid_value(
                "restart_flush_interval",
                "must be greater than zero",
            ));
        }
        if self.external_attribute_worker && self.external_attribute_queue == 0 {
            return Err(ConfigError::invalid_value(
                "external_attribute_queue",
                "must be greater than zero",
            ));
        }
        if self.check_deleted_threshold == Some(0) {
            return Err(ConfigError::invalid_value(
                "check_deleted_threshold",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }

    /// Whether unchanged records may be skipped.
    #[must_use]
    pub fn optimize(&self) -> bool {
        !self.no_optimize_reaggregation
    }

    /// Attributes never compared by the optimization gate.
    #[must_use]
    pub fn comparison_exclusions(&self) -> BTreeSet<String> {
        let mut exclusions = self.optimization_exclusions.clone();
        exclusions.extend(self.multiplex_attribute.iter().cloned());
        exclusions.extend(self.source_application_attribute.iter().cloned());
        exclusions
    }

    #[must_use]
    pub fn external_attribute_wait(&self) -> Duration {
        Duration::from_secs(self.external_attribute_wait_secs)
    }

    #[must_use]
    pub fn throttle_delay(&self) -> Option<Duration> {
        self.throttle_delay_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = AggregationConfig::default();
        assert_eq!(config.objects_per_partition, 1000);
        assert_eq!(config.max_retry_records, 10_000);
        assert_eq!(config.max_connection_age, 100);
        assert_eq!(config.external_attribute_wait_secs, 30);
        assert!(config.retry_enabled);
        assert!(config.detect_cycles);
    }

    #[test]
    fn test_from_arguments() {
        let config = AggregationConfig::from_arguments(json!({
            "applications": ["ldap", "hr"],
            "aggregation_type": "group",
            "delta": true,
            "check_deleted_threshold": 50,
            "multiplex_attribute": "mux",
            "unknown_option": 1
        }))
        .unwrap();
        assert_eq!(config.applications, vec!["ldap", "hr"]);
        assert_eq!(config.aggregation_type, AggregationType::Group);
        assert!(config.delta);
        assert_eq!(config.check_deleted_threshold, Some(50));
        assert!(config.comparison_exclusions().contains("mux"));
    }

    #[test]
    fn test_validation_rejects_empty_application_list() {
        let err = AggregationConfig::from_arguments(json!({})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "applications"));
    }

    #[test]
    fn test_validation_rejects_bad_types() {
        let err = AggregationConfig::from_arguments(json!({"applications": "ldap"})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArguments(_)));
    }

    #[test]
    fn test_aggregation_type_parse() {
        assert_eq!("group".parse::<AggregationType>(), Ok(AggregationType::Group));
        assert!("role".parse::<AggregationType>().is_err());
    }
}
