//! Aggregation statistics.
//!
//! Counters are kept for the whole run and broken down per application and
//! object type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a record was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new link was attached.
    Created,
    /// An existing link was refreshed.
    Updated,
    /// The link was removed.
    Deleted,
    /// Unchanged since the last run; only the refresh date moved.
    Optimized,
    /// Filtered out or no longer present on the application.
    Ignored,
}

/// Counters for one application object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeStatistics {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub created: u32,
    #[serde(default)]
    pub updated: u32,
    #[serde(default)]
    pub deleted: u32,
    #[serde(default)]
    pub optimized: u32,
    #[serde(default)]
    pub ignored: u32,
}

impl ObjectTypeStatistics {
    fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Deleted => self.deleted += 1,
            RecordOutcome::Optimized => self.optimized += 1,
            RecordOutcome::Ignored => self.ignored += 1,
        }
    }

    fn merge(&mut self, other: &ObjectTypeStatistics) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.optimized += other.optimized;
        self.ignored += other.ignored;
    }
}

/// Statistics for an aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationStatistics {
    /// Records read from the source.
    #[serde(default)]
    pub total: u32,
    /// Links created.
    #[serde(default)]
    pub created: u32,
    /// Links refreshed with changes.
    #[serde(default)]
    pub updated: u32,
    /// Links removed, by delete records or the missing-account sweep.
    #[serde(default)]
    pub deleted: u32,
    /// Identities whose completion failed.
    #[serde(default)]
    pub damaged: u32,
    /// Records replayed from the retry list.
    #[serde(default)]
    pub retried: u32,
    /// Records filtered out or skipped by policy.
    #[serde(default)]
    pub ignored: u32,
    /// Records that matched their link and were only touched.
    #[serde(default)]
    pub optimized: u32,
    /// Records skipped because a previous attempt already completed them.
    #[serde(default)]
    pub skipped: u32,
    /// Records that failed for good.
    #[serde(default)]
    pub errors: u32,
    /// Managed attributes created from group records.
    #[serde(default)]
    pub groups_created: u32,
    /// Managed attributes refreshed from group records.
    #[serde(default)]
    pub groups_updated: u32,
    /// Managed attributes removed, by delete records or the group sweep.
    #[serde(default)]
    pub groups_deleted: u32,
    /// Groups whose reported members differ from the persisted ones.
    #[serde(default)]
    pub membership_updates: u32,
    /// Accounts fetched individually because their membership changed.
    #[serde(default)]
    pub missing_accounts: u32,
    /// Group hierarchy edges dropped to break a cycle.
    #[serde(default)]
    pub cycles_pruned: u32,
    /// Managed attributes created from account entitlement values.
    #[serde(default)]
    pub managed_attributes_promoted: u32,
    /// Per application, per object type.
    #[serde(default)]
    pub by_application: BTreeMap<String, BTreeMap<String, ObjectTypeStatistics>>,
}

impl AggregationStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn breakdown(&mut self, application: &str, object_type: &str) -> &mut ObjectTypeStatistics {
        self.by_application
            .entry(application.to_string())
            .or_default()
            .entry(object_type.to_string())
            .or_default()
    }

    /// Counts a record read from the source.
    pub fn scanned(&mut self, application: &str, object_type: &str) {
        self.total += 1;
        self.breakdown(application, object_type).total += 1;
    }

    pub fn record(&mut self, application: &str, object_type: &str, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Deleted => self.deleted += 1,
            RecordOutcome::Optimized => self.optimized += 1,
            RecordOutcome::Ignored => self.ignored += 1,
        }
        self.breakdown(application, object_type).count(outcome);
    }

    /// Reverses an optimistic update count after a failed completion.
    pub fn damage(&mut self, application: &str, object_type: &str) {
        self.damaged += 1;
        self.updated = self.updated.saturating_sub(1);
        let breakdown = self.breakdown(application, object_type);
        breakdown.updated = breakdown.updated.saturating_sub(1);
    }

    #[must_use]
    pub fn for_object_type(&self, application: &str, object_type: &str) -> Option<&ObjectTypeStatistics> {
        self.by_application.get(application)?.get(object_type)
    }

    /// Merge with another statistics instance.
    pub fn merge(&mut self, other: &AggregationStatistics) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.damaged += other.damaged;
        self.retried += other.retried;
        self.ignored += other.ignored;
        self.optimized += other.optimized;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.groups_created += other.groups_created;
        self.groups_updated += other.groups_updated;
        self.groups_deleted += other.groups_deleted;
        self.membership_updates += other.membership_updates;
        self.missing_accounts += other.missing_accounts;
        self.cycles_pruned += other.cycles_pruned;
        self.managed_attributes_promoted += other.managed_attributes_promoted;

        for (application, types) in &other.by_application {
            for (object_type, stats) in types {
                self.breakdown(application, object_type).merge(stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakdown_follows_totals() {
        let mut stats = AggregationStatistics::new();
        stats.scanned("ldap", "account");
        stats.record("ldap", "account", RecordOutcome::Created);
        stats.scanned("ldap", "group");
        stats.record("ldap", "group", RecordOutcome::Optimized);

        assert_eq!(stats.total, 2);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.for_object_type("ldap", "account").unwrap().created, 1);
        assert_eq!(stats.for_object_type("ldap", "group").unwrap().optimized, 1);
    }

    #[test]
    fn test_damage_reverses_update() {
        let mut stats = AggregationStatistics::new();
        stats.record("ldap", "account", RecordOutcome::Updated);
        stats.damage("ldap", "account");
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.damaged, 1);
        stats.damage("ldap", "account");
        assert_eq!(stats.updated, 0);
    }

    #[test]
    fn test_merge() {
        let mut a = AggregationStatistics::new();
        a.record("ldap", "account", RecordOutcome::Created);
        let mut b = AggregationStatistics::new();
        b.record("ldap", "account", RecordOutcome::Created);
        b.cycles_pruned = 2;
        a.merge(&b);
        assert_eq!(a.created, 2);
        assert_eq!(a.cycles_pruned, 2);
        assert_eq!(a.for_object_type("ldap", "account").unwrap().created, 2);
    }

    #[test]
    fn test_deserializes_sparse_json() {
        let stats: AggregationStatistics = serde_json::from_str(r#"{"created": 3}"#).unwrap();
        assert_eq!(stats.created, 3);
        assert!(stats.by_application.is_empty());
    }
}
