//! Restart ledger: which records of a partition are already done.
//!
//! The persisted form is an append-only set of native identities plus the
//! created and updated counts. It is flushed every `flush_interval`
//! completions, not every record, so a resumed run may redo up to that many.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartLedger {
    #[serde(default)]
    pub completed: BTreeSet<String>,
    #[serde(default)]
    pub created: u32,
    #[serde(default)]
    pub updated: u32,
}

impl RestartLedger {
    #[must_use]
    pub fn contains(&self, native_identity: &str) -> bool {
        self.completed.contains(native_identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

/// Live view of one partition's ledger.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    partition: String,
    ledger: RestartLedger,
    flush_interval: usize,
    unflushed: usize,
}

impl RestartTracker {
    #[must_use]
    pub fn new(partition: impl Into<String>, ledger: RestartLedger, flush_interval: usize) -> Self {
        Self {
            partition: partition.into(),
            ledger,
            flush_interval: flush_interval.max(1),
            unflushed: 0,
        }
    }

    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    #[must_use]
    pub fn is_completed(&self, native_identity: &str) -> bool {
        self.ledger.contains(native_identity)
    }

    /// Records a completed native identity. Returns `true` when a flush is due.
    pub fn complete(&mut self, native_identity: &str, created: Option<bool>) -> bool {
        if !self.ledger.completed.insert(native_identity.to_string()) {
            return false;
        }
        match created {
            Some(true) => self.ledger.created += 1,
            Some(false) => self.ledger.updated += 1,
            None => {}
        }
        self.unflushed += 1;
        self.unflushed >= self.flush_interval
    }

    #[must_use]
    pub fn has_unflushed(&self) -> bool {
        self.unflushed > 0
    }

    /// Snapshot to persist. Resets the unflushed count.
    pub fn flush(&mut self) -> RestartLedger {
        self.unflushed = 0;
        self.ledger.clone()
    }

    #[must_use]
    pub fn ledger(&self) -> &RestartLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_interval() {
        let mut tracker = RestartTracker::new("p1", RestartLedger::default(), 2);
        assert!(!tracker.complete("a", Some(true)));
        assert!(tracker.complete("b", Some(false)));
        let ledger = tracker.flush();
        assert_eq!(ledger.len(), 2);
        assert_eq!((ledger.created, ledger.updated), (1, 1));
        assert!(!tracker.has_unflushed());
    }

    #[test]
    fn test_duplicates_do_not_count() {
        let mut tracker = RestartTracker::new("p1", RestartLedger::default(), 10);
        tracker.complete("a", Some(true));
        tracker.complete("a", Some(true));
        assert_eq!(tracker.ledger().created, 1);
    }

    #[test]
    fn test_resume_from_persisted_ledger() {
        let persisted: RestartLedger =
            serde_json::from_str(r#"{"completed": ["a", "b"], "created": 2}"#).unwrap();
        let tracker = RestartTracker::new("p1", persisted, 10);
        assert!(tracker.is_completed("a"));
        assert!(!tracker.is_completed("c"));
        assert_eq!(tracker.ledger().updated, 0);
    }
}
