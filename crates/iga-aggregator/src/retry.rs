//! Records that failed their first pass, replayed once after it.

use tracing::warn;

use crate::record::ResourceObject;

/// Bounded per-application retry list.
///
/// Overflowing the cap empties and disables the ledger. The caller must then
/// treat the pass as incomplete.
#[derive(Debug, Clone)]
pub struct RetryLedger {
    records: Vec<ResourceObject>,
    cap: usize,
    enabled: bool,
    overflowed: bool,
}

impl RetryLedger {
    #[must_use]
    pub fn new(cap: usize, enabled: bool) -> Self {
        Self {
            records: Vec::new(),
            cap,
            enabled,
            overflowed: false,
        }
    }

    /// Queues a record. Returns `false` when the ledger refused it.
    pub fn push(&mut self, record: ResourceObject) -> bool {
        if !self.enabled || self.overflowed {
            return false;
        }
        if self.records.len() >= self.cap {
            warn!(cap = self.cap, "Retry list overflowed, retries disabled");
            self.records.clear();
            self.overflowed = true;
            return false;
        }
        self.records.push(record);
        true
    }

    #[must_use]
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn take(&mut self) -> Vec<ResourceObject> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_disables_ledger() {
        let mut ledger = RetryLedger::new(2, true);
        assert!(ledger.push(ResourceObject::account("a")));
        assert!(ledger.push(ResourceObject::account("b")));
        assert!(!ledger.push(ResourceObject::account("c")));
        assert!(ledger.is_overflowed());
        assert!(ledger.is_empty());
        assert!(!ledger.push(ResourceObject::account("d")));
    }

    #[test]
    fn test_disabled_ledger_refuses() {
        let mut ledger = RetryLedger::new(10, false);
        assert!(!ledger.push(ResourceObject::account("a")));
        assert!(!ledger.is_overflowed());
    }

    #[test]
    fn test_take_drains() {
        let mut ledger = RetryLedger::new(10, true);
        ledger.push(ResourceObject::account("a"));
        assert_eq!(ledger.take().len(), 1);
        assert!(ledger.is_empty());
    }
}
