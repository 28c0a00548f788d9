//! Session age tracking.

/// Signals a session decache every `max_age` completed identities.
#[derive(Debug, Clone)]
pub struct SessionGovernor {
    max_age: usize,
    completed: usize,
}

impl SessionGovernor {
    #[must_use]
    pub fn new(max_age: usize) -> Self {
        Self {
            max_age,
            completed: 0,
        }
    }

    /// Counts one completed identity. Returns `true` when the session should
    /// be decached.
    pub fn completed(&mut self) -> bool {
        if self.max_age == 0 {
            return false;
        }
        self.completed += 1;
        if self.completed >= self.max_age {
            self.completed = 0;
            return true;
        }
        false
    }

    /// Restarts the count after the session was cleared for another reason.
    pub fn reset(&mut self) {
        self.completed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decache_cadence() {
        let mut governor = SessionGovernor::new(3);
        let due: Vec<bool> = (0..6).map(|_| governor.completed()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_zero_disables() {
        let mut governor = SessionGovernor::new(0);
        assert!(!(0..10).any(|_| governor.completed()));
    }
}
