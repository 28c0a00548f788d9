//! Run state shared between phases and the summary handed back to callers.
//!
//! Phases of a partitioned run may execute as separate task invocations. The
//! state that coordinates them is stored as JSON under the `aggregation`
//! attribute of the run's task result.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use iga_core::TaskResult;
use serde::{Deserialize, Serialize};

use crate::error::AggregationResult;
use crate::restart::RestartLedger;
use crate::source::Partition;
use crate::statistics::AggregationStatistics;

const STATE_ATTRIBUTE: &str = "aggregation";

/// Phases of an aggregation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Partition,
    Aggregate,
    CheckDeleted,
    Finish,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Partition,
        Phase::Aggregate,
        Phase::CheckDeleted,
        Phase::Finish,
    ];
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Partition => "partition",
            Phase::Aggregate => "aggregate",
            Phase::CheckDeleted => "check_deleted",
            Phase::Finish => "finish",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Warning and error messages, capped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMessages {
    #[serde(default)]
    messages: Vec<RunMessage>,
    #[serde(default = "default_message_cap")]
    cap: usize,
    /// Messages discarded once the cap was reached.
    #[serde(default)]
    dropped: usize,
}

fn default_message_cap() -> usize {
    100
}

impl Default for RunMessages {
    fn default() -> Self {
        Self::with_cap(default_message_cap())
    }
}

impl RunMessages {
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap,
            dropped: 0,
        }
    }

    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.push(MessageLevel::Warning, text.into());
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(MessageLevel::Error, text.into());
    }

    fn push(&mut self, level: MessageLevel, text: String) {
        if self.messages.len() >= self.cap {
            self.dropped += 1;
            return;
        }
        self.messages.push(RunMessage { level, text });
    }

    #[must_use]
    pub fn messages(&self) -> &[RunMessage] {
        &self.messages
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn warnings(&self) -> impl Iterator<Item = &RunMessage> {
        self.messages.iter().filter(|m| m.level == MessageLevel::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &RunMessage> {
        self.messages.iter().filter(|m| m.level == MessageLevel::Error)
    }
}

/// Cross-phase state of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Watermark for delete detection.
    #[serde(default)]
    pub pass_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminated: bool,
    /// Set by any error that makes the pass untrustworthy for deletion.
    #[serde(default)]
    pub check_deleted_cancelled: bool,
    /// Applications whose delete detection was disabled by retry overflow.
    #[serde(default)]
    pub check_deleted_disabled: BTreeSet<String>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub completed_partitions: BTreeSet<String>,
    #[serde(default)]
    pub completed_phases: BTreeSet<Phase>,
    /// Restart ledgers of partitions that have not completed.
    #[serde(default)]
    pub restart: BTreeMap<String, RestartLedger>,
    #[serde(default)]
    pub statistics: AggregationStatistics,
    #[serde(default)]
    pub messages: RunMessages,
}

impl RunState {
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: RunMessages::with_cap(max_messages),
            ..Self::default()
        }
    }

    /// Reads the state stored on a task result, if any.
    pub fn load(task_result: &TaskResult) -> AggregationResult<Option<Self>> {
        match task_result.attributes.get(STATE_ATTRIBUTE) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn store(&self, task_result: &mut TaskResult) -> AggregationResult<()> {
        task_result
            .attributes
            .insert(STATE_ATTRIBUTE.to_string(), serde_json::to_value(self)?);
        Ok(())
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSummary {
    pub statistics: AggregationStatistics,
    pub messages: Vec<RunMessage>,
    pub dropped_messages: usize,
    pub terminated: bool,
    pub check_deleted_cancelled: bool,
}

impl AggregationSummary {
    pub fn warnings(&self) -> impl Iterator<Item = &RunMessage> {
        self.messages.iter().filter(|m| m.level == MessageLevel::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &RunMessage> {
        self.messages.iter().filter(|m| m.level == MessageLevel::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_capped() {
        let mut messages = RunMessages::with_cap(2);
        messages.warn("one");
        messages.error("two");
        messages.error("three");
        assert_eq!(messages.messages().len(), 2);
        assert_eq!(messages.dropped(), 1);
        assert_eq!(messages.warnings().count(), 1);
    }

    #[test]
    fn test_state_round_trips_through_task_result() {
        let mut state = RunState::new(10);
        state.pass_start = Some(Utc::now());
        state.completed_phases.insert(Phase::Partition);
        state.restart.insert(
            "ldap:account".to_string(),
            RestartLedger {
                completed: ["u1".to_string()].into(),
                created: 1,
                updated: 0,
            },
        );

        let mut task_result = TaskResult::new("aggregate ldap");
        assert!(RunState::load(&task_result).unwrap().is_none());
        state.store(&mut task_result).unwrap();
        assert_eq!(RunState::load(&task_result).unwrap(), Some(state));
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::Partition < Phase::Aggregate);
        assert!(Phase::CheckDeleted < Phase::Finish);
        assert_eq!(Phase::CheckDeleted.to_string(), "check_deleted");
    }
}
