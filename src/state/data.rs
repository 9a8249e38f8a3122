//! Accumulated per-instance bookkeeping
//!
//! `StateData` travels alongside the lifecycle state and records everything
//! the scheduler needs to make retry and dequeue decisions: what triggered
//! the run, what was submitted where, which resources are held, and the
//! retry/failure accounting.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Message;
use crate::model::{ExecutionDescription, Trigger, TriggerParameters};

/// Immutable snapshot of per-instance bookkeeping.
///
/// Values are never mutated in place; each transition derives a new value
/// through [`StateData::to_builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    /// What caused this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,

    /// Flat string form of `trigger`, kept for legacy consumers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,

    /// Parameter bag supplied with the trigger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_parameters: Option<TriggerParameters>,

    /// Identifier assigned by the downstream executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,

    /// Image, args, and commit info committed at submission time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_description: Option<ExecutionDescription>,

    /// Identifier of the process that accepted the submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,

    /// Named resource tokens held by this instance; absent until dequeue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_ids: Option<BTreeSet<String>>,

    /// How long the instance must wait in QUEUED before dequeue eligibility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_millis: Option<i64>,

    /// Count of submission attempts
    #[serde(default)]
    pub tries: u32,

    /// Length of the current back-to-back failure streak
    #[serde(default)]
    pub consecutive_failures: u32,

    /// Retry-budget accumulator; the scheduler stops retrying once it
    /// exceeds a configured threshold
    #[serde(default)]
    pub retry_cost: f64,

    /// Most recently observed exit code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<i32>,

    /// Ordered status messages; append-only within a run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

impl StateData {
    /// The initial value: all optionals absent, counters at zero.
    pub fn zero() -> Self {
        Self {
            trigger: None,
            trigger_id: None,
            trigger_parameters: None,
            execution_id: None,
            execution_description: None,
            runner_id: None,
            resource_ids: None,
            retry_delay_millis: None,
            tries: 0,
            consecutive_failures: 0,
            retry_cost: 0.0,
            last_exit: None,
            messages: Vec::new(),
        }
    }

    /// Start deriving a new value from this one.
    pub fn to_builder(&self) -> StateDataBuilder {
        StateDataBuilder {
            data: self.clone(),
        }
    }
}

impl Default for StateData {
    fn default() -> Self {
        Self::zero()
    }
}

/// Derives a new [`StateData`] with selected fields replaced.
#[derive(Debug, Clone)]
pub struct StateDataBuilder {
    data: StateData,
}

impl StateDataBuilder {
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.data.trigger = Some(trigger);
        self
    }

    pub fn trigger_id(mut self, trigger_id: impl Into<String>) -> Self {
        self.data.trigger_id = Some(trigger_id.into());
        self
    }

    pub fn trigger_parameters(mut self, parameters: TriggerParameters) -> Self {
        self.data.trigger_parameters = Some(parameters);
        self
    }

    pub fn execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.data.execution_id = Some(execution_id.into());
        self
    }

    pub fn clear_execution_id(mut self) -> Self {
        self.data.execution_id = None;
        self
    }

    pub fn execution_description(mut self, description: ExecutionDescription) -> Self {
        self.data.execution_description = Some(description);
        self
    }

    pub fn clear_execution_description(mut self) -> Self {
        self.data.execution_description = None;
        self
    }

    pub fn runner_id(mut self, runner_id: impl Into<String>) -> Self {
        self.data.runner_id = Some(runner_id.into());
        self
    }

    pub fn resource_ids(mut self, resource_ids: BTreeSet<String>) -> Self {
        self.data.resource_ids = Some(resource_ids);
        self
    }

    pub fn clear_resource_ids(mut self) -> Self {
        self.data.resource_ids = None;
        self
    }

    pub fn retry_delay_millis(mut self, delay_millis: i64) -> Self {
        self.data.retry_delay_millis = Some(delay_millis);
        self
    }

    pub fn clear_retry_delay(mut self) -> Self {
        self.data.retry_delay_millis = None;
        self
    }

    pub fn tries(mut self, tries: u32) -> Self {
        self.data.tries = tries;
        self
    }

    pub fn consecutive_failures(mut self, consecutive_failures: u32) -> Self {
        self.data.consecutive_failures = consecutive_failures;
        self
    }

    pub fn retry_cost(mut self, retry_cost: f64) -> Self {
        self.data.retry_cost = retry_cost;
        self
    }

    pub fn last_exit(mut self, exit_code: Option<i32>) -> Self {
        self.data.last_exit = exit_code;
        self
    }

    /// Append a message; earlier messages are preserved.
    pub fn message(mut self, message: Message) -> Self {
        self.data.messages.push(message);
        self
    }

    pub fn build(self) -> StateData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_empty() {
        let data = StateData::zero();
        assert!(data.trigger.is_none());
        assert!(data.execution_id.is_none());
        assert!(data.resource_ids.is_none());
        assert!(data.retry_delay_millis.is_none());
        assert!(data.last_exit.is_none());
        assert_eq!(data.tries, 0);
        assert_eq!(data.consecutive_failures, 0);
        assert_eq!(data.retry_cost, 0.0);
        assert!(data.messages.is_empty());
    }

    #[test]
    fn test_builder_replaces_only_selected_fields() {
        let base = StateData::zero()
            .to_builder()
            .execution_id("exec-1")
            .tries(3)
            .build();

        let derived = base.to_builder().runner_id("runner-a").build();

        assert_eq!(derived.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(derived.tries, 3);
        assert_eq!(derived.runner_id.as_deref(), Some("runner-a"));
        // The source value is untouched.
        assert!(base.runner_id.is_none());
    }

    #[test]
    fn test_builder_clears_optionals() {
        let data = StateData::zero()
            .to_builder()
            .execution_id("exec-1")
            .retry_delay_millis(1000)
            .resource_ids(BTreeSet::from(["r1".to_string()]))
            .build();

        let cleared = data
            .to_builder()
            .clear_execution_id()
            .clear_retry_delay()
            .clear_resource_ids()
            .build();

        assert!(cleared.execution_id.is_none());
        assert!(cleared.retry_delay_millis.is_none());
        assert!(cleared.resource_ids.is_none());
    }

    #[test]
    fn test_messages_append() {
        let data = StateData::zero()
            .to_builder()
            .message(Message::info("first"))
            .build();
        let data = data.to_builder().message(Message::error("second")).build();

        assert_eq!(data.messages.len(), 2);
        assert_eq!(data.messages[0].line, "first");
        assert_eq!(data.messages[1].line, "second");
    }

    #[test]
    fn test_absence_survives_round_trip() {
        let data = StateData::zero().to_builder().last_exit(Some(0)).build();
        let json = serde_json::to_string(&data).unwrap();
        let parsed: StateData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.last_exit, Some(0));

        let absent = StateData::zero();
        let json = serde_json::to_string(&absent).unwrap();
        assert!(!json.contains("last_exit"));
        let parsed: StateData = serde_json::from_str(&json).unwrap();
        assert!(parsed.last_exit.is_none());
    }

    #[test]
    fn test_empty_resource_set_distinct_from_absent() {
        let held = StateData::zero()
            .to_builder()
            .resource_ids(BTreeSet::new())
            .build();
        let json = serde_json::to_string(&held).unwrap();
        let parsed: StateData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.resource_ids, Some(BTreeSet::new()));
        assert_ne!(parsed, StateData::zero());
    }
}
