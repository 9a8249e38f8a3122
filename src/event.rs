//! The event alphabet driving run-state transitions
//!
//! Every event carries the workflow instance it addresses plus an
//! event-specific payload. The serialized form is internally tagged so
//! persisted event logs can be replayed; the `time_trigger`, `created`, and
//! `retry` variants only ever appear in such historical logs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{ExecutionDescription, Trigger, TriggerParameters, WorkflowInstance};
use crate::state::Message;

/// An input to the run-state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A trigger fired for the instance
    TriggerExecution {
        instance: WorkflowInstance,
        trigger: Trigger,
        parameters: TriggerParameters,
    },

    /// Status message recorded while the instance waits in QUEUED
    Info {
        instance: WorkflowInstance,
        message: Message,
    },

    /// The scheduler picked the instance off the queue, holding resources
    Dequeue {
        instance: WorkflowInstance,
        resource_ids: BTreeSet<String>,
    },

    /// Submission to the executor has begun
    Submit {
        instance: WorkflowInstance,
        execution_description: ExecutionDescription,
        execution_id: String,
    },

    /// The executor accepted the submission
    Submitted {
        instance: WorkflowInstance,
        execution_id: String,
        runner_id: String,
    },

    /// The execution began running
    Started { instance: WorkflowInstance },

    /// The execution exited; `exit_code` is absent when it could not be
    /// observed
    Terminate {
        instance: WorkflowInstance,
        exit_code: Option<i32>,
    },

    /// An application failure outside the execution itself
    RunError {
        instance: WorkflowInstance,
        message: String,
    },

    /// A successful termination was accepted
    Success { instance: WorkflowInstance },

    /// Schedule a retry after the given delay
    RetryAfter {
        instance: WorkflowInstance,
        delay_millis: i64,
    },

    /// Give up on the instance after a failure
    Stop { instance: WorkflowInstance },

    /// The instance dwelt in its state past the TTL
    Timeout { instance: WorkflowInstance },

    /// Administrative abort
    Halt { instance: WorkflowInstance },

    /// Legacy trigger form found in historical logs
    TimeTrigger { instance: WorkflowInstance },

    /// Legacy submission form found in historical logs
    Created {
        instance: WorkflowInstance,
        execution_id: String,
        docker_image: String,
    },

    /// Legacy retry form found in historical logs
    Retry { instance: WorkflowInstance },
}

impl Event {
    /// The workflow instance this event addresses
    pub fn instance(&self) -> &WorkflowInstance {
        match self {
            Event::TriggerExecution { instance, .. }
            | Event::Info { instance, .. }
            | Event::Dequeue { instance, .. }
            | Event::Submit { instance, .. }
            | Event::Submitted { instance, .. }
            | Event::Started { instance }
            | Event::Terminate { instance, .. }
            | Event::RunError { instance, .. }
            | Event::Success { instance }
            | Event::RetryAfter { instance, .. }
            | Event::Stop { instance }
            | Event::Timeout { instance }
            | Event::Halt { instance }
            | Event::TimeTrigger { instance }
            | Event::Created { instance, .. }
            | Event::Retry { instance } => instance,
        }
    }

    /// Stable event name, matching the serialized tag
    pub fn name(&self) -> &'static str {
        match self {
            Event::TriggerExecution { .. } => "trigger_execution",
            Event::Info { .. } => "info",
            Event::Dequeue { .. } => "dequeue",
            Event::Submit { .. } => "submit",
            Event::Submitted { .. } => "submitted",
            Event::Started { .. } => "started",
            Event::Terminate { .. } => "terminate",
            Event::RunError { .. } => "run_error",
            Event::Success { .. } => "success",
            Event::RetryAfter { .. } => "retry_after",
            Event::Stop { .. } => "stop",
            Event::Timeout { .. } => "timeout",
            Event::Halt { .. } => "halt",
            Event::TimeTrigger { .. } => "time_trigger",
            Event::Created { .. } => "created",
            Event::Retry { .. } => "retry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkflowId;

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new(WorkflowId::new("pipelines", "ingest"), "2026-08-01")
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let event = Event::Terminate {
            instance: instance(),
            exit_code: Some(20),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"terminate\""));
        assert!(json.contains("\"exit_code\":20"));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_absent_exit_code_round_trips() {
        let event = Event::Terminate {
            instance: instance(),
            exit_code: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_legacy_events_parse() {
        let json = format!(
            "{{\"type\":\"created\",\"instance\":{},\"execution_id\":\"e1\",\"docker_image\":\"img:1\"}}",
            serde_json::to_string(&instance()).unwrap()
        );
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Event::Created { .. }));

        let json = format!(
            "{{\"type\":\"time_trigger\",\"instance\":{}}}",
            serde_json::to_string(&instance()).unwrap()
        );
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Event::TimeTrigger { .. }));
    }

    #[test]
    fn test_name_matches_tag() {
        let event = Event::RetryAfter {
            instance: instance(),
            delay_millis: 1000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(&format!("\"type\":\"{}\"", event.name())));
    }

    #[test]
    fn test_instance_accessor() {
        let event = Event::Halt {
            instance: instance(),
        };
        assert_eq!(event.instance(), &instance());
    }
}
