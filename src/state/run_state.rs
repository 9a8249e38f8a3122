//! The run-state transducer
//!
//! `RunState` is an immutable value: feeding it an event either derives a new
//! value (new state, new data, fresh timestamp, counter + 1) or fails as an
//! illegal transition. All time comes through the injected clock.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::data::StateData;
use super::{Clock, Message, MessageLevel};
use crate::event::Event;
use crate::model::{ExecutionDescription, Trigger, WorkflowInstance};

/// Exit code of a successful execution
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Exit code signalling missing upstream dependencies
pub const MISSING_DEPS_EXIT_CODE: i32 = 20;

/// Exit code signalling a failure retries cannot fix
pub const UNRECOVERABLE_FAILURE_EXIT_CODE: i32 = 50;

/// Exit code recorded when the cause of failure is unknown
pub const UNKNOWN_ERROR_EXIT_CODE: i32 = 1;

const FAILURE_COST: f64 = 1.0;
const MISSING_DEPS_COST: f64 = 0.1;

/// Counter sentinel: no events have been processed yet
pub const NO_EVENTS_PROCESSED: i64 = -1;

/// Schema version for run-state snapshots
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run-state snapshots
pub const SCHEMA_ID: &str = "flowrun/run_state@1";

/// Lifecycle state of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Instance exists but nothing has triggered it
    New,
    /// Waiting for dequeue (and for any retry delay to elapse)
    Queued,
    /// Dequeued; resources held, submission not yet started
    Prepare,
    /// Submission to the executor in flight
    Submitting,
    /// Executor accepted the submission
    Submitted,
    /// Execution in progress
    Running,
    /// Execution exited; exit code recorded
    Terminated,
    /// Application failure recorded
    Failed,
    /// Given up; terminal
    Error,
    /// Completed successfully; terminal
    Done,
}

impl State {
    /// Returns true if no transition is legal from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Error | State::Done)
    }

    /// Stable wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            State::New => "NEW",
            State::Queued => "QUEUED",
            State::Prepare => "PREPARE",
            State::Submitting => "SUBMITTING",
            State::Submitted => "SUBMITTED",
            State::Running => "RUNNING",
            State::Terminated => "TERMINATED",
            State::Failed => "FAILED",
            State::Error => "ERROR",
            State::Done => "DONE",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for run-state operations
#[derive(Debug, Error)]
pub enum RunStateError {
    #[error("{instance} received {event} while in {state}")]
    IllegalTransition {
        instance: WorkflowInstance,
        state: State,
        event: &'static str,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Immutable position of a workflow instance in its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Identity of the run; never mutated
    pub workflow_instance: WorkflowInstance,

    /// Current lifecycle state
    pub state: State,

    /// Milliseconds since epoch when this state was entered
    pub timestamp_millis: i64,

    /// Bookkeeping consistent with this state
    pub data: StateData,

    /// Sequence number of processed events; [`NO_EVENTS_PROCESSED`] until the
    /// first transition
    pub counter: i64,
}

impl RunState {
    /// A brand-new instance in NEW with zeroed data
    pub fn fresh(workflow_instance: WorkflowInstance, clock: &impl Clock) -> Self {
        Self {
            workflow_instance,
            state: State::New,
            timestamp_millis: clock.now().timestamp_millis(),
            data: StateData::zero(),
            counter: NO_EVENTS_PROCESSED,
        }
    }

    /// Restore a value from persistence
    pub fn create(
        workflow_instance: WorkflowInstance,
        state: State,
        data: StateData,
        timestamp_millis: i64,
        counter: i64,
    ) -> Self {
        Self {
            workflow_instance,
            state,
            timestamp_millis,
            data,
            counter,
        }
    }

    /// Apply one event.
    ///
    /// On success the returned value carries the successor state and data,
    /// `timestamp_millis` read from `clock`, and `counter + 1`. Terminal
    /// states admit no event at all.
    ///
    /// # Errors
    ///
    /// Returns `RunStateError::IllegalTransition` when the current state does
    /// not admit the event.
    pub fn transition(&self, event: &Event, clock: &impl Clock) -> Result<Self, RunStateError> {
        if self.state.is_terminal() {
            return Err(self.illegal(event));
        }
        let next = self.apply(event)?;
        Ok(Self {
            timestamp_millis: clock.now().timestamp_millis(),
            counter: self.counter + 1,
            ..next
        })
    }

    /// The transition relation: successor state and data delta, with
    /// timestamp and counter still untouched.
    fn apply(&self, event: &Event) -> Result<Self, RunStateError> {
        match event {
            Event::TriggerExecution {
                trigger, parameters, ..
            } => match self.state {
                State::New => Ok(self.with_state(
                    State::Queued,
                    self.data
                        .to_builder()
                        .trigger(trigger.clone())
                        .trigger_id(trigger.trigger_id())
                        .trigger_parameters(parameters.clone())
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            // Replayed from logs that predate trigger_execution
            Event::TimeTrigger { .. } => match self.state {
                State::New => Ok(self.with_state(
                    State::Submitted,
                    self.data
                        .to_builder()
                        .trigger(Trigger::unknown("UNKNOWN"))
                        .trigger_id("UNKNOWN")
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            Event::Info { message, .. } => match self.state {
                State::Queued => Ok(self.with_state(
                    State::Queued,
                    self.data.to_builder().message(message.clone()).build(),
                )),
                _ => Err(self.illegal(event)),
            },

            Event::Dequeue { resource_ids, .. } => match self.state {
                State::Queued => Ok(self.with_state(
                    State::Prepare,
                    self.data
                        .to_builder()
                        .clear_retry_delay()
                        .resource_ids(resource_ids.clone())
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            Event::Submit {
                execution_description,
                execution_id,
                ..
            } => match self.state {
                State::Queued | State::Prepare => Ok(self.with_state(
                    State::Submitting,
                    self.data
                        .to_builder()
                        .execution_description(execution_description.clone())
                        .execution_id(execution_id.clone())
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            Event::Submitted {
                execution_id,
                runner_id,
                ..
            } => match self.state {
                State::Submitting => {
                    // An execution id recorded at submit time wins over the
                    // one reported back by the executor.
                    let execution_id = self
                        .data
                        .execution_id
                        .clone()
                        .unwrap_or_else(|| execution_id.clone());
                    Ok(self.with_state(
                        State::Submitted,
                        self.data
                            .to_builder()
                            .tries(self.data.tries + 1)
                            .execution_id(execution_id)
                            .runner_id(runner_id.clone())
                            .build(),
                    ))
                }
                _ => Err(self.illegal(event)),
            },

            // Replayed from logs that predate submit/submitted
            Event::Created {
                execution_id,
                docker_image,
                ..
            } => match self.state {
                State::Prepare | State::Queued => Ok(self.with_state(
                    State::Submitted,
                    self.data
                        .to_builder()
                        .execution_id(execution_id.clone())
                        .execution_description(ExecutionDescription::for_image(docker_image.clone()))
                        .tries(self.data.tries + 1)
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            Event::Started { .. } => match self.state {
                State::Submitted | State::Prepare => {
                    Ok(self.with_state(State::Running, self.data.clone()))
                }
                _ => Err(self.illegal(event)),
            },

            Event::Terminate { exit_code, .. } => match self.state {
                State::Running => {
                    let rendered = exit_code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    Ok(self.with_state(
                        State::Terminated,
                        self.data
                            .to_builder()
                            .retry_cost(self.data.retry_cost + exit_cost(*exit_code))
                            .last_exit(*exit_code)
                            .consecutive_failures(next_consecutive_failures(&self.data, *exit_code))
                            .message(Message::new(
                                message_level(*exit_code),
                                format!("Exit code: {rendered}"),
                            ))
                            .build(),
                    ))
                }
                _ => Err(self.illegal(event)),
            },

            Event::RunError { message, .. } => match self.state {
                State::Queued
                | State::Prepare
                | State::Submitting
                | State::Submitted
                | State::Running => Ok(self.with_state(
                    State::Failed,
                    self.data
                        .to_builder()
                        .retry_cost(self.data.retry_cost + FAILURE_COST)
                        .last_exit(None)
                        .consecutive_failures(self.data.consecutive_failures + 1)
                        .message(Message::error(message.clone()))
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            Event::Success { .. } => match self.state {
                State::Terminated => Ok(self.with_state(State::Done, self.data.clone())),
                _ => Err(self.illegal(event)),
            },

            Event::RetryAfter { delay_millis, .. } => match self.state {
                State::Terminated | State::Failed | State::Queued => Ok(self.with_state(
                    State::Queued,
                    self.data
                        .to_builder()
                        .retry_delay_millis(*delay_millis)
                        .clear_execution_id()
                        .clear_execution_description()
                        .clear_resource_ids()
                        .build(),
                )),
                _ => Err(self.illegal(event)),
            },

            // Replayed from logs that predate retry_after. Leaves
            // execution_id and resource_ids in place, unlike retry_after.
            Event::Retry { .. } => match self.state {
                State::Terminated | State::Failed | State::Queued => {
                    Ok(self.with_state(State::Prepare, self.data.clone()))
                }
                _ => Err(self.illegal(event)),
            },

            Event::Stop { .. } => match self.state {
                State::Terminated | State::Failed => {
                    Ok(self.with_state(State::Error, self.data.clone()))
                }
                _ => Err(self.illegal(event)),
            },

            Event::Timeout { .. } => Ok(self.with_state(State::Failed, self.data.clone())),

            Event::Halt { .. } => Ok(self.with_state(State::Error, self.data.clone())),
        }
    }

    fn with_state(&self, state: State, data: StateData) -> Self {
        Self {
            workflow_instance: self.workflow_instance.clone(),
            state,
            timestamp_millis: self.timestamp_millis,
            data,
            counter: self.counter,
        }
    }

    fn illegal(&self, event: &Event) -> RunStateError {
        RunStateError::IllegalTransition {
            instance: self.workflow_instance.clone(),
            state: self.state,
            event: event.name(),
        }
    }
}

fn exit_cost(exit_code: Option<i32>) -> f64 {
    match exit_code {
        Some(SUCCESS_EXIT_CODE) => 0.0,
        Some(MISSING_DEPS_EXIT_CODE) => MISSING_DEPS_COST,
        _ => FAILURE_COST,
    }
}

fn next_consecutive_failures(data: &StateData, exit_code: Option<i32>) -> u32 {
    match exit_code {
        Some(SUCCESS_EXIT_CODE) | Some(MISSING_DEPS_EXIT_CODE) => 0,
        _ => data.consecutive_failures + 1,
    }
}

fn message_level(exit_code: Option<i32>) -> MessageLevel {
    match exit_code {
        Some(SUCCESS_EXIT_CODE) => MessageLevel::Info,
        Some(MISSING_DEPS_EXIT_CODE) => MessageLevel::Warning,
        _ => MessageLevel::Error,
    }
}

/// Run-state snapshot artifact (run_state.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStateSnapshot {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    #[serde(flatten)]
    pub run_state: RunState,
}

impl RunStateSnapshot {
    pub fn new(run_state: RunState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_state,
        }
    }

    pub fn into_run_state(self) -> RunState {
        self.run_state
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), RunStateError> {
        let json = self.to_json()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, RunStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}
