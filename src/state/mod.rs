//! Run state machine for workflow instances
//!
//! Implements the per-instance lifecycle:
//! NEW → QUEUED → PREPARE → SUBMITTING → SUBMITTED → RUNNING
//!     → TERMINATED → {DONE | ERROR}
//! with FAILED as the application-failure branch and ERROR/DONE terminal.

mod data;
mod run_state;

pub use data::{StateData, StateDataBuilder};
pub use run_state::{
    RunState, RunStateError, RunStateSnapshot, State, MISSING_DEPS_EXIT_CODE, NO_EVENTS_PROCESSED,
    SCHEMA_ID, SCHEMA_VERSION, SUCCESS_EXIT_CODE, UNKNOWN_ERROR_EXIT_CODE,
    UNRECOVERABLE_FAILURE_EXIT_CODE,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of the current time.
///
/// Every timestamp the state machine records comes through this trait so
/// tests can drive transitions with fixed or scripted clocks.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc>,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// Severity of a message recorded against a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// A line of human-readable status recorded during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub line: String,
}

impl Message {
    pub fn new(level: MessageLevel, line: impl Into<String>) -> Self {
        Self {
            level,
            line: line.into(),
        }
    }

    pub fn info(line: impl Into<String>) -> Self {
        Self::new(MessageLevel::Info, line)
    }

    pub fn warning(line: impl Into<String>) -> Self {
        Self::new(MessageLevel::Warning, line)
    }

    pub fn error(line: impl Into<String>) -> Self {
        Self::new(MessageLevel::Error, line)
    }
}
