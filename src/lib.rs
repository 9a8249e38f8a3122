//! flowrun - Run-state core of a workflow scheduler
//!
//! This crate implements the per-instance run lifecycle: an immutable state
//! machine driven by a tagged event alphabet, the bookkeeping that travels
//! with it (retries, failure streaks, retry cost, resource holds, messages),
//! and the timeout handler that issues synthetic `timeout` events for
//! instances that dwell in a state too long.

pub mod event;
pub mod manager;
pub mod model;
pub mod state;
pub mod timeout;

pub use event::Event;
pub use manager::{EventSink, OutputHandler, StateManagerError, SyncStateManager};
pub use model::{
    ExecutionDescription, Trigger, TriggerParameters, Workflow, WorkflowConfiguration, WorkflowId,
    WorkflowInstance, NATURAL_TRIGGER_ID,
};
pub use state::{
    Clock, Message, MessageLevel, RunState, RunStateError, RunStateSnapshot, State, StateData,
    StateDataBuilder, SystemClock, MISSING_DEPS_EXIT_CODE, NO_EVENTS_PROCESSED, SUCCESS_EXIT_CODE,
    UNKNOWN_ERROR_EXIT_CODE, UNRECOVERABLE_FAILURE_EXIT_CODE,
};
pub use timeout::{has_timed_out, TimeoutConfig, TimeoutHandler, TimeoutValidationError};
