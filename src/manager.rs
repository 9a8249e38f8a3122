//! Hosting boundary for the run-state machine
//!
//! The state machine itself is a pure value-to-value function; this module
//! is the seam to the system around it. `SyncStateManager` is the in-memory
//! reference host: it serializes transitions per instance, guards
//! counter-tagged posts against stale senders, and fans every successful
//! transition out to the registered output handlers.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::event::Event;
use crate::model::WorkflowInstance;
use crate::state::{Clock, RunState, RunStateError};

/// Receives events posted under optimistic concurrency.
///
/// Implemented by the state manager and handed to output handlers so they
/// can post follow-up events without holding a reference cycle.
pub trait EventSink {
    /// Apply `event` if the instance's counter still equals
    /// `expected_counter`; a stale post is dropped and reported as
    /// `Ok(None)`.
    fn receive_ignore_closed(
        &self,
        event: Event,
        expected_counter: i64,
    ) -> Result<Option<RunState>, StateManagerError>;
}

/// Observer invoked with every post-transition `RunState`.
///
/// Docker runners, log shippers and metrics emitters implement this
/// externally; the timeout handler in this crate is the one built-in
/// implementation.
pub trait OutputHandler {
    fn transition_into(&self, run_state: &RunState, sink: &dyn EventSink);
}

/// Errors for state-manager operations
#[derive(Debug, Error)]
pub enum StateManagerError {
    #[error("stale {event} for {instance}: expected counter {expected}, current {current}")]
    StaleEvent {
        instance: WorkflowInstance,
        event: &'static str,
        expected: i64,
        current: i64,
    },

    #[error("unknown workflow instance {0}")]
    UnknownInstance(WorkflowInstance),

    #[error("workflow instance {0} is already active")]
    AlreadyActive(WorkflowInstance),

    #[error(transparent)]
    Transition(#[from] RunStateError),
}

/// In-memory, synchronous state manager.
///
/// Guarantees single-writer semantics per instance: transitions are applied
/// under one lock, so events for the same instance observe a total order
/// consistent with the counter sequence. Handlers run outside the lock,
/// after the new value is recorded.
pub struct SyncStateManager<C: Clock> {
    clock: C,
    states: Mutex<HashMap<WorkflowInstance, RunState>>,
    handlers: Vec<Box<dyn OutputHandler>>,
}

impl<C: Clock> SyncStateManager<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            states: Mutex::new(HashMap::new()),
            handlers: Vec::new(),
        }
    }

    /// Register an output handler. Handlers are invoked in registration
    /// order after every successful transition.
    pub fn register_handler(&mut self, handler: Box<dyn OutputHandler>) {
        self.handlers.push(handler);
    }

    /// Create a fresh instance in NEW.
    ///
    /// # Errors
    ///
    /// Returns `StateManagerError::AlreadyActive` if the instance is already
    /// tracked.
    pub fn initialize(&self, instance: WorkflowInstance) -> Result<RunState, StateManagerError> {
        let mut states = self.states.lock().unwrap();
        if states.contains_key(&instance) {
            return Err(StateManagerError::AlreadyActive(instance));
        }
        let fresh = RunState::fresh(instance.clone(), &self.clock);
        states.insert(instance, fresh.clone());
        Ok(fresh)
    }

    /// Seed a previously persisted state, replacing any tracked value.
    pub fn restore(&self, run_state: RunState) {
        let mut states = self.states.lock().unwrap();
        states.insert(run_state.workflow_instance.clone(), run_state);
    }

    /// Apply an event without a counter guard.
    pub fn receive(&self, event: Event) -> Result<RunState, StateManagerError> {
        self.apply(event, None)
    }

    /// Apply an event only if the instance's counter equals
    /// `expected_counter`.
    ///
    /// # Errors
    ///
    /// Returns `StateManagerError::StaleEvent` on a counter mismatch; the
    /// caller may drop or re-read and retry.
    pub fn receive_with_counter(
        &self,
        event: Event,
        expected_counter: i64,
    ) -> Result<RunState, StateManagerError> {
        self.apply(event, Some(expected_counter))
    }

    /// Current state of an instance, if tracked.
    pub fn get(&self, instance: &WorkflowInstance) -> Option<RunState> {
        self.states.lock().unwrap().get(instance).cloned()
    }

    /// Snapshots of all non-terminal instances.
    pub fn active_states(&self) -> Vec<RunState> {
        self.states
            .lock()
            .unwrap()
            .values()
            .filter(|run_state| !run_state.state.is_terminal())
            .cloned()
            .collect()
    }

    fn apply(
        &self,
        event: Event,
        expected_counter: Option<i64>,
    ) -> Result<RunState, StateManagerError> {
        let next = {
            let mut states = self.states.lock().unwrap();
            let current = states
                .get(event.instance())
                .ok_or_else(|| StateManagerError::UnknownInstance(event.instance().clone()))?;

            if let Some(expected) = expected_counter {
                if expected != current.counter {
                    return Err(StateManagerError::StaleEvent {
                        instance: event.instance().clone(),
                        event: event.name(),
                        expected,
                        current: current.counter,
                    });
                }
            }

            let next = current.transition(&event, &self.clock)?;
            states.insert(event.instance().clone(), next.clone());
            next
        };

        // Lock released: handlers may post follow-up events re-entrantly.
        for handler in &self.handlers {
            handler.transition_into(&next, self);
        }

        Ok(next)
    }
}

impl<C: Clock> EventSink for SyncStateManager<C> {
    fn receive_ignore_closed(
        &self,
        event: Event,
        expected_counter: i64,
    ) -> Result<Option<RunState>, StateManagerError> {
        match self.apply(event, Some(expected_counter)) {
            Ok(run_state) => Ok(Some(run_state)),
            Err(StateManagerError::StaleEvent {
                instance,
                event,
                expected,
                current,
            }) => {
                debug!(
                    instance = %instance,
                    event,
                    expected,
                    current,
                    "dropping stale event"
                );
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }
}
