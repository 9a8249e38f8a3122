//! Timeout policy for stale run states
//!
//! Each state carries a maximum dwell time (TTL). The `TimeoutHandler`
//! observes every state entry and, when an instance has sat in its state
//! past the TTL, posts a `timeout` event tagged with the observed counter so
//! the post is dropped if the instance has since moved on. The RUNNING TTL
//! can be overridden per workflow.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::event::Event;
use crate::manager::{EventSink, OutputHandler};
use crate::model::{Workflow, WorkflowId};
use crate::state::{Clock, RunState, State};

/// Upper bound on any TTL: 30 days in seconds
const MAX_TTL_SECONDS: u64 = 2_592_000;

/// Default TTL applied to states without an explicit entry: 24 hours
const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// Maximum dwell time per state
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Per-state overrides of the default TTL
    ttls: HashMap<State, Duration>,

    /// TTL for states without an explicit entry
    default_ttl: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ttls: HashMap::new(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
        }
    }
}

impl TimeoutConfig {
    /// A config applying `default_ttl` to every state
    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            ttls: HashMap::new(),
            default_ttl,
        }
    }

    /// A config with per-state TTLs and a default for the rest
    pub fn with_ttls(ttls: HashMap<State, Duration>, default_ttl: Duration) -> Self {
        Self { ttls, default_ttl }
    }

    /// Validate TTL bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.default_ttl.is_zero() || self.default_ttl.as_secs() > MAX_TTL_SECONDS {
            return Err(TimeoutValidationError::DefaultOutOfBounds {
                got: self.default_ttl.as_secs(),
            });
        }

        for (state, ttl) in &self.ttls {
            if ttl.is_zero() || ttl.as_secs() > MAX_TTL_SECONDS {
                return Err(TimeoutValidationError::StateOutOfBounds {
                    state: *state,
                    got: ttl.as_secs(),
                });
            }
        }

        Ok(())
    }

    /// TTL for a state
    pub fn ttl_of(&self, state: State) -> Duration {
        self.ttls.get(&state).copied().unwrap_or(self.default_ttl)
    }
}

/// TTL validation errors
#[derive(Debug, Error)]
pub enum TimeoutValidationError {
    #[error("default ttl must be in (0, 2592000] seconds, got {got}")]
    DefaultOutOfBounds { got: u64 },

    #[error("ttl for {state} must be in (0, 2592000] seconds, got {got}")]
    StateOutOfBounds { state: State, got: u64 },
}

/// Whether a run state has dwelt past its TTL.
///
/// For RUNNING, the workflow's configured running timeout overrides
/// `default_ttl` when present. Terminal states never time out.
pub fn has_timed_out(
    workflow: Option<&Workflow>,
    run_state: &RunState,
    now: DateTime<Utc>,
    default_ttl: Duration,
) -> bool {
    if run_state.state.is_terminal() {
        return false;
    }

    let ttl = if run_state.state == State::Running {
        workflow
            .and_then(|workflow| workflow.configuration.running_timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(default_ttl)
    } else {
        default_ttl
    };

    let deadline = run_state
        .timestamp_millis
        .saturating_add(ttl.as_millis() as i64);
    now.timestamp_millis() >= deadline
}

/// Output handler that issues `timeout` events for instances that have
/// dwelt in a state past the TTL.
pub struct TimeoutHandler<C, L>
where
    C: Clock,
    L: Fn(&WorkflowId) -> Option<Workflow>,
{
    ttls: TimeoutConfig,
    clock: C,
    workflows: L,
}

impl<C, L> TimeoutHandler<C, L>
where
    C: Clock,
    L: Fn(&WorkflowId) -> Option<Workflow>,
{
    pub fn new(ttls: TimeoutConfig, clock: C, workflows: L) -> Self {
        Self {
            ttls,
            clock,
            workflows,
        }
    }
}

impl<C, L> OutputHandler for TimeoutHandler<C, L>
where
    C: Clock,
    L: Fn(&WorkflowId) -> Option<Workflow>,
{
    fn transition_into(&self, run_state: &RunState, sink: &dyn EventSink) {
        let workflow = (self.workflows)(&run_state.workflow_instance.workflow_id);
        let ttl = self.ttls.ttl_of(run_state.state);

        if has_timed_out(workflow.as_ref(), run_state, self.clock.now(), ttl) {
            info!(
                instance = %run_state.workflow_instance,
                state = %run_state.state,
                since_millis = run_state.timestamp_millis,
                "found stale state, issuing a timeout"
            );
            let posted = sink.receive_ignore_closed(
                Event::Timeout {
                    instance: run_state.workflow_instance.clone(),
                },
                run_state.counter,
            );
            if let Err(err) = posted {
                warn!(
                    instance = %run_state.workflow_instance,
                    error = %err,
                    "failed to post timeout"
                );
            }
        }
    }
}
