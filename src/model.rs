//! Workflow identity and trigger vocabulary
//!
//! Types describing what is being run: workflow identifiers, the concrete
//! parameterized instance, the workflow's scheduling configuration, and the
//! trigger/execution records accumulated while an instance runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId {
    /// Component (pipeline) the workflow belongs to
    pub component_id: String,

    /// Workflow name, unique within the component
    pub id: String,
}

impl WorkflowId {
    pub fn new(component_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.component_id, self.id)
    }
}

/// A concrete parameterized invocation of a workflow definition
///
/// The `parameter` is typically the partition being processed (a date or an
/// hour); together with the workflow id it uniquely identifies one run
/// lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: WorkflowId,
    pub parameter: String,
}

impl WorkflowInstance {
    pub fn new(workflow_id: WorkflowId, parameter: impl Into<String>) -> Self {
        Self {
            workflow_id,
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for WorkflowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.workflow_id, self.parameter)
    }
}

/// A workflow definition as seen by this crate: its identity plus the
/// scheduling configuration the timeout policy consults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub configuration: WorkflowConfiguration,
}

/// Per-workflow scheduling configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    /// Override for the maximum dwell time in RUNNING, in seconds.
    /// When absent the state-level default TTL applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_timeout_seconds: Option<u64>,
}

/// What caused a workflow instance to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// The workflow's own schedule fired
    Natural,
    /// A backfill over historical partitions
    Backfill { trigger_id: String },
    /// A one-off manual trigger
    Adhoc { trigger_id: String },
    /// Trigger of unknown provenance (seen when replaying old logs)
    Unknown { trigger_id: String },
}

/// Flat trigger id of the natural trigger
pub const NATURAL_TRIGGER_ID: &str = "natural";

impl Trigger {
    pub fn natural() -> Self {
        Trigger::Natural
    }

    pub fn backfill(trigger_id: impl Into<String>) -> Self {
        Trigger::Backfill {
            trigger_id: trigger_id.into(),
        }
    }

    pub fn adhoc(trigger_id: impl Into<String>) -> Self {
        Trigger::Adhoc {
            trigger_id: trigger_id.into(),
        }
    }

    pub fn unknown(trigger_id: impl Into<String>) -> Self {
        Trigger::Unknown {
            trigger_id: trigger_id.into(),
        }
    }

    /// Flat string form of the trigger, retained for legacy consumers that
    /// predate the tagged representation.
    pub fn trigger_id(&self) -> &str {
        match self {
            Trigger::Natural => NATURAL_TRIGGER_ID,
            Trigger::Backfill { trigger_id }
            | Trigger::Adhoc { trigger_id }
            | Trigger::Unknown { trigger_id } => trigger_id,
        }
    }
}

/// Opaque parameter bag supplied with a trigger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerParameters {
    /// Environment variables to inject into the execution
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl TriggerParameters {
    /// The empty parameter bag
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Record of what was submitted to the executor: image, args, and commit info
/// committed at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDescription {
    pub docker_image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docker_args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

impl ExecutionDescription {
    /// Description carrying only an image, as recorded by legacy event logs
    pub fn for_image(docker_image: impl Into<String>) -> Self {
        Self {
            docker_image: docker_image.into(),
            docker_args: Vec::new(),
            commit_sha: None,
        }
    }
}
