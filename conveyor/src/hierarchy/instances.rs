//! The four instance kinds of a pipeline execution tree.
//!
//! Each child stores only its direct parent's id; navigation goes through
//! the [`PipelineTree`](super::PipelineTree) arena.

use serde::{Deserialize, Serialize};

use crate::core::{ActionId, EnvParams, PipelineId, StageId, Status, WorkerId, WorkflowId};
use crate::utils::Timestamp;

/// Common accessors for instances that sit at an `order`/`slice` position
/// under a parent.
pub trait Sequenced {
    /// Execution order within the parent.
    fn order(&self) -> i32;
    /// Parallel sibling index at the same order.
    fn slice(&self) -> i32;
    /// Current status.
    fn status(&self) -> Status;
}

/// Root of the execution tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInstance {
    /// Instance id.
    pub id: PipelineId,
    /// Pipeline name, used by event triggers.
    pub name: String,
    /// Aggregate status.
    pub status: Status,
    /// Dispatch priority; higher runs first.
    pub priority: i32,
    /// Creation time, the dispatch tie-break.
    pub created_at: Timestamp,
    /// When execution started.
    pub start_time: Option<Timestamp>,
    /// When the pipeline became terminal.
    pub end_time: Option<Timestamp>,
    /// Aggregate of the stage orders already passed.
    pub running_status: Option<Status>,
    /// Environment merged into every work request.
    pub env: EnvParams,
}

/// A stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInstance {
    /// Instance id.
    pub id: StageId,
    /// Owning pipeline.
    pub pipeline_id: PipelineId,
    /// Stage name.
    pub name: String,
    /// Execution order within the pipeline.
    pub order: i32,
    /// Parallel sibling index.
    pub slice: i32,
    /// Aggregate status.
    pub status: Status,
    /// When the stage started.
    pub start_time: Option<Timestamp>,
    /// When the stage became terminal.
    pub end_time: Option<Timestamp>,
    /// Aggregate of the workflow orders already passed.
    pub running_status: Option<Status>,
}

/// A workflow of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Instance id.
    pub id: WorkflowId,
    /// Owning stage.
    pub stage_id: StageId,
    /// Workflow name.
    pub name: String,
    /// Execution order within the stage.
    pub order: i32,
    /// Parallel sibling index.
    pub slice: i32,
    /// Aggregate status.
    pub status: Status,
    /// When the workflow started.
    pub start_time: Option<Timestamp>,
    /// When the workflow became terminal.
    pub end_time: Option<Timestamp>,
    /// Aggregate of the action orders already passed.
    pub running_status: Option<Status>,
}

/// The smallest dispatchable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInstance {
    /// Instance id.
    pub id: ActionId,
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// Action name.
    pub name: String,
    /// Execution order within the workflow.
    pub order: i32,
    /// Parallel sibling index.
    pub slice: i32,
    /// Current status.
    pub status: Status,
    /// Worker currently (or last) running the action.
    pub assigned_worker: Option<WorkerId>,
    /// Never dispatched automatically.
    pub manual: bool,
    /// Only a callback completion may finalize the action as `Success`.
    pub callback_required: bool,
    /// When the action was handed to a worker.
    pub start_time: Option<Timestamp>,
    /// When the action became terminal.
    pub end_time: Option<Timestamp>,
    /// Action-level environment, merged over the pipeline's.
    pub env: EnvParams,
}

macro_rules! impl_sequenced {
    ($($ty:ty),+) => {
        $(
            impl Sequenced for $ty {
                fn order(&self) -> i32 {
                    self.order
                }

                fn slice(&self) -> i32 {
                    self.slice
                }

                fn status(&self) -> Status {
                    self.status
                }
            }
        )+
    };
}

impl_sequenced!(StageInstance, WorkflowInstance, ActionInstance);

impl ActionInstance {
    /// Returns true if the dispatch queue may hand this action to a worker.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        self.status == Status::Ready && !self.manual
    }
}

/// The new state of one instance, as recorded in a mutation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceChange {
    /// A pipeline instance changed.
    Pipeline(PipelineInstance),
    /// A stage instance changed.
    Stage(StageInstance),
    /// A workflow instance changed.
    Workflow(WorkflowInstance),
    /// An action instance changed.
    Action(ActionInstance),
}

impl InstanceChange {
    /// Returns the id of the changed instance as a UUID.
    #[must_use]
    pub const fn instance_uuid(&self) -> uuid::Uuid {
        match self {
            Self::Pipeline(p) => p.id.as_uuid(),
            Self::Stage(s) => s.id.as_uuid(),
            Self::Workflow(w) => w.id.as_uuid(),
            Self::Action(a) => a.id.as_uuid(),
        }
    }

    /// Returns the new status of the changed instance.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Pipeline(p) => p.status,
            Self::Stage(s) => s.status,
            Self::Workflow(w) => w.status,
            Self::Action(a) => a.status,
        }
    }
}
