//! The pipeline execution tree.
//!
//! Pipeline → Stage → Workflow → Action, stored in a per-pipeline arena
//! with parent-id indices instead of mutual object references.

mod builder;
mod instances;
mod tree;

pub use builder::{ActionSpec, StageSpec, TreeBuilder, WorkflowSpec};
pub use instances::{
    ActionInstance, InstanceChange, PipelineInstance, Sequenced, StageInstance, WorkflowInstance,
};
pub use tree::PipelineTree;
