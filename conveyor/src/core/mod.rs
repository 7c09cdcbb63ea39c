//! Core domain types shared across the orchestrator:
//! - Status enum with severity ranking
//! - Typed instance and worker ids
//! - Ordered environment parameters

mod env;
mod ids;
mod status;

pub use env::{EnvParam, EnvParams};
pub use ids::{ActionId, PipelineId, StageId, WorkerId, WorkflowId};
pub use status::{aggregate, is_terminal, rank, worse_of, Status};
