//! Pure state transitions over a pipeline tree snapshot.
//!
//! Engine operations mutate an in-memory [`PipelineTree`](crate::hierarchy::PipelineTree)
//! and return the [`MutationBatch`] of every instance they touched. They
//! never persist anything; committing the batch is the caller's job.

mod batch;
mod complete;
mod lifecycle;
mod reset;
mod transition;


pub use batch::MutationBatch;
pub use complete::{complete_action, CompletionRequest, CompletionSource};
pub use lifecycle::{launch_pipeline, mark_dispatched, reconcile};
pub use reset::{reset_action, reset_pipeline};
