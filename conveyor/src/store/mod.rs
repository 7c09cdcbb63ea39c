//! The storage collaborator's narrow interface.
//!
//! Persistence mechanics are out of scope for the orchestrator core. It only
//! needs versioned per-pipeline snapshots, an atomic batch commit guarded by
//! an optimistic version check, and a few queries for the dispatch loop.

mod memory;

pub use memory::InMemoryInstanceStore;

use async_trait::async_trait;

use crate::core::{ActionId, PipelineId};
use crate::engine::MutationBatch;
use crate::errors::ConveyorError;
use crate::hierarchy::{ActionInstance, PipelineTree};
use crate::utils::Timestamp;

/// A pipeline snapshot together with the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedTree {
    /// The snapshot.
    pub tree: PipelineTree,
    /// Version to pass back to [`InstanceStore::commit`].
    pub version: u64,
}

/// A `Ready` action together with the pipeline fields that order dispatch.
#[derive(Debug, Clone)]
pub struct DispatchCandidate {
    /// Owning pipeline.
    pub pipeline_id: PipelineId,
    /// Pipeline priority; higher dispatches first.
    pub priority: i32,
    /// Pipeline creation time; older dispatches first.
    pub created_at: Timestamp,
    /// The action itself.
    pub action: ActionInstance,
}

impl DispatchCandidate {
    /// Sort key: priority descending, then creation time, pipeline id,
    /// order and slice ascending.
    #[must_use]
    pub fn dispatch_key(&self) -> (std::cmp::Reverse<i32>, Timestamp, PipelineId, i32, i32) {
        (
            std::cmp::Reverse(self.priority),
            self.created_at,
            self.pipeline_id,
            self.action.order,
            self.action.slice,
        )
    }
}

/// An `InProgress` action and its pipeline.
#[derive(Debug, Clone)]
pub struct RunningAction {
    /// Owning pipeline.
    pub pipeline_id: PipelineId,
    /// The action itself.
    pub action: ActionInstance,
}

/// Storage for pipeline execution trees.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Stores a new tree at version 1.
    ///
    /// Fails with `InvalidTransition` if the pipeline id is already stored.
    async fn insert(&self, tree: PipelineTree) -> Result<u64, ConveyorError>;

    /// Loads a snapshot of one pipeline.
    async fn load(&self, pipeline_id: PipelineId) -> Result<VersionedTree, ConveyorError>;

    /// Finds the pipeline owning an action.
    async fn pipeline_of(&self, action_id: ActionId) -> Result<PipelineId, ConveyorError>;

    /// Applies a batch atomically if the pipeline is still at
    /// `expected_version`, returning the new version.
    ///
    /// Fails with `ConcurrentModification` on a version mismatch, leaving
    /// the stored tree untouched.
    async fn commit(
        &self,
        pipeline_id: PipelineId,
        expected_version: u64,
        batch: &MutationBatch,
    ) -> Result<u64, ConveyorError>;

    /// Ready, non-manual actions of in-progress pipelines, in no particular order.
    async fn dispatch_candidates(&self) -> Result<Vec<DispatchCandidate>, ConveyorError>;

    /// Every `InProgress` action.
    async fn running_actions(&self) -> Result<Vec<RunningAction>, ConveyorError>;

    /// In-progress pipelines whose actions are all terminal.
    async fn unresolved_pipelines(&self) -> Result<Vec<PipelineId>, ConveyorError>;
}
