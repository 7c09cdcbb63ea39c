//! In-memory instance storage for tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{DispatchCandidate, InstanceStore, RunningAction, VersionedTree};
use crate::core::{ActionId, PipelineId, Status};
use crate::engine::MutationBatch;
use crate::errors::{
    ConcurrentModificationError, ConveyorError, EntityKind, InvalidTransitionError, NotFoundError,
};
use crate::hierarchy::PipelineTree;

/// An [`InstanceStore`] keeping every tree in memory.
///
/// Each pipeline carries a version bumped by every non-empty commit.
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    trees: DashMap<PipelineId, VersionedTree>,
    action_index: DashMap<ActionId, PipelineId>,
}

impl InMemoryInstanceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Returns the current version of a pipeline.
    #[must_use]
    pub fn version_of(&self, pipeline_id: PipelineId) -> Option<u64> {
        self.trees.get(&pipeline_id).map(|entry| entry.version)
    }

    /// Overwrites instances without a version check or a version bump.
    ///
    /// Simulates a storage write that landed partially; tests use it to
    /// produce trees whose containers drifted from their leaves.
    pub fn apply_unversioned(&self, pipeline_id: PipelineId, batch: &MutationBatch) -> Result<(), ConveyorError> {
        let mut entry = self
            .trees
            .get_mut(&pipeline_id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Pipeline, pipeline_id))?;
        for change in batch.changes() {
            entry.tree.apply(change)?;
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn insert(&self, tree: PipelineTree) -> Result<u64, ConveyorError> {
        let pipeline_id = tree.id();
        if self.trees.contains_key(&pipeline_id) {
            return Err(InvalidTransitionError::new(pipeline_id, "pipeline already exists").into());
        }
        for action in tree.actions() {
            self.action_index.insert(action.id, pipeline_id);
        }
        self.trees.insert(pipeline_id, VersionedTree { tree, version: 1 });
        Ok(1)
    }

    async fn load(&self, pipeline_id: PipelineId) -> Result<VersionedTree, ConveyorError> {
        self.trees
            .get(&pipeline_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| NotFoundError::new(EntityKind::Pipeline, pipeline_id).into())
    }

    async fn pipeline_of(&self, action_id: ActionId) -> Result<PipelineId, ConveyorError> {
        self.action_index
            .get(&action_id)
            .map(|entry| *entry)
            .ok_or_else(|| NotFoundError::new(EntityKind::Action, action_id).into())
    }

    async fn commit(
        &self,
        pipeline_id: PipelineId,
        expected_version: u64,
        batch: &MutationBatch,
    ) -> Result<u64, ConveyorError> {
        let mut entry = self
            .trees
            .get_mut(&pipeline_id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Pipeline, pipeline_id))?;

        if entry.version != expected_version {
            return Err(
                ConcurrentModificationError::new(pipeline_id, expected_version, entry.version).into(),
            );
        }
        if batch.changes().is_empty() {
            return Ok(entry.version);
        }

        // Apply to a copy so a bad change leaves the stored tree untouched.
        let mut updated = entry.tree.clone();
        for change in batch.changes() {
            updated.apply(change)?;
        }
        entry.tree = updated;
        entry.version += 1;

        trace!(
            pipeline_id = %pipeline_id,
            version = entry.version,
            changes = batch.len(),
            "Committed mutation batch"
        );
        Ok(entry.version)
    }

    async fn dispatch_candidates(&self) -> Result<Vec<DispatchCandidate>, ConveyorError> {
        let mut candidates = Vec::new();
        for entry in &self.trees {
            let pipeline = entry.tree.pipeline();
            if pipeline.status != Status::InProgress {
                continue;
            }
            candidates.extend(
                entry
                    .tree
                    .actions()
                    .filter(|a| a.is_dispatchable())
                    .map(|action| DispatchCandidate {
                        pipeline_id: pipeline.id,
                        priority: pipeline.priority,
                        created_at: pipeline.created_at,
                        action: action.clone(),
                    }),
            );
        }
        Ok(candidates)
    }

    async fn running_actions(&self) -> Result<Vec<RunningAction>, ConveyorError> {
        let mut running = Vec::new();
        for entry in &self.trees {
            let pipeline_id = entry.tree.id();
            running.extend(
                entry
                    .tree
                    .actions()
                    .filter(|a| a.status == Status::InProgress)
                    .map(|action| RunningAction {
                        pipeline_id,
                        action: action.clone(),
                    }),
            );
        }
        Ok(running)
    }

    async fn unresolved_pipelines(&self) -> Result<Vec<PipelineId>, ConveyorError> {
        let mut ids: Vec<PipelineId> = self
            .trees
            .iter()
            .filter(|entry| {
                entry.tree.pipeline().status == Status::InProgress && entry.tree.all_actions_terminal()
            })
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{complete_action, launch_pipeline, CompletionRequest};
    use crate::hierarchy::{ActionSpec, StageSpec, TreeBuilder, WorkflowSpec};
    use crate::utils::now_utc;

    fn launched_tree() -> PipelineTree {
        let mut tree = TreeBuilder::new("stored")
            .stage(
                StageSpec::new("s").workflow(
                    WorkflowSpec::new("w")
                        .action(ActionSpec::new("auto"))
                        .action(ActionSpec::new("by-hand").at(0, 1).manual()),
                ),
            )
            .build();
        launch_pipeline(&mut tree, now_utc()).unwrap();
        tree
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryInstanceStore::new();
        let tree = launched_tree();
        let id = tree.id();
        let action = tree.actions().next().unwrap().id;

        assert_eq!(store.insert(tree.clone()).await.unwrap(), 1);
        assert!(store.insert(tree).await.is_err());

        let loaded = store.load(id).await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(store.pipeline_of(action).await.unwrap(), id);
        assert_eq!(store.load(PipelineId::new()).await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_commit_checks_version() {
        let store = InMemoryInstanceStore::new();
        let tree = launched_tree();
        let id = tree.id();
        store.insert(tree).await.unwrap();

        let mut snapshot = store.load(id).await.unwrap();
        let action = snapshot.tree.actions().find(|a| a.name == "auto").unwrap().id;
        let batch = complete_action(
            &mut snapshot.tree,
            &CompletionRequest::worker(action, Status::Success),
            now_utc(),
        )
        .unwrap();

        assert_eq!(store.commit(id, 1, &batch).await.unwrap(), 2);

        let err = store.commit(id, 1, &batch).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.version_of(id), Some(2));

        let stored = store.load(id).await.unwrap().tree;
        assert_eq!(stored.action(action).unwrap().status, Status::Success);
    }

    #[tokio::test]
    async fn test_empty_commit_keeps_version() {
        let store = InMemoryInstanceStore::new();
        let tree = launched_tree();
        let id = tree.id();
        store.insert(tree).await.unwrap();

        assert_eq!(store.commit(id, 1, &MutationBatch::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queries_skip_manual_and_finished() {
        let store = InMemoryInstanceStore::new();
        store.insert(launched_tree()).await.unwrap();
        store.insert(TreeBuilder::new("idle").build()).await.unwrap();

        let candidates = store.dispatch_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].action.name, "auto");

        assert!(store.running_actions().await.unwrap().is_empty());
        assert!(store.unresolved_pipelines().await.unwrap().is_empty());
    }
}
