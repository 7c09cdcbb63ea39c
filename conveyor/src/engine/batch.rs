//! The set of instances mutated by one engine operation.

use serde::Serialize;
use std::collections::HashMap;

use crate::core::{ActionId, Status, WorkerId};
use crate::hierarchy::{ActionInstance, InstanceChange, PipelineInstance};

/// Instances changed by an engine operation, to be persisted atomically.
///
/// Each instance appears at most once, holding its final state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationBatch {
    changes: Vec<InstanceChange>,
    #[serde(skip)]
    index: HashMap<uuid::Uuid, usize>,
    cleared_results: Vec<ActionId>,
    released_workers: Vec<(WorkerId, ActionId)>,
}

impl MutationBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the state of an instance, replacing an earlier entry for it.
    pub fn record(&mut self, change: InstanceChange) {
        let key = change.instance_uuid();
        match self.index.get(&key) {
            Some(&position) => self.changes[position] = change,
            None => {
                self.index.insert(key, self.changes.len());
                self.changes.push(change);
            }
        }
    }

    /// Records that an action's stored results must be cleared.
    pub fn clear_results_for(&mut self, action: ActionId) {
        if !self.cleared_results.contains(&action) {
            self.cleared_results.push(action);
        }
    }

    /// Records that `worker` no longer runs `action`.
    pub fn release_worker(&mut self, worker: WorkerId, action: ActionId) {
        if !self.released_workers.contains(&(worker, action)) {
            self.released_workers.push((worker, action));
        }
    }

    /// Returns the recorded changes in first-touched order.
    #[must_use]
    pub fn changes(&self) -> &[InstanceChange] {
        &self.changes
    }

    /// Returns the actions whose results must be cleared.
    #[must_use]
    pub fn cleared_results(&self) -> &[ActionId] {
        &self.cleared_results
    }

    /// Returns the workers displaced from the actions they were running.
    #[must_use]
    pub fn released_workers(&self) -> &[(WorkerId, ActionId)] {
        &self.released_workers
    }

    /// Returns the number of changed instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.cleared_results.is_empty() && self.released_workers.is_empty()
    }

    /// Returns the recorded state of an action, if it changed.
    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<&ActionInstance> {
        self.index.get(&id.as_uuid()).and_then(|&i| match &self.changes[i] {
            InstanceChange::Action(action) => Some(action),
            _ => None,
        })
    }

    /// Returns the recorded pipeline state, if the root changed.
    #[must_use]
    pub fn pipeline(&self) -> Option<&PipelineInstance> {
        self.changes.iter().find_map(|change| match change {
            InstanceChange::Pipeline(pipeline) => Some(pipeline),
            _ => None,
        })
    }

    /// Returns the new pipeline status when this batch made the pipeline terminal.
    #[must_use]
    pub fn terminal_pipeline_status(&self) -> Option<Status> {
        self.pipeline()
            .map(|p| p.status)
            .filter(|status| status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{ActionSpec, StageSpec, TreeBuilder, WorkflowSpec};

    #[test]
    fn test_record_keeps_last_state() {
        let tree = TreeBuilder::new("batch")
            .stage(StageSpec::new("s").workflow(WorkflowSpec::new("w").action(ActionSpec::new("a"))))
            .build();
        let mut action = tree.actions().next().unwrap().clone();

        let mut batch = MutationBatch::new();
        action.status = Status::Ready;
        batch.record(InstanceChange::Action(action.clone()));
        action.status = Status::InProgress;
        batch.record(InstanceChange::Action(action.clone()));

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.action(action.id).unwrap().status, Status::InProgress);
        assert!(batch.pipeline().is_none());
    }

    #[test]
    fn test_cleared_results_deduplicated() {
        let mut batch = MutationBatch::new();
        assert!(batch.is_empty());

        let id = ActionId::new();
        batch.clear_results_for(id);
        batch.clear_results_for(id);

        assert_eq!(batch.cleared_results(), &[id]);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_released_workers_deduplicated() {
        let mut batch = MutationBatch::new();
        let (worker, action) = (WorkerId::new(), ActionId::new());
        batch.release_worker(worker, action);
        batch.release_worker(worker, action);

        assert_eq!(batch.released_workers(), &[(worker, action)]);
        assert!(!batch.is_empty());
    }
}
