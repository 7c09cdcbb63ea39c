//! Launching, dispatch marking and reconciliation.

use tracing::info;

use super::transition::Transition;
use super::MutationBatch;
use crate::core::{aggregate, ActionId, Status, WorkerId};
use crate::errors::{ConveyorError, InvalidTransitionError};
use crate::hierarchy::PipelineTree;
use crate::utils::Timestamp;

/// Starts a freshly built pipeline.
///
/// The pipeline and its lowest-order stages become `InProgress`, those
/// stages open their lowest-order workflows, and those workflows ready their
/// lowest-order actions. Empty containers finish immediately with `Success`.
///
/// # Errors
///
/// `InvalidTransition` unless the pipeline is `New`.
pub fn launch_pipeline(tree: &mut PipelineTree, now: Timestamp) -> Result<MutationBatch, ConveyorError> {
    let status = tree.pipeline().status;
    if status != Status::New {
        return Err(InvalidTransitionError::new(tree.id(), "only a new pipeline can be launched")
            .with_statuses(status, Status::InProgress)
            .into());
    }

    let mut transition = Transition::new(tree, now);
    transition.launch()?;
    Ok(transition.finish())
}

/// Records that a worker took a `Ready` action.
///
/// # Errors
///
/// - `NotFound` if the action is not part of the tree.
/// - `InvalidTransition` if the action is not `Ready` or the pipeline is not
///   `InProgress`.
pub fn mark_dispatched(
    tree: &mut PipelineTree,
    action_id: ActionId,
    worker: WorkerId,
    now: Timestamp,
) -> Result<MutationBatch, ConveyorError> {
    let action = tree.action(action_id)?;
    if action.status != Status::Ready {
        return Err(InvalidTransitionError::new(action_id, "only a ready action can be dispatched")
            .with_statuses(action.status, Status::InProgress)
            .into());
    }
    if tree.pipeline().status != Status::InProgress {
        return Err(InvalidTransitionError::new(action_id, "pipeline is not in progress").into());
    }

    let mut transition = Transition::new(tree, now);
    transition.update_action(action_id, |a| {
        a.status = Status::InProgress;
        a.start_time = Some(now);
        a.end_time = None;
        a.assigned_worker = Some(worker);
    })?;
    Ok(transition.finish())
}

/// Re-derives container statuses from the leaves after an interrupted commit.
///
/// Only runs when the pipeline is `InProgress` and every action is terminal.
/// Workflows, then stages, then the pipeline itself are finalised with the
/// aggregate of their children. Returns an empty batch when nothing drifted.
///
/// # Errors
///
/// Only on an internally inconsistent tree.
pub fn reconcile(tree: &mut PipelineTree, now: Timestamp) -> Result<MutationBatch, ConveyorError> {
    if tree.pipeline().status != Status::InProgress || !tree.all_actions_terminal() {
        return Ok(MutationBatch::new());
    }

    let stage_ids = tree.stage_ids().to_vec();
    let mut transition = Transition::new(tree, now);

    for &stage_id in &stage_ids {
        let workflow_ids = transition.tree.workflow_ids(stage_id).to_vec();
        for workflow_id in workflow_ids {
            if transition.tree.workflow(workflow_id)?.status.is_terminal() {
                continue;
            }
            let status = aggregate(transition.tree.actions_of(workflow_id).map(|a| a.status));
            transition.update_workflow(workflow_id, |w| {
                w.status = status;
                w.end_time = Some(now);
                w.running_status = Some(status);
            })?;
        }
    }

    for &stage_id in &stage_ids {
        if transition.tree.stage(stage_id)?.status.is_terminal() {
            continue;
        }
        let status = aggregate(transition.tree.workflows_of(stage_id).map(|w| w.status));
        transition.update_stage(stage_id, |s| {
            s.status = status;
            s.end_time = Some(now);
            s.running_status = Some(status);
        })?;
    }

    let status = aggregate(transition.tree.stages().map(|s| s.status));
    transition.update_pipeline(|p| {
        p.status = status;
        p.end_time = Some(now);
        p.running_status = Some(status);
    });

    info!(
        pipeline_id = %transition.tree.id(),
        status = %status,
        "Reconciled pipeline from its leaves"
    );
    Ok(transition.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{ActionSpec, InstanceChange, StageSpec, TreeBuilder, WorkflowSpec};
    use crate::utils::now_utc;

    fn two_stage_tree() -> PipelineTree {
        TreeBuilder::new("lifecycle")
            .stage(
                StageSpec::new("build")
                    .workflow(WorkflowSpec::new("compile").action(ActionSpec::new("cc")))
                    .workflow(WorkflowSpec::new("empty").at(0, 1)),
            )
            .stage(StageSpec::new("test").workflow(WorkflowSpec::new("unit").action(ActionSpec::new("ut"))))
            .build()
    }

    #[test]
    fn test_launch_opens_first_order_only() {
        let mut tree = two_stage_tree();
        launch_pipeline(&mut tree, now_utc()).unwrap();

        assert_eq!(tree.pipeline().status, Status::InProgress);
        let stages: Vec<Status> = tree.stages().map(|s| s.status).collect();
        assert_eq!(stages, vec![Status::InProgress, Status::New]);

        let build = tree.stage_ids()[0];
        let workflows: Vec<Status> = tree.workflows_of(build).map(|w| w.status).collect();
        // the empty workflow finishes as soon as it opens
        assert_eq!(workflows, vec![Status::InProgress, Status::Success]);

        let ready: Vec<&str> = tree
            .actions()
            .filter(|a| a.status == Status::Ready)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(ready, vec!["cc"]);
    }

    #[test]
    fn test_launch_twice_is_rejected() {
        let mut tree = two_stage_tree();
        launch_pipeline(&mut tree, now_utc()).unwrap();
        let err = launch_pipeline(&mut tree, now_utc()).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_launch_empty_pipeline_succeeds() {
        let mut tree = TreeBuilder::new("nothing").build();
        let batch = launch_pipeline(&mut tree, now_utc()).unwrap();
        assert_eq!(batch.terminal_pipeline_status(), Some(Status::Success));
    }

    #[test]
    fn test_mark_dispatched_requires_ready() {
        let mut tree = two_stage_tree();
        launch_pipeline(&mut tree, now_utc()).unwrap();
        let ut = tree.actions().find(|a| a.name == "ut").unwrap().id;

        let err = mark_dispatched(&mut tree, ut, WorkerId::new(), now_utc()).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_mark_dispatched_assigns_worker() {
        let mut tree = two_stage_tree();
        launch_pipeline(&mut tree, now_utc()).unwrap();
        let cc = tree.actions().find(|a| a.name == "cc").unwrap().id;
        let worker = WorkerId::new();

        let batch = mark_dispatched(&mut tree, cc, worker, now_utc()).unwrap();

        assert_eq!(batch.len(), 1);
        let action = tree.action(cc).unwrap();
        assert_eq!(action.status, Status::InProgress);
        assert_eq!(action.assigned_worker, Some(worker));
        assert!(action.start_time.is_some());
    }

    #[test]
    fn test_reconcile_noop_when_consistent() {
        let mut tree = two_stage_tree();
        launch_pipeline(&mut tree, now_utc()).unwrap();
        assert!(reconcile(&mut tree, now_utc()).unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_finishes_drifted_pipeline() {
        let mut tree = two_stage_tree();
        launch_pipeline(&mut tree, now_utc()).unwrap();

        // leaves committed, containers never updated
        let ids: Vec<ActionId> = tree.actions().map(|a| a.id).collect();
        for id in ids {
            let mut action = tree.action(id).unwrap().clone();
            action.status = if action.name == "ut" { Status::Warning } else { Status::Success };
            tree.apply(&InstanceChange::Action(action)).unwrap();
        }

        let batch = reconcile(&mut tree, now_utc()).unwrap();

        assert_eq!(batch.terminal_pipeline_status(), Some(Status::Warning));
        assert!(tree.stages().all(|s| s.status.is_terminal()));
        assert!(tree.workflows().all(|w| w.status.is_terminal()));
        assert!(reconcile(&mut tree, now_utc()).unwrap().is_empty());
    }
}
