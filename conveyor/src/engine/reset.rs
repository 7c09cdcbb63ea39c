//! Rewinding execution.

use super::transition::Transition;
use super::MutationBatch;
use crate::core::{ActionId, Status};
use crate::errors::ConveyorError;
use crate::hierarchy::PipelineTree;
use crate::utils::Timestamp;

/// Rewinds execution starting at an action.
///
/// Returns `Ok(None)` without touching the tree when `require_in_progress`
/// is set and the action is not `InProgress`.
///
/// A partial reset makes only the action `Ready` again. A full reset rewinds
/// every sibling in the same workflow whose order is at or below the
/// action's: siblings at the workflow's first order become `Ready`, the
/// others `New`; later orders are left for execution to reach again. Either
/// way the owning workflow, stage and pipeline end up `InProgress`, and each
/// rewound action is listed for result clearing.
///
/// # Errors
///
/// `NotFound` if the action is not part of the tree.
pub fn reset_action(
    tree: &mut PipelineTree,
    action_id: ActionId,
    full_reset: bool,
    require_in_progress: bool,
    now: Timestamp,
) -> Result<Option<MutationBatch>, ConveyorError> {
    let action = tree.action(action_id)?;
    if require_in_progress && action.status != Status::InProgress {
        return Ok(None);
    }
    let (workflow_id, target_order) = (action.workflow_id, action.order);

    let mut transition = Transition::new(tree, now);
    if full_reset {
        let siblings: Vec<(ActionId, i32)> = transition
            .tree
            .actions_of(workflow_id)
            .map(|a| (a.id, a.order))
            .collect();
        let first = siblings.iter().map(|(_, order)| *order).min().unwrap_or(target_order);

        for (id, order) in siblings.into_iter().filter(|(_, order)| *order <= target_order) {
            let status = if order == first { Status::Ready } else { Status::New };
            transition.displace_run(id)?;
            transition.update_action(id, |a| {
                a.status = status;
                a.assigned_worker = None;
                a.start_time = None;
                a.end_time = None;
            })?;
            transition.batch.clear_results_for(id);
        }

        let stage_id = transition.tree.workflow(workflow_id)?.stage_id;
        transition.update_workflow(workflow_id, |w| {
            w.status = Status::InProgress;
            w.end_time = None;
            w.running_status = None;
        })?;
        transition.update_stage(stage_id, |s| {
            s.status = Status::InProgress;
            s.end_time = None;
        })?;
        transition.update_pipeline(|p| {
            p.status = Status::InProgress;
            p.end_time = None;
        });
    } else {
        transition.displace_run(action_id)?;
        transition.update_action(action_id, |a| {
            a.status = Status::Ready;
            a.assigned_worker = None;
            a.end_time = None;
        })?;
        transition.batch.clear_results_for(action_id);
        transition.reopen_ancestors(action_id)?;
    }

    Ok(Some(transition.finish()))
}

/// Resets a whole pipeline run and launches it again.
///
/// Every instance returns to `New` with cleared timestamps and assignments;
/// the relaunch then starts only the first stage order.
///
/// # Errors
///
/// Only on an internally inconsistent tree.
pub fn reset_pipeline(tree: &mut PipelineTree, now: Timestamp) -> Result<MutationBatch, ConveyorError> {
    let stage_ids = tree.stage_ids().to_vec();
    let mut transition = Transition::new(tree, now);

    for stage_id in stage_ids {
        transition.update_stage(stage_id, |s| {
            s.status = Status::New;
            s.start_time = None;
            s.end_time = None;
            s.running_status = None;
        })?;
        let workflow_ids = transition.tree.workflow_ids(stage_id).to_vec();
        for workflow_id in workflow_ids {
            transition.update_workflow(workflow_id, |w| {
                w.status = Status::New;
                w.start_time = None;
                w.end_time = None;
                w.running_status = None;
            })?;
            let action_ids = transition.tree.action_ids(workflow_id).to_vec();
            for action_id in action_ids {
                transition.displace_run(action_id)?;
                transition.update_action(action_id, |a| {
                    a.status = Status::New;
                    a.assigned_worker = None;
                    a.start_time = None;
                    a.end_time = None;
                })?;
                transition.batch.clear_results_for(action_id);
            }
        }
    }

    transition.launch()?;
    Ok(transition.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{complete_action, launch_pipeline, mark_dispatched, CompletionRequest};
    use crate::hierarchy::{ActionSpec, StageSpec, TreeBuilder, WorkflowSpec};
    use crate::core::WorkerId;
    use crate::utils::now_utc;

    /// One workflow: `a0`, `a1` at order 0 and `b` at order 1.
    fn tree() -> (PipelineTree, [ActionId; 3]) {
        let mut tree = TreeBuilder::new("reset")
            .stage(
                StageSpec::new("s").workflow(
                    WorkflowSpec::new("w")
                        .action(ActionSpec::new("a0").at(0, 0))
                        .action(ActionSpec::new("a1").at(0, 1))
                        .action(ActionSpec::new("b").at(1, 0)),
                ),
            )
            .build();
        launch_pipeline(&mut tree, now_utc()).unwrap();
        let stage = tree.stage_ids()[0];
        let workflow = tree.workflow_ids(stage)[0];
        let ids = tree.action_ids(workflow);
        let ids = [ids[0], ids[1], ids[2]];
        (tree, ids)
    }

    #[test]
    fn test_require_in_progress_rejects_terminal() {
        let (mut tree, [a0, _, _]) = tree();
        complete_action(&mut tree, &CompletionRequest::manual(a0, Status::Failed), now_utc()).unwrap();
        let before = tree.clone();

        let outcome = reset_action(&mut tree, a0, false, true, now_utc()).unwrap();
        assert!(outcome.is_none());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_partial_reset_in_progress_action() {
        let (mut tree, [a0, _, _]) = tree();
        mark_dispatched(&mut tree, a0, WorkerId::new(), now_utc()).unwrap();

        let batch = reset_action(&mut tree, a0, false, true, now_utc()).unwrap().unwrap();
        let action = tree.action(a0).unwrap();
        assert_eq!(action.status, Status::Ready);
        assert!(action.assigned_worker.is_none());
        assert_eq!(batch.cleared_results(), &[a0]);
    }

    #[test]
    fn test_full_reset_rewinds_lower_orders_only() {
        let (mut tree, [a0, a1, b]) = tree();
        let now = now_utc();
        complete_action(&mut tree, &CompletionRequest::manual(a0, Status::Success), now).unwrap();
        complete_action(&mut tree, &CompletionRequest::manual(a1, Status::Failed), now).unwrap();
        mark_dispatched(&mut tree, b, WorkerId::new(), now).unwrap();

        reset_action(&mut tree, a1, true, false, now).unwrap().unwrap();

        assert_eq!(tree.action(a0).unwrap().status, Status::Ready);
        assert_eq!(tree.action(a1).unwrap().status, Status::Ready);
        assert_eq!(tree.action(b).unwrap().status, Status::InProgress);
    }

    #[test]
    fn test_readvance_displaces_in_flight_later_order() {
        let (mut tree, [a0, a1, b]) = tree();
        let now = now_utc();
        let worker = WorkerId::new();
        for id in [a0, a1] {
            complete_action(&mut tree, &CompletionRequest::manual(id, Status::Success), now).unwrap();
        }
        mark_dispatched(&mut tree, b, worker, now).unwrap();
        reset_action(&mut tree, a0, true, false, now).unwrap().unwrap();

        complete_action(&mut tree, &CompletionRequest::manual(a0, Status::Success), now).unwrap();
        let batch = complete_action(&mut tree, &CompletionRequest::manual(a1, Status::Success), now).unwrap();

        let action = tree.action(b).unwrap();
        assert_eq!(action.status, Status::Ready);
        assert!(action.assigned_worker.is_none());
        assert_eq!(batch.released_workers(), &[(worker, b)]);
        assert!(batch.cleared_results().contains(&b));
    }

    #[test]
    fn test_full_reset_of_later_order_sets_new() {
        let (mut tree, [a0, a1, b]) = tree();
        let now = now_utc();
        for id in [a0, a1] {
            complete_action(&mut tree, &CompletionRequest::manual(id, Status::Success), now).unwrap();
        }
        complete_action(&mut tree, &CompletionRequest::manual(b, Status::Failed), now).unwrap();
        assert_eq!(tree.pipeline().status, Status::Failed);

        let batch = reset_action(&mut tree, b, true, false, now).unwrap().unwrap();

        assert_eq!(tree.action(a0).unwrap().status, Status::Ready);
        assert_eq!(tree.action(b).unwrap().status, Status::New);
        assert_eq!(tree.pipeline().status, Status::InProgress);
        assert_eq!(batch.cleared_results().len(), 3);
    }

    #[test]
    fn test_reset_pipeline_relaunches_first_stage_only() {
        let mut tree = TreeBuilder::new("two-stage")
            .stage(StageSpec::new("one").workflow(WorkflowSpec::new("w").action(ActionSpec::new("x"))))
            .stage(StageSpec::new("two").workflow(WorkflowSpec::new("w").action(ActionSpec::new("y"))))
            .build();
        let now = now_utc();
        launch_pipeline(&mut tree, now).unwrap();
        let first = tree.actions_of(tree.workflow_ids(tree.stage_ids()[0])[0]).next().unwrap().id;
        complete_action(&mut tree, &CompletionRequest::manual(first, Status::Failed), now).unwrap();

        reset_pipeline(&mut tree, now).unwrap();

        let stages: Vec<_> = tree.stages().map(|s| (s.status, s.start_time.is_some())).collect();
        assert_eq!(stages, vec![(Status::InProgress, true), (Status::New, false)]);
        assert_eq!(tree.action(first).unwrap().status, Status::Ready);
        assert_eq!(tree.pipeline().status, Status::InProgress);
    }
}
