//! Test assertions for pipeline trees.

use crate::core::{ActionId, Status};
use crate::hierarchy::PipelineTree;

/// Asserts that an action has the expected status.
pub fn assert_action_status(tree: &PipelineTree, action_id: ActionId, expected: Status) {
    match tree.action(action_id) {
        Ok(action) => assert_eq!(
            action.status, expected,
            "Expected action '{}' to be {}, got {}",
            action.name, expected, action.status
        ),
        Err(err) => panic!("{err}"),
    }
}

/// Asserts that the pipeline has the expected status.
pub fn assert_pipeline_status(tree: &PipelineTree, expected: Status) {
    let pipeline = tree.pipeline();
    assert_eq!(
        pipeline.status, expected,
        "Expected pipeline '{}' to be {}, got {}",
        pipeline.name, expected, pipeline.status
    );
}

/// Asserts that every instance in the tree is terminal.
pub fn assert_tree_terminal(tree: &PipelineTree) {
    assert!(
        tree.pipeline().status.is_terminal(),
        "Expected terminal pipeline, got {}",
        tree.pipeline().status
    );
    for stage in tree.stages() {
        assert!(stage.status.is_terminal(), "Stage '{}' is {}", stage.name, stage.status);
    }
    for workflow in tree.workflows() {
        assert!(
            workflow.status.is_terminal(),
            "Workflow '{}' is {}",
            workflow.name,
            workflow.status
        );
    }
    for action in tree.actions() {
        assert!(action.status.is_terminal(), "Action '{}' is {}", action.name, action.status);
    }
}

/// Asserts that no action is `InProgress` or holds a worker.
pub fn assert_no_running_actions(tree: &PipelineTree) {
    let running: Vec<&str> = tree
        .actions()
        .filter(|a| a.status == Status::InProgress || a.assigned_worker.is_some())
        .map(|a| a.name.as_str())
        .collect();
    assert!(running.is_empty(), "Expected no running actions, found {running:?}");
}
