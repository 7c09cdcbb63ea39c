//! Tree fixtures.

use std::sync::Arc;

use crate::core::ActionId;
use crate::engine::launch_pipeline;
use crate::errors::ConveyorError;
use crate::hierarchy::{ActionSpec, PipelineTree, StageSpec, TreeBuilder, WorkflowSpec};
use crate::store::{InMemoryInstanceStore, InstanceStore};
use crate::utils::now_utc;

/// One stage, one workflow, one action per name at consecutive orders.
#[must_use]
pub fn linear_tree(name: &str, actions: &[&str]) -> PipelineTree {
    let workflow = actions
        .iter()
        .fold(WorkflowSpec::new("main"), |w, action| w.action(ActionSpec::new(*action)));
    TreeBuilder::new(name)
        .stage(StageSpec::new("build").workflow(workflow))
        .build()
}

/// `width` actions side by side at order 0, named `slice-<n>`.
#[must_use]
pub fn parallel_tree(name: &str, width: i32) -> PipelineTree {
    let workflow = (0..width).fold(WorkflowSpec::new("fan-out"), |w, slice| {
        w.action(ActionSpec::new(format!("slice-{slice}")).at(0, slice))
    });
    TreeBuilder::new(name)
        .stage(StageSpec::new("test").workflow(workflow))
        .build()
}

/// Two actions at order 0 (`left`, `right`) followed by `after` at order 1.
///
/// Failing `right` leaves the workflow holding `Failed` while `after` runs.
#[must_use]
pub fn held_failure_tree() -> PipelineTree {
    TreeBuilder::new("held-failure")
        .stage(
            StageSpec::new("only").workflow(
                WorkflowSpec::new("only")
                    .action(ActionSpec::new("left").at(0, 0))
                    .action(ActionSpec::new("right").at(0, 1))
                    .action(ActionSpec::new("after").at(1, 0)),
            ),
        )
        .build()
}

/// Looks up an action id by name.
#[must_use]
pub fn find_action(tree: &PipelineTree, name: &str) -> Option<ActionId> {
    tree.actions().find(|a| a.name == name).map(|a| a.id)
}

/// Launches every tree and inserts it into a fresh in-memory store.
pub async fn launched_store(
    trees: impl IntoIterator<Item = PipelineTree>,
) -> Result<Arc<InMemoryInstanceStore>, ConveyorError> {
    let store = Arc::new(InMemoryInstanceStore::new());
    for mut tree in trees {
        launch_pipeline(&mut tree, now_utc())?;
        store.insert(tree).await?;
    }
    Ok(store)
}
