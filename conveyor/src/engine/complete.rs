//! Completing an action and cascading the result up the tree.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::transition::Transition;
use super::MutationBatch;
use crate::core::{ActionId, Status};
use crate::errors::{ConveyorError, InvalidTransitionError};
use crate::hierarchy::PipelineTree;
use crate::utils::Timestamp;

/// Who is asking for the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// An automatic report from the worker that ran the action.
    Worker,
    /// The dedicated callback contract for `callback_required` actions.
    Callback,
    /// A manual status-set or release-step caller.
    Manual,
}

/// A request to move an action to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRequest {
    /// The action to complete.
    pub action_id: ActionId,
    /// The terminal status to apply.
    pub status: Status,
    /// Where the request came from.
    pub source: CompletionSource,
    /// Re-complete an already terminal action by rewinding it first.
    pub force: bool,
}

impl CompletionRequest {
    /// Creates a worker-sourced completion.
    #[must_use]
    pub const fn worker(action_id: ActionId, status: Status) -> Self {
        Self {
            action_id,
            status,
            source: CompletionSource::Worker,
            force: false,
        }
    }

    /// Creates a callback completion.
    #[must_use]
    pub const fn callback(action_id: ActionId, status: Status) -> Self {
        Self {
            action_id,
            status,
            source: CompletionSource::Callback,
            force: false,
        }
    }

    /// Creates a manual completion.
    #[must_use]
    pub const fn manual(action_id: ActionId, status: Status) -> Self {
        Self {
            action_id,
            status,
            source: CompletionSource::Manual,
            force: false,
        }
    }

    /// Allows re-completing a terminal action.
    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Applies a completion to a tree snapshot and returns every mutated instance.
///
/// An automatic `Success` report for a `callback_required` action is a no-op
/// and yields an empty batch.
///
/// # Errors
///
/// - `NotFound` if the action is not part of the tree.
/// - `InvalidTransition` if `status` is not terminal, or the action is
///   already terminal and the request is not forced.
pub fn complete_action(
    tree: &mut PipelineTree,
    request: &CompletionRequest,
    now: Timestamp,
) -> Result<MutationBatch, ConveyorError> {
    let action = tree.action(request.action_id)?;

    if request.source == CompletionSource::Worker
        && action.callback_required
        && request.status == Status::Success
    {
        debug!(
            action_id = %request.action_id,
            "Ignoring automatic success report for callback-required action"
        );
        return Ok(MutationBatch::new());
    }

    if !request.status.is_terminal() {
        return Err(InvalidTransitionError::new(
            request.action_id,
            "completion requires a terminal status",
        )
        .with_statuses(action.status, request.status)
        .into());
    }

    let already_terminal = action.status.is_terminal();
    if already_terminal && !request.force {
        return Err(InvalidTransitionError::new(
            request.action_id,
            "action is already terminal",
        )
        .with_statuses(action.status, request.status)
        .into());
    }

    let mut transition = Transition::new(tree, now);
    if already_terminal {
        transition.reopen_ancestors(request.action_id)?;
    }
    transition.finish_action(request.action_id, request.status)?;
    Ok(transition.finish())
}
