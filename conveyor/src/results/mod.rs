//! The auxiliary result-storage collaborator.
//!
//! Completion reports may carry an opaque payload (test results,
//! statistics, free-form parameters). The core never looks inside it; it
//! forwards the payload here after a committed completion and asks for it to
//! be cleared when the action is rewound.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::core::{ActionId, PipelineId};
use crate::errors::ConveyorError;

/// Storage for per-action result payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Stores the payload of a committed completion.
    async fn store(
        &self,
        pipeline_id: PipelineId,
        action_id: ActionId,
        payload: serde_json::Value,
    ) -> Result<(), ConveyorError>;

    /// Drops every stored payload of a rewound action.
    async fn clear(&self, action_id: ActionId) -> Result<(), ConveyorError>;
}

/// Discards every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpResultSink;

#[async_trait]
impl ResultSink for NoOpResultSink {
    async fn store(
        &self,
        _pipeline_id: PipelineId,
        _action_id: ActionId,
        _payload: serde_json::Value,
    ) -> Result<(), ConveyorError> {
        Ok(())
    }

    async fn clear(&self, _action_id: ActionId) -> Result<(), ConveyorError> {
        Ok(())
    }
}

/// Keeps payloads in memory, newest last.
#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    results: RwLock<HashMap<ActionId, Vec<serde_json::Value>>>,
}

impl InMemoryResultSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payloads stored for an action.
    #[must_use]
    pub fn results_for(&self, action_id: ActionId) -> Vec<serde_json::Value> {
        self.results.read().get(&action_id).cloned().unwrap_or_default()
    }

    /// Returns the number of actions with stored payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn store(
        &self,
        _pipeline_id: PipelineId,
        action_id: ActionId,
        payload: serde_json::Value,
    ) -> Result<(), ConveyorError> {
        self.results.write().entry(action_id).or_default().push(payload);
        Ok(())
    }

    async fn clear(&self, action_id: ActionId) -> Result<(), ConveyorError> {
        self.results.write().remove(&action_id);
        Ok(())
    }
}
