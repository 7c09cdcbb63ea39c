//! The post-commit notification seam.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::trigger::{CompiledTrigger, EventTrigger};
use super::EventSink;
use crate::errors::ConveyorError;
use crate::hierarchy::{ActionInstance, PipelineInstance};

/// Called after a completion batch is committed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventNotifier: Send + Sync {
    /// Evaluates triggers for the final pipeline state and the completed action.
    async fn notify(&self, pipeline: &PipelineInstance, action: &ActionInstance);
}

/// Ignores every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl EventNotifier for NoOpNotifier {
    async fn notify(&self, _pipeline: &PipelineInstance, _action: &ActionInstance) {}
}

/// Fires `trigger.<name>` on its sink for every matching trigger.
pub struct TriggerNotifier {
    triggers: Vec<CompiledTrigger>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TriggerNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerNotifier")
            .field("triggers", &self.triggers.len())
            .finish_non_exhaustive()
    }
}

impl TriggerNotifier {
    /// Compiles the triggers.
    ///
    /// # Errors
    ///
    /// `Config` if any name pattern is not a valid regex.
    pub fn new(triggers: Vec<EventTrigger>, sink: Arc<dyn EventSink>) -> Result<Self, ConveyorError> {
        let triggers = triggers
            .into_iter()
            .map(CompiledTrigger::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { triggers, sink })
    }

    /// Returns the number of configured triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Returns true if no trigger is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

#[async_trait]
impl EventNotifier for TriggerNotifier {
    async fn notify(&self, pipeline: &PipelineInstance, action: &ActionInstance) {
        for compiled in &self.triggers {
            if !compiled.matches(pipeline, action) {
                continue;
            }
            let trigger = compiled.trigger();
            debug!(
                trigger = %trigger.name,
                pipeline_id = %pipeline.id,
                action_id = %action.id,
                "Trigger matched"
            );
            let payload = serde_json::json!({
                "trigger": trigger.name,
                "pipeline_id": pipeline.id,
                "pipeline_name": pipeline.name,
                "pipeline_status": pipeline.status,
                "action_id": action.id,
                "action_name": action.name,
                "action_status": action.status,
            });
            self.sink.emit(&trigger.event_type(), Some(payload)).await;
        }
    }
}
