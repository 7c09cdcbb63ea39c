//! Logical payloads exchanged with workers.
//!
//! Field lists are explicit and versioned; encoding and transport are up to
//! the [`WorkerTransport`](crate::workers::WorkerTransport) implementor.

use serde::{Deserialize, Serialize};

use crate::core::{ActionId, EnvParams, PipelineId, StageId, Status, WorkerId, WorkflowId};
use crate::errors::{ConveyorError, NotFoundError};
use crate::hierarchy::PipelineTree;
use crate::utils::Timestamp;

/// Current [`WorkRequest`] layout version.
pub const WORK_REQUEST_VERSION: u32 = 1;

/// Orchestrator → worker: run one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// Layout version, [`WORK_REQUEST_VERSION`] when produced here.
    pub version: u32,
    /// The action to run.
    pub action_id: ActionId,
    /// Action name.
    pub action_name: String,
    /// Owning pipeline.
    pub pipeline_id: PipelineId,
    /// Owning stage.
    pub stage_id: StageId,
    /// Owning workflow.
    pub workflow_id: WorkflowId,
    /// Execution order within the workflow.
    pub order: i32,
    /// Parallel slice index.
    pub slice: i32,
    /// Pipeline environment with the action's own values layered on top.
    pub env: EnvParams,
}

impl WorkRequest {
    /// Builds the request for an action from its tree.
    pub fn for_action(tree: &PipelineTree, action_id: ActionId) -> Result<Self, NotFoundError> {
        let action = tree.action(action_id)?;
        let (workflow_id, stage_id) = tree.ancestors_of(action_id)?;
        Ok(Self {
            version: WORK_REQUEST_VERSION,
            action_id,
            action_name: action.name.clone(),
            pipeline_id: tree.id(),
            stage_id,
            workflow_id,
            order: action.order,
            slice: action.slice,
            env: tree.pipeline().env.merged_with(&action.env),
        })
    }
}

/// Worker → orchestrator: an action finished.
///
/// The same shape serves the callback contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// The finished action.
    pub action_id: ActionId,
    /// Terminal status name, e.g. `FAILED`.
    pub status: String,
    /// Opaque result data for the result-storage collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CompletionReport {
    /// Creates a report without a payload.
    #[must_use]
    pub fn new(action_id: ActionId, status: Status) -> Self {
        Self {
            action_id,
            status: status.name().to_string(),
            payload: None,
        }
    }

    /// Attaches a result payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parses the status name.
    ///
    /// # Errors
    ///
    /// `UnknownStatus` if the name is not a status.
    pub fn parse_status(&self) -> Result<Status, ConveyorError> {
        self.status.parse()
    }
}

/// Worker → registry: still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatSignal {
    /// The reporting worker.
    pub worker_id: WorkerId,
    /// When the worker sent it.
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{ActionSpec, StageSpec, TreeBuilder, WorkflowSpec};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_merges_env() {
        let tree = TreeBuilder::new("env")
            .env("TARGET", "x86_64")
            .env("PROFILE", "debug")
            .stage(
                StageSpec::new("s").workflow(
                    WorkflowSpec::new("w").action(ActionSpec::new("build").at(2, 3).env("PROFILE", "release")),
                ),
            )
            .build();
        let action = tree.actions().next().unwrap();

        let request = WorkRequest::for_action(&tree, action.id).unwrap();

        assert_eq!(request.version, WORK_REQUEST_VERSION);
        assert_eq!((request.order, request.slice), (2, 3));
        assert_eq!(request.pipeline_id, tree.id());
        assert_eq!(request.env.get("TARGET"), Some("x86_64"));
        assert_eq!(request.env.get("PROFILE"), Some("release"));
    }

    #[test]
    fn test_request_for_unknown_action() {
        let tree = TreeBuilder::new("empty").build();
        assert!(WorkRequest::for_action(&tree, ActionId::new()).is_err());
    }

    #[test]
    fn test_report_status_parsing() {
        let report: CompletionReport = serde_json::from_value(serde_json::json!({
            "action_id": ActionId::new(),
            "status": "failed",
            "payload": {"tests": 3}
        }))
        .unwrap();
        assert_eq!(report.parse_status().unwrap(), Status::Failed);

        let bogus = CompletionReport {
            status: "EXPLODED".to_string(),
            ..report
        };
        assert_eq!(bogus.parse_status().unwrap_err().code(), "UNKNOWN_STATUS");
    }
}
