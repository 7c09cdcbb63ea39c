//! Fluent construction of execution trees.
//!
//! Creating trees is the trigger collaborator's job; the builder exists so
//! that collaborators, tests and benchmarks share one way of doing it.

use super::instances::{ActionInstance, PipelineInstance, StageInstance, WorkflowInstance};
use super::tree::PipelineTree;
use crate::core::{ActionId, EnvParams, PipelineId, StageId, Status, WorkflowId};
use crate::utils::{now_utc, Timestamp};

/// Description of one action to create.
#[derive(Debug, Clone, Default)]
pub struct ActionSpec {
    name: String,
    position: Option<(i32, i32)>,
    manual: bool,
    callback_required: bool,
    env: EnvParams,
}

impl ActionSpec {
    /// Creates a new action description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Places the action at an explicit order and slice.
    ///
    /// Without a position the action runs after the previously added one.
    #[must_use]
    pub fn at(mut self, order: i32, slice: i32) -> Self {
        self.position = Some((order, slice));
        self
    }

    /// Marks the action as manual-only.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Requires an explicit callback to finalize the action as `Success`.
    #[must_use]
    pub fn callback_required(mut self) -> Self {
        self.callback_required = true;
        self
    }

    /// Adds an action-level environment parameter.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }
}

/// Description of one workflow to create.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSpec {
    name: String,
    position: Option<(i32, i32)>,
    actions: Vec<ActionSpec>,
}

impl WorkflowSpec {
    /// Creates a new workflow description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Places the workflow at an explicit order and slice.
    #[must_use]
    pub fn at(mut self, order: i32, slice: i32) -> Self {
        self.position = Some((order, slice));
        self
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }
}

/// Description of one stage to create.
#[derive(Debug, Clone, Default)]
pub struct StageSpec {
    name: String,
    position: Option<(i32, i32)>,
    workflows: Vec<WorkflowSpec>,
}

impl StageSpec {
    /// Creates a new stage description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Places the stage at an explicit order and slice.
    #[must_use]
    pub fn at(mut self, order: i32, slice: i32) -> Self {
        self.position = Some((order, slice));
        self
    }

    /// Adds a workflow.
    #[must_use]
    pub fn workflow(mut self, workflow: WorkflowSpec) -> Self {
        self.workflows.push(workflow);
        self
    }
}

/// Builds a [`PipelineTree`] with every instance in `New`.
///
/// Call [`engine::launch_pipeline`](crate::engine::launch_pipeline) on the
/// result to make the first step `Ready`.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    id: PipelineId,
    name: String,
    priority: i32,
    created_at: Option<Timestamp>,
    env: EnvParams,
    stages: Vec<StageSpec>,
}

/// Positions children that do not carry an explicit one: each follows the
/// previous sibling at the next order, slice 0.
fn position_of(explicit: Option<(i32, i32)>, previous: &mut Option<i32>) -> (i32, i32) {
    let position = explicit.unwrap_or_else(|| (previous.map_or(0, |o| o + 1), 0));
    *previous = Some(position.0);
    position
}

impl TreeBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PipelineId::new(),
            name: name.into(),
            priority: 0,
            created_at: None,
            env: EnvParams::new(),
            stages: Vec::new(),
        }
    }

    /// Uses a fixed pipeline id.
    #[must_use]
    pub fn id(mut self, id: PipelineId) -> Self {
        self.id = id;
        self
    }

    /// Sets the dispatch priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the creation timestamp (defaults to now).
    #[must_use]
    pub fn created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Adds a pipeline-level environment parameter.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    /// Adds a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builds the tree.
    #[must_use]
    pub fn build(self) -> PipelineTree {
        let pipeline = PipelineInstance {
            id: self.id,
            name: self.name,
            status: Status::New,
            priority: self.priority,
            created_at: self.created_at.unwrap_or_else(now_utc),
            start_time: None,
            end_time: None,
            running_status: None,
            env: self.env,
        };

        let mut stages = Vec::new();
        let mut workflows = Vec::new();
        let mut actions = Vec::new();

        let mut previous_stage = None;
        for stage_spec in self.stages {
            let (order, slice) = position_of(stage_spec.position, &mut previous_stage);
            let stage_id = StageId::new();
            stages.push(StageInstance {
                id: stage_id,
                pipeline_id: pipeline.id,
                name: stage_spec.name,
                order,
                slice,
                status: Status::New,
                start_time: None,
                end_time: None,
                running_status: None,
            });

            let mut previous_workflow = None;
            for workflow_spec in stage_spec.workflows {
                let (order, slice) = position_of(workflow_spec.position, &mut previous_workflow);
                let workflow_id = WorkflowId::new();
                workflows.push(WorkflowInstance {
                    id: workflow_id,
                    stage_id,
                    name: workflow_spec.name,
                    order,
                    slice,
                    status: Status::New,
                    start_time: None,
                    end_time: None,
                    running_status: None,
                });

                let mut previous_action = None;
                for action_spec in workflow_spec.actions {
                    let (order, slice) = position_of(action_spec.position, &mut previous_action);
                    actions.push(ActionInstance {
                        id: ActionId::new(),
                        workflow_id,
                        name: action_spec.name,
                        order,
                        slice,
                        status: Status::New,
                        assigned_worker: None,
                        manual: action_spec.manual,
                        callback_required: action_spec.callback_required,
                        start_time: None,
                        end_time: None,
                        env: action_spec.env,
                    });
                }
            }
        }

        PipelineTree::from_parts(pipeline, stages, workflows, actions)
    }
}
