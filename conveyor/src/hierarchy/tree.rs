//! Arena holding one pipeline run's execution tree.

use std::collections::HashMap;

use super::instances::{
    ActionInstance, InstanceChange, PipelineInstance, Sequenced, StageInstance, WorkflowInstance,
};
use crate::core::{ActionId, PipelineId, StageId, WorkflowId};
use crate::errors::{EntityKind, NotFoundError};

/// An arena of instances keyed by id, with parent-id indices.
///
/// Child index lists are kept sorted by `(order, slice, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTree {
    pipeline: PipelineInstance,
    stages: HashMap<StageId, StageInstance>,
    workflows: HashMap<WorkflowId, WorkflowInstance>,
    actions: HashMap<ActionId, ActionInstance>,
    stage_order: Vec<StageId>,
    workflows_by_stage: HashMap<StageId, Vec<WorkflowId>>,
    actions_by_workflow: HashMap<WorkflowId, Vec<ActionId>>,
}

fn sort_children<I, T>(ids: &mut [I], lookup: &HashMap<I, T>)
where
    I: Copy + Ord + std::hash::Hash,
    T: Sequenced,
{
    ids.sort_by_key(|id| {
        lookup
            .get(id)
            .map_or((i32::MAX, i32::MAX, *id), |c| (c.order(), c.slice(), *id))
    });
}

impl PipelineTree {
    /// Assembles a tree from flat instance lists.
    ///
    /// Children whose parent is missing are dropped from the indices but
    /// kept in the arena; [`TreeBuilder`](super::TreeBuilder) never
    /// produces such trees.
    #[must_use]
    pub fn from_parts(
        pipeline: PipelineInstance,
        stages: Vec<StageInstance>,
        workflows: Vec<WorkflowInstance>,
        actions: Vec<ActionInstance>,
    ) -> Self {
        let mut tree = Self {
            pipeline,
            stages: HashMap::new(),
            workflows: HashMap::new(),
            actions: HashMap::new(),
            stage_order: Vec::new(),
            workflows_by_stage: HashMap::new(),
            actions_by_workflow: HashMap::new(),
        };

        for stage in stages {
            if stage.pipeline_id == tree.pipeline.id {
                tree.stage_order.push(stage.id);
            }
            tree.workflows_by_stage.entry(stage.id).or_default();
            tree.stages.insert(stage.id, stage);
        }
        for workflow in workflows {
            if let Some(children) = tree.workflows_by_stage.get_mut(&workflow.stage_id) {
                children.push(workflow.id);
            }
            tree.actions_by_workflow.entry(workflow.id).or_default();
            tree.workflows.insert(workflow.id, workflow);
        }
        for action in actions {
            if let Some(children) = tree.actions_by_workflow.get_mut(&action.workflow_id) {
                children.push(action.id);
            }
            tree.actions.insert(action.id, action);
        }

        sort_children(&mut tree.stage_order, &tree.stages);
        for children in tree.workflows_by_stage.values_mut() {
            sort_children(children, &tree.workflows);
        }
        for children in tree.actions_by_workflow.values_mut() {
            sort_children(children, &tree.actions);
        }
        tree
    }

    /// Returns the pipeline id.
    #[must_use]
    pub const fn id(&self) -> PipelineId {
        self.pipeline.id
    }

    /// Returns the root instance.
    #[must_use]
    pub const fn pipeline(&self) -> &PipelineInstance {
        &self.pipeline
    }

    /// Returns the root instance mutably.
    pub fn pipeline_mut(&mut self) -> &mut PipelineInstance {
        &mut self.pipeline
    }

    /// Looks up a stage.
    pub fn stage(&self, id: StageId) -> Result<&StageInstance, NotFoundError> {
        self.stages
            .get(&id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Stage, id))
    }

    /// Looks up a stage mutably.
    pub fn stage_mut(&mut self, id: StageId) -> Result<&mut StageInstance, NotFoundError> {
        self.stages
            .get_mut(&id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Stage, id))
    }

    /// Looks up a workflow.
    pub fn workflow(&self, id: WorkflowId) -> Result<&WorkflowInstance, NotFoundError> {
        self.workflows
            .get(&id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Workflow, id))
    }

    /// Looks up a workflow mutably.
    pub fn workflow_mut(&mut self, id: WorkflowId) -> Result<&mut WorkflowInstance, NotFoundError> {
        self.workflows
            .get_mut(&id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Workflow, id))
    }

    /// Looks up an action.
    pub fn action(&self, id: ActionId) -> Result<&ActionInstance, NotFoundError> {
        self.actions
            .get(&id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Action, id))
    }

    /// Looks up an action mutably.
    pub fn action_mut(&mut self, id: ActionId) -> Result<&mut ActionInstance, NotFoundError> {
        self.actions
            .get_mut(&id)
            .ok_or_else(|| NotFoundError::new(EntityKind::Action, id))
    }

    /// Returns true if the action belongs to this tree.
    #[must_use]
    pub fn contains_action(&self, id: ActionId) -> bool {
        self.actions.contains_key(&id)
    }

    /// Stage ids in execution order.
    #[must_use]
    pub fn stage_ids(&self) -> &[StageId] {
        &self.stage_order
    }

    /// Workflow ids of a stage in execution order.
    #[must_use]
    pub fn workflow_ids(&self, stage: StageId) -> &[WorkflowId] {
        self.workflows_by_stage
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Action ids of a workflow in execution order.
    #[must_use]
    pub fn action_ids(&self, workflow: WorkflowId) -> &[ActionId] {
        self.actions_by_workflow
            .get(&workflow)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &StageInstance> {
        self.stage_order.iter().filter_map(|id| self.stages.get(id))
    }

    /// Workflows of a stage in execution order.
    pub fn workflows_of(&self, stage: StageId) -> impl Iterator<Item = &WorkflowInstance> {
        self.workflow_ids(stage)
            .iter()
            .filter_map(|id| self.workflows.get(id))
    }

    /// Actions of a workflow in execution order.
    pub fn actions_of(&self, workflow: WorkflowId) -> impl Iterator<Item = &ActionInstance> {
        self.action_ids(workflow)
            .iter()
            .filter_map(|id| self.actions.get(id))
    }

    /// Every action in the tree, in no particular order.
    pub fn actions(&self) -> impl Iterator<Item = &ActionInstance> {
        self.actions.values()
    }

    /// Every workflow in the tree, in no particular order.
    pub fn workflows(&self) -> impl Iterator<Item = &WorkflowInstance> {
        self.workflows.values()
    }

    /// Returns the owning workflow and stage of an action.
    pub fn ancestors_of(&self, action: ActionId) -> Result<(WorkflowId, StageId), NotFoundError> {
        let workflow_id = self.action(action)?.workflow_id;
        let stage_id = self.workflow(workflow_id)?.stage_id;
        Ok((workflow_id, stage_id))
    }

    /// Returns true if every action in the tree is terminal.
    #[must_use]
    pub fn all_actions_terminal(&self) -> bool {
        self.actions.values().all(|a| a.status.is_terminal())
    }

    /// Overwrites an instance with the state recorded in a change.
    ///
    /// Changes never alter parent ids or positions, so indices stay valid.
    pub fn apply(&mut self, change: &InstanceChange) -> Result<(), NotFoundError> {
        match change {
            InstanceChange::Pipeline(p) => {
                if p.id != self.pipeline.id {
                    return Err(NotFoundError::new(EntityKind::Pipeline, p.id));
                }
                self.pipeline = p.clone();
            }
            InstanceChange::Stage(s) => *self.stage_mut(s.id)? = s.clone(),
            InstanceChange::Workflow(w) => *self.workflow_mut(w.id)? = w.clone(),
            InstanceChange::Action(a) => *self.action_mut(a.id)? = a.clone(),
        }
        Ok(())
    }
}
