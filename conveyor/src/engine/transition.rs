//! Order advancement and aggregation shared by every engine operation.
//!
//! The same rule applies at each level of the tree. After a child at order
//! `N` becomes terminal, nothing happens while any sibling at order `<= N`
//! is still running. Otherwise the next order (the smallest one above `N`)
//! is activated, or, when there is none, the parent becomes terminal with
//! the `worse_of` of all its children and the rule repeats one level up.

use crate::core::{aggregate, ActionId, StageId, Status, WorkflowId};
use crate::errors::NotFoundError;
use crate::hierarchy::{
    ActionInstance, InstanceChange, PipelineInstance, PipelineTree, Sequenced, StageInstance,
    WorkflowInstance,
};
use crate::utils::Timestamp;

use super::MutationBatch;

/// Position and status of one child, detached from the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Child<I> {
    pub id: I,
    pub order: i32,
    pub status: Status,
}

impl<I: Copy> Child<I> {
    fn of<T: Sequenced>(id: I, instance: &T) -> Self {
        Self {
            id,
            order: instance.order(),
            status: instance.status(),
        }
    }
}

/// What a parent does after one of its children at a given order finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Siblings at this or an earlier order are still running.
    Wait,
    /// Activate every child at `order`; `running` aggregates the orders passed.
    Next { order: i32, running: Status },
    /// No later order exists; the parent finishes with this status.
    Done(Status),
}

/// Decides how a parent advances once a child at `completed_order` is terminal.
///
/// An empty child set is immediately `Done(Success)`.
pub(crate) fn plan_advance<I>(children: &[Child<I>], completed_order: i32) -> Advance {
    let pending = children
        .iter()
        .any(|c| c.order <= completed_order && !c.status.is_terminal());
    if pending {
        return Advance::Wait;
    }

    let running = aggregate(
        children
            .iter()
            .filter(|c| c.order <= completed_order)
            .map(|c| c.status),
    );
    match children
        .iter()
        .map(|c| c.order)
        .filter(|order| *order > completed_order)
        .min()
    {
        Some(order) => Advance::Next { order, running },
        None => Advance::Done(running),
    }
}

/// Lowest order among children, if any.
fn first_order<I>(children: &[Child<I>]) -> Option<i32> {
    children.iter().map(|c| c.order).min()
}

/// An in-progress mutation of a tree snapshot.
///
/// Every instance touched through the `update_*` helpers is recorded in the
/// batch with its final state.
pub(crate) struct Transition<'a> {
    pub tree: &'a mut PipelineTree,
    pub batch: MutationBatch,
    pub now: Timestamp,
}

impl<'a> Transition<'a> {
    pub fn new(tree: &'a mut PipelineTree, now: Timestamp) -> Self {
        Self {
            tree,
            batch: MutationBatch::new(),
            now,
        }
    }

    pub fn finish(self) -> MutationBatch {
        self.batch
    }

    pub fn update_pipeline<F>(&mut self, f: F)
    where
        F: FnOnce(&mut PipelineInstance),
    {
        let pipeline = self.tree.pipeline_mut();
        f(pipeline);
        let snapshot = pipeline.clone();
        self.batch.record(InstanceChange::Pipeline(snapshot));
    }

    pub fn update_stage<F>(&mut self, id: StageId, f: F) -> Result<(), NotFoundError>
    where
        F: FnOnce(&mut StageInstance),
    {
        let stage = self.tree.stage_mut(id)?;
        f(stage);
        let snapshot = stage.clone();
        self.batch.record(InstanceChange::Stage(snapshot));
        Ok(())
    }

    pub fn update_workflow<F>(&mut self, id: WorkflowId, f: F) -> Result<(), NotFoundError>
    where
        F: FnOnce(&mut WorkflowInstance),
    {
        let workflow = self.tree.workflow_mut(id)?;
        f(workflow);
        let snapshot = workflow.clone();
        self.batch.record(InstanceChange::Workflow(snapshot));
        Ok(())
    }

    pub fn update_action<F>(&mut self, id: ActionId, f: F) -> Result<(), NotFoundError>
    where
        F: FnOnce(&mut ActionInstance),
    {
        let action = self.tree.action_mut(id)?;
        f(action);
        let snapshot = action.clone();
        self.batch.record(InstanceChange::Action(snapshot));
        Ok(())
    }

    fn stage_children(&self) -> Vec<Child<StageId>> {
        self.tree.stages().map(|s| Child::of(s.id, s)).collect()
    }

    fn workflow_children(&self, stage: StageId) -> Vec<Child<WorkflowId>> {
        self.tree
            .workflows_of(stage)
            .map(|w| Child::of(w.id, w))
            .collect()
    }

    fn action_children(&self, workflow: WorkflowId) -> Vec<Child<ActionId>> {
        self.tree
            .actions_of(workflow)
            .map(|a| Child::of(a.id, a))
            .collect()
    }

    // ---- actions -------------------------------------------------------

    /// Detaches an action from its earlier run before it is rewound.
    ///
    /// The worker still assigned to it is recorded for release and, if the
    /// action ever ran, its stored results are marked for clearing.
    pub fn displace_run(&mut self, id: ActionId) -> Result<(), NotFoundError> {
        let action = self.tree.action(id)?;
        let worker = action.assigned_worker;
        let ran = action.start_time.is_some() || action.status.is_terminal();
        if let Some(worker) = worker {
            self.batch.release_worker(worker, id);
        }
        if ran {
            self.batch.clear_results_for(id);
        }
        Ok(())
    }

    /// Makes an action dispatchable again, dropping any earlier run's state.
    pub fn ready_action(&mut self, id: ActionId) -> Result<(), NotFoundError> {
        self.displace_run(id)?;
        self.update_action(id, |a| {
            a.status = Status::Ready;
            a.assigned_worker = None;
            a.start_time = None;
            a.end_time = None;
        })
    }

    /// Sets an action terminal and advances its workflow.
    pub fn finish_action(&mut self, id: ActionId, status: Status) -> Result<(), NotFoundError> {
        let now = self.now;
        self.update_action(id, |a| {
            a.status = status;
            a.end_time = Some(now);
        })?;
        let action = self.tree.action(id)?;
        let (workflow, order) = (action.workflow_id, action.order);
        self.advance_workflow(workflow, order)
    }

    // ---- workflows -----------------------------------------------------

    fn open_workflow(&mut self, id: WorkflowId) -> Result<(), NotFoundError> {
        let now = self.now;
        self.update_workflow(id, |w| {
            w.status = Status::InProgress;
            w.start_time = Some(now);
            w.end_time = None;
            w.running_status = None;
        })
    }

    /// Readies the workflow's first order, or finishes it when it has no actions.
    fn seed_workflow(&mut self, id: WorkflowId) -> Result<(), NotFoundError> {
        let children = self.action_children(id);
        match first_order(&children) {
            Some(first) => {
                for child in children.iter().filter(|c| c.order == first) {
                    self.ready_action(child.id)?;
                }
                Ok(())
            }
            None => self.finish_workflow(id, Status::Success),
        }
    }

    pub fn advance_workflow(&mut self, id: WorkflowId, completed_order: i32) -> Result<(), NotFoundError> {
        let children = self.action_children(id);
        match plan_advance(&children, completed_order) {
            Advance::Wait => Ok(()),
            Advance::Next { order, running } => {
                self.update_workflow(id, |w| w.running_status = Some(running))?;
                for child in children.iter().filter(|c| c.order == order) {
                    self.ready_action(child.id)?;
                }
                Ok(())
            }
            Advance::Done(status) => self.finish_workflow(id, status),
        }
    }

    fn finish_workflow(&mut self, id: WorkflowId, status: Status) -> Result<(), NotFoundError> {
        let now = self.now;
        self.update_workflow(id, |w| {
            w.status = status;
            w.end_time = Some(now);
            w.running_status = Some(status);
        })?;
        let workflow = self.tree.workflow(id)?;
        let (stage, order) = (workflow.stage_id, workflow.order);
        self.advance_stage(stage, order)
    }

    // ---- stages --------------------------------------------------------

    fn open_stage(&mut self, id: StageId) -> Result<(), NotFoundError> {
        let now = self.now;
        self.update_stage(id, |s| {
            s.status = Status::InProgress;
            s.start_time = Some(now);
            s.end_time = None;
            s.running_status = None;
        })
    }

    /// Opens every workflow at `order` before seeding any of them, so an
    /// empty workflow finishing early never sees a sibling still holding a
    /// stale terminal status.
    fn activate_workflows(&mut self, children: &[Child<WorkflowId>], order: i32) -> Result<(), NotFoundError> {
        let batch: Vec<WorkflowId> = children
            .iter()
            .filter(|c| c.order == order)
            .map(|c| c.id)
            .collect();
        for id in &batch {
            self.open_workflow(*id)?;
        }
        for id in batch {
            self.seed_workflow(id)?;
        }
        Ok(())
    }

    fn seed_stage(&mut self, id: StageId) -> Result<(), NotFoundError> {
        let children = self.workflow_children(id);
        match first_order(&children) {
            Some(first) => self.activate_workflows(&children, first),
            None => self.finish_stage(id, Status::Success),
        }
    }

    pub fn advance_stage(&mut self, id: StageId, completed_order: i32) -> Result<(), NotFoundError> {
        let children = self.workflow_children(id);
        match plan_advance(&children, completed_order) {
            Advance::Wait => Ok(()),
            Advance::Next { order, running } => {
                self.update_stage(id, |s| s.running_status = Some(running))?;
                self.activate_workflows(&children, order)
            }
            Advance::Done(status) => self.finish_stage(id, status),
        }
    }

    fn finish_stage(&mut self, id: StageId, status: Status) -> Result<(), NotFoundError> {
        let now = self.now;
        self.update_stage(id, |s| {
            s.status = status;
            s.end_time = Some(now);
            s.running_status = Some(status);
        })?;
        let order = self.tree.stage(id)?.order;
        self.advance_pipeline(order)
    }

    // ---- pipeline ------------------------------------------------------

    fn activate_stages(&mut self, children: &[Child<StageId>], order: i32) -> Result<(), NotFoundError> {
        let batch: Vec<StageId> = children
            .iter()
            .filter(|c| c.order == order)
            .map(|c| c.id)
            .collect();
        for id in &batch {
            self.open_stage(*id)?;
        }
        for id in batch {
            self.seed_stage(id)?;
        }
        Ok(())
    }

    /// Starts the pipeline at its first stage order.
    pub fn launch(&mut self) -> Result<(), NotFoundError> {
        let now = self.now;
        self.update_pipeline(|p| {
            p.status = Status::InProgress;
            p.start_time = Some(now);
            p.end_time = None;
            p.running_status = None;
        });
        let children = self.stage_children();
        match first_order(&children) {
            Some(first) => self.activate_stages(&children, first),
            None => {
                self.finish_pipeline(Status::Success);
                Ok(())
            }
        }
    }

    pub fn advance_pipeline(&mut self, completed_order: i32) -> Result<(), NotFoundError> {
        let children = self.stage_children();
        match plan_advance(&children, completed_order) {
            Advance::Wait => Ok(()),
            Advance::Next { order, running } => {
                self.update_pipeline(|p| p.running_status = Some(running));
                self.activate_stages(&children, order)
            }
            Advance::Done(status) => {
                self.finish_pipeline(status);
                Ok(())
            }
        }
    }

    fn finish_pipeline(&mut self, status: Status) {
        let now = self.now;
        self.update_pipeline(|p| {
            p.status = status;
            p.end_time = Some(now);
            p.running_status = Some(status);
        });
    }

    /// Moves the action's workflow, stage and pipeline back to `InProgress`
    /// when they already finished.
    pub fn reopen_ancestors(&mut self, action: ActionId) -> Result<(), NotFoundError> {
        let (workflow, stage) = self.tree.ancestors_of(action)?;
        if self.tree.workflow(workflow)?.status.is_terminal() {
            self.update_workflow(workflow, |w| {
                w.status = Status::InProgress;
                w.end_time = None;
            })?;
        }
        if self.tree.stage(stage)?.status.is_terminal() {
            self.update_stage(stage, |s| {
                s.status = Status::InProgress;
                s.end_time = None;
            })?;
        }
        if self.tree.pipeline().status.is_terminal() {
            self.update_pipeline(|p| {
                p.status = Status::InProgress;
                p.end_time = None;
            });
        }
        Ok(())
    }
}
