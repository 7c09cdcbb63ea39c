//! One pass of the dispatch control loop.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::{ActionId, PipelineId, WorkerId};
use crate::errors::ConveyorError;
use crate::orchestrator::Orchestrator;
use crate::store::DispatchCandidate;
use crate::utils::{age_exceeds, now_utc, Timestamp};
use crate::workers::WorkerTransport;

/// An action handed to a worker during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    /// Owning pipeline.
    pub pipeline_id: PipelineId,
    /// The dispatched action.
    pub action_id: ActionId,
    /// The worker now running it.
    pub worker_id: WorkerId,
}

/// An `InProgress` action running longer than the staleness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StaleAction {
    /// Owning pipeline.
    pub pipeline_id: PipelineId,
    /// The long-running action.
    pub action_id: ActionId,
    /// Worker recorded on the action, if any.
    pub worker: Option<WorkerId>,
    /// When the action was dispatched.
    pub started_at: Timestamp,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Actions delivered to workers, in dispatch order.
    pub assigned: Vec<Assignment>,
    /// Potentially abandoned actions. Flagged only; see
    /// [`DispatchQueue::apply_stale_policy`].
    pub stale: Vec<StaleAction>,
    /// Pipelines whose status had to be re-derived.
    pub reconciled: Vec<PipelineId>,
    /// Workers flagged inactive for missing heartbeats.
    pub pruned_workers: Vec<WorkerId>,
    /// Actions those workers still held.
    pub orphaned_actions: Vec<ActionId>,
    /// Units of work that failed and were skipped.
    pub errors: usize,
}

impl TickReport {
    /// Returns true if the tick changed or flagged nothing.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.assigned.is_empty()
            && self.stale.is_empty()
            && self.reconciled.is_empty()
            && self.pruned_workers.is_empty()
            && self.errors == 0
    }
}

/// Assigns ready work, flags stale work, repairs drifted pipelines and
/// prunes silent workers.
///
/// The queue keeps no state of its own; the stored instances are the queue.
pub struct DispatchQueue {
    orchestrator: Arc<Orchestrator>,
    transport: Arc<dyn WorkerTransport>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl DispatchQueue {
    /// Creates a queue delivering through `transport`.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, transport: Arc<dyn WorkerTransport>) -> Self {
        Self {
            orchestrator,
            transport,
        }
    }

    /// Returns the orchestrator the queue drives.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Runs one tick at the current time.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(now_utc()).await
    }

    /// Runs one tick as of `now`.
    ///
    /// Never fails as a whole: each failing unit is logged, counted in
    /// [`TickReport::errors`] and skipped.
    pub async fn tick_at(&self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();
        self.assign(&mut report).await;
        self.find_stale(now, &mut report).await;
        self.reconcile(&mut report).await;
        self.prune(now, &mut report);
        report
    }

    async fn assign(&self, report: &mut TickReport) {
        let mut candidates = match self.orchestrator.store().dispatch_candidates().await {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "Failed to list dispatch candidates");
                report.errors += 1;
                return;
            }
        };
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by_key(DispatchCandidate::dispatch_key);

        let mut idle: VecDeque<WorkerId> = self.orchestrator.registry().list_idle().into();
        for candidate in candidates {
            if idle.is_empty() {
                debug!("No idle workers left, deferring remaining actions");
                break;
            }
            self.assign_one(&candidate, &mut idle, report).await;
        }
    }

    async fn assign_one(
        &self,
        candidate: &DispatchCandidate,
        idle: &mut VecDeque<WorkerId>,
        report: &mut TickReport,
    ) {
        let action_id = candidate.action.id;
        while let Some(&worker) = idle.front() {
            let request = match self.orchestrator.dispatch_action(action_id, worker).await {
                Ok(request) => request,
                Err(ConveyorError::WorkerUnavailable(err)) => {
                    debug!(worker_id = %worker, reason = %err.reason, "Skipping unavailable worker");
                    idle.pop_front();
                    continue;
                }
                Err(err) => {
                    warn!(action_id = %action_id, error = %err, "Failed to dispatch action");
                    report.errors += 1;
                    return;
                }
            };
            idle.pop_front();

            if let Err(err) = self.transport.deliver(worker, &request).await {
                warn!(
                    action_id = %action_id,
                    worker_id = %worker,
                    error = %err,
                    "Delivery failed, rewinding action"
                );
                report.errors += 1;
                self.rewind_undelivered(action_id, worker).await;
                return;
            }

            info!(
                pipeline_id = %candidate.pipeline_id,
                action_id = %action_id,
                worker_id = %worker,
                priority = candidate.priority,
                "Action assigned"
            );
            report.assigned.push(Assignment {
                pipeline_id: candidate.pipeline_id,
                action_id,
                worker_id: worker,
            });
            return;
        }
    }

    async fn rewind_undelivered(&self, action_id: ActionId, worker: WorkerId) {
        if let Err(err) = self.orchestrator.reset_action(action_id, false, true).await {
            error!(action_id = %action_id, error = %err, "Failed to rewind undelivered action");
        }
        self.orchestrator.registry().release_if_assigned(worker, action_id);
    }

    async fn find_stale(&self, now: Timestamp, report: &mut TickReport) {
        let running = match self.orchestrator.store().running_actions().await {
            Ok(running) => running,
            Err(err) => {
                error!(error = %err, "Failed to list running actions");
                report.errors += 1;
                return;
            }
        };
        let threshold = self.orchestrator.config().staleness_threshold();

        for entry in running {
            let action = &entry.action;
            if action.manual || action.end_time.is_some() {
                continue;
            }
            let Some(started_at) = action.start_time else {
                continue;
            };
            if !age_exceeds(started_at, now, threshold) {
                continue;
            }
            warn!(
                pipeline_id = %entry.pipeline_id,
                action_id = %action.id,
                started_at = %started_at,
                "Action may be abandoned"
            );
            report.stale.push(StaleAction {
                pipeline_id: entry.pipeline_id,
                action_id: action.id,
                worker: action.assigned_worker,
                started_at,
            });
        }
    }

    async fn reconcile(&self, report: &mut TickReport) {
        let unresolved = match self.orchestrator.store().unresolved_pipelines().await {
            Ok(unresolved) => unresolved,
            Err(err) => {
                error!(error = %err, "Failed to list unresolved pipelines");
                report.errors += 1;
                return;
            }
        };
        for pipeline_id in unresolved {
            match self.orchestrator.reconcile_pipeline(pipeline_id).await {
                Ok(true) => report.reconciled.push(pipeline_id),
                Ok(false) => {}
                Err(err) => {
                    warn!(pipeline_id = %pipeline_id, error = %err, "Failed to reconcile pipeline");
                    report.errors += 1;
                }
            }
        }
    }

    fn prune(&self, now: Timestamp, report: &mut TickReport) {
        let timeout = self.orchestrator.config().heartbeat_timeout();
        for pruned in self.orchestrator.registry().prune_expired(now, timeout) {
            report.pruned_workers.push(pruned.worker);
            report.orphaned_actions.extend(pruned.orphaned_action);
        }
    }

    /// Rewinds stale actions whose worker is no longer running them.
    ///
    /// An action counts as abandoned when its worker is unknown, inactive,
    /// or now assigned elsewhere. Rewinding is a partial reset that only
    /// applies while the action is still `InProgress`. Returns the number of
    /// actions rewound.
    pub async fn apply_stale_policy(&self, stale: &[StaleAction]) -> usize {
        let registry = self.orchestrator.registry();
        let mut rewound = 0;
        for entry in stale {
            let alive = entry
                .worker
                .is_some_and(|worker| registry.is_working_on(worker, entry.action_id));
            if alive {
                continue;
            }
            match self.orchestrator.reset_action(entry.action_id, false, true).await {
                Ok(true) => {
                    info!(action_id = %entry.action_id, "Rewound abandoned action");
                    rewound += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(action_id = %entry.action_id, error = %err, "Failed to rewind stale action");
                }
            }
        }
        rewound
    }
}
