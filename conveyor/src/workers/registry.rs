//! Process-wide record of known workers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::{ActionId, WorkerId};
use crate::errors::{ConveyorError, EntityKind, NotFoundError, WorkerUnavailableError};
use crate::utils::{age_exceeds, now_utc, Timestamp};

/// Liveness and assignment of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Worker id.
    pub id: WorkerId,
    /// When the worker first registered.
    pub registered_at: Timestamp,
    /// Last heartbeat (or registration) time.
    pub last_heartbeat: Timestamp,
    /// Action the worker is running, if any.
    pub assigned_action: Option<ActionId>,
    /// False once the worker went silent or the registry shut down.
    pub active: bool,
}

impl WorkerRecord {
    /// Returns true if the worker can take an assignment.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.active && self.assigned_action.is_none()
    }
}

/// A worker flagged inactive by [`WorkerRegistry::prune_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunedWorker {
    /// The silent worker.
    pub worker: WorkerId,
    /// The action it still held, now orphaned.
    pub orphaned_action: Option<ActionId>,
}

/// Registry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryState {
    /// Accepting registrations and assignments.
    Running,
    /// Every operation is refused.
    ShutDown,
}

#[derive(Debug)]
struct Inner {
    state: RegistryState,
    workers: BTreeMap<WorkerId, WorkerRecord>,
}

/// Thread-safe registry of workers.
///
/// The only writer of worker records; the dispatch queue goes through these
/// operations and never touches a record directly.
#[derive(Debug)]
pub struct WorkerRegistry {
    inner: RwLock<Inner>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn shut_down_error() -> ConveyorError {
    WorkerUnavailableError {
        worker: None,
        reason: "worker registry is shut down".to_string(),
    }
    .into()
}

impl WorkerRegistry {
    /// Creates a running registry with no workers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: RegistryState::Running,
                workers: BTreeMap::new(),
            }),
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> RegistryState {
        self.inner.read().state
    }

    /// Registers a worker at the current time.
    pub fn register(&self, worker: WorkerId) -> Result<Option<ActionId>, ConveyorError> {
        self.register_at(worker, now_utc())
    }

    /// Registers a worker, or re-activates a known one.
    ///
    /// A re-registering worker has restarted and lost whatever it was
    /// running; the dropped assignment is returned so the caller can let the
    /// staleness path recover it.
    pub fn register_at(&self, worker: WorkerId, now: Timestamp) -> Result<Option<ActionId>, ConveyorError> {
        let mut inner = self.inner.write();
        if inner.state == RegistryState::ShutDown {
            return Err(shut_down_error());
        }

        let record = inner.workers.entry(worker).or_insert_with(|| WorkerRecord {
            id: worker,
            registered_at: now,
            last_heartbeat: now,
            assigned_action: None,
            active: true,
        });
        record.active = true;
        record.last_heartbeat = now;
        let dropped = record.assigned_action.take();

        match dropped {
            Some(action) => warn!(
                worker_id = %worker,
                action_id = %action,
                "Worker re-registered while holding an assignment"
            ),
            None => info!(worker_id = %worker, "Worker registered"),
        }
        Ok(dropped)
    }

    /// Records a heartbeat at the current time.
    pub fn heartbeat(&self, worker: WorkerId) -> Result<(), ConveyorError> {
        self.heartbeat_at(worker, now_utc())
    }

    /// Records a heartbeat, re-activating a pruned worker.
    pub fn heartbeat_at(&self, worker: WorkerId, now: Timestamp) -> Result<(), ConveyorError> {
        let mut inner = self.inner.write();
        if inner.state == RegistryState::ShutDown {
            return Err(shut_down_error());
        }
        let record = inner
            .workers
            .get_mut(&worker)
            .ok_or_else(|| NotFoundError::new(EntityKind::Worker, worker))?;
        if !record.active {
            debug!(worker_id = %worker, "Pruned worker is alive again");
        }
        record.active = true;
        record.last_heartbeat = now;
        Ok(())
    }

    /// Assigns an action to an idle worker.
    pub fn assign(&self, worker: WorkerId, action: ActionId) -> Result<(), ConveyorError> {
        let mut inner = self.inner.write();
        if inner.state == RegistryState::ShutDown {
            return Err(shut_down_error());
        }
        let record = inner
            .workers
            .get_mut(&worker)
            .ok_or_else(|| NotFoundError::new(EntityKind::Worker, worker))?;
        if !record.active {
            return Err(WorkerUnavailableError::for_worker(worker, "worker is inactive").into());
        }
        if let Some(current) = record.assigned_action {
            return Err(
                WorkerUnavailableError::for_worker(worker, format!("worker is busy with {current}")).into(),
            );
        }
        record.assigned_action = Some(action);
        Ok(())
    }

    /// Clears a worker's assignment and returns it.
    pub fn release(&self, worker: WorkerId) -> Result<Option<ActionId>, ConveyorError> {
        let mut inner = self.inner.write();
        if inner.state == RegistryState::ShutDown {
            return Err(shut_down_error());
        }
        let record = inner
            .workers
            .get_mut(&worker)
            .ok_or_else(|| NotFoundError::new(EntityKind::Worker, worker))?;
        Ok(record.assigned_action.take())
    }

    /// Releases a worker only if it is still assigned `action`.
    ///
    /// Returns true if the worker was released.
    pub fn release_if_assigned(&self, worker: WorkerId, action: ActionId) -> bool {
        let mut inner = self.inner.write();
        match inner.workers.get_mut(&worker) {
            Some(record) if record.assigned_action == Some(action) => {
                record.assigned_action = None;
                true
            }
            _ => false,
        }
    }

    /// Returns a copy of a worker's record.
    #[must_use]
    pub fn get(&self, worker: WorkerId) -> Option<WorkerRecord> {
        self.inner.read().workers.get(&worker).cloned()
    }

    /// Returns true if the worker is active and still running `action`.
    #[must_use]
    pub fn is_working_on(&self, worker: WorkerId, action: ActionId) -> bool {
        self.inner
            .read()
            .workers
            .get(&worker)
            .is_some_and(|r| r.active && r.assigned_action == Some(action))
    }

    /// Active workers, ordered by id.
    #[must_use]
    pub fn list_active(&self) -> Vec<WorkerRecord> {
        self.inner
            .read()
            .workers
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }

    /// Active workers without an assignment, ordered by id.
    #[must_use]
    pub fn list_idle(&self) -> Vec<WorkerId> {
        self.inner
            .read()
            .workers
            .values()
            .filter(|r| r.is_idle())
            .map(|r| r.id)
            .collect()
    }

    /// Flags workers silent for longer than `timeout` as inactive.
    ///
    /// Their assignments are detached and returned; the actions stay
    /// `InProgress` until the staleness check rewinds them.
    pub fn prune_expired(&self, now: Timestamp, timeout: Duration) -> Vec<PrunedWorker> {
        let mut inner = self.inner.write();
        let mut pruned = Vec::new();
        for record in inner.workers.values_mut() {
            if record.active && age_exceeds(record.last_heartbeat, now, timeout) {
                record.active = false;
                let orphaned_action = record.assigned_action.take();
                warn!(
                    worker_id = %record.id,
                    orphaned = orphaned_action.is_some(),
                    "Pruning silent worker"
                );
                pruned.push(PrunedWorker {
                    worker: record.id,
                    orphaned_action,
                });
            }
        }
        pruned
    }

    /// Stops the registry. Every worker is flagged inactive and the
    /// outstanding assignments are returned.
    pub fn shutdown(&self) -> Vec<(WorkerId, ActionId)> {
        let mut inner = self.inner.write();
        if inner.state == RegistryState::ShutDown {
            return Vec::new();
        }
        inner.state = RegistryState::ShutDown;
        let outstanding: Vec<(WorkerId, ActionId)> = inner
            .workers
            .values_mut()
            .filter_map(|record| {
                record.active = false;
                record.assigned_action.take().map(|action| (record.id, action))
            })
            .collect();
        info!(outstanding = outstanding.len(), "Worker registry shut down");
        outstanding
    }

    /// Returns the number of known workers, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().workers.len()
    }

    /// Returns true if no worker ever registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().workers.is_empty()
    }
}
