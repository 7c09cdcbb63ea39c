//! The background dispatch loop.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::queue::DispatchQueue;
use crate::core::{ActionId, WorkerId};
use crate::observability::{SpanTimer, TickMetrics};
use crate::workers::WorkerRegistry;

/// Spawns the dispatch loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchLoop;

impl DispatchLoop {
    /// Starts ticking `queue` on the current runtime.
    ///
    /// Ticks never overlap; a slow tick delays the next one. The interval,
    /// staleness policy and heartbeat timeout come from the orchestrator's
    /// config.
    #[must_use]
    pub fn spawn(queue: Arc<DispatchQueue>) -> DispatchHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(TickMetrics::new());
        let registry = Arc::clone(queue.orchestrator().registry());
        let task = tokio::spawn(run(queue, Arc::clone(&metrics), shutdown_rx));
        DispatchHandle {
            shutdown,
            task,
            metrics,
            registry,
        }
    }
}

async fn run(queue: Arc<DispatchQueue>, metrics: Arc<TickMetrics>, mut shutdown_rx: watch::Receiver<bool>) {
    let config = queue.orchestrator().config().clone();
    let mut interval = tokio::time::interval(config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick_interval_ms = config.tick_interval_ms, "Dispatch loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let timer = SpanTimer::start("dispatch.tick");
        let report = queue.tick().await;
        if config.reset_stale_actions && !report.stale.is_empty() {
            let rewound = queue.apply_stale_policy(&report.stale).await;
            metrics.record_stale_resets(rewound);
        }
        let duration_ms = timer.finish();
        metrics.record_tick(&report, duration_ms);

        if report.errors > 0 {
            warn!(errors = report.errors, "Dispatch tick had failures");
        }
        debug!(
            duration_ms,
            assigned = report.assigned.len(),
            stale = report.stale.len(),
            reconciled = report.reconciled.len(),
            pruned = report.pruned_workers.len(),
            "Dispatch tick finished"
        );
    }

    info!(ticks = metrics.ticks(), "Dispatch loop stopped");
}

/// Controls a running dispatch loop.
#[derive(Debug)]
pub struct DispatchHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    metrics: Arc<TickMetrics>,
    registry: Arc<WorkerRegistry>,
}

impl DispatchHandle {
    /// Returns the loop's counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<TickMetrics> {
        &self.metrics
    }

    /// Returns true once the loop task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop after its current tick, then shuts down the worker
    /// registry and returns the assignments still outstanding.
    pub async fn shutdown(self) -> Vec<(WorkerId, ActionId)> {
        // A closed channel means the task is already gone.
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Dispatch loop task ended abnormally");
        }
        self.registry.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::core::Status;
    use crate::orchestrator::Orchestrator;
    use crate::store::InstanceStore;
    use crate::testing::{find_action, launched_store, linear_tree, RecordingTransport};
    use crate::workers::RegistryState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_loop_dispatches_and_shuts_down() {
        let tree = linear_tree("p", &["build"]);
        let build = find_action(&tree, "build").unwrap();
        let pipeline_id = tree.id();
        let store = launched_store([tree]).await.unwrap();
        let registry = Arc::new(WorkerRegistry::new());
        let worker = WorkerId::new();
        registry.register(worker).unwrap();
        let config = OrchestratorConfig::new().with_tick_interval(Duration::from_millis(10));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), registry.clone()).with_config(config));
        let transport = Arc::new(RecordingTransport::new());
        let queue = Arc::new(DispatchQueue::new(orchestrator, transport.clone()));

        let handle = DispatchLoop::spawn(queue);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        assert!(handle.metrics().ticks() >= 2);
        assert_eq!(handle.metrics().assigned(), 1);

        let outstanding = handle.shutdown().await;
        assert_eq!(outstanding, vec![(worker, build)]);
        assert_eq!(registry.state(), RegistryState::ShutDown);
        assert_eq!(transport.delivered_actions(), vec![build]);

        let stored = store.load(pipeline_id).await.unwrap().tree;
        assert_eq!(stored.action(build).unwrap().status, Status::InProgress);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let store = Arc::new(crate::store::InMemoryInstanceStore::new());
        let config = OrchestratorConfig::new().with_tick_interval(Duration::from_secs(3600));
        let orchestrator = Arc::new(
            Orchestrator::new(store, Arc::new(WorkerRegistry::new())).with_config(config),
        );
        let queue = Arc::new(DispatchQueue::new(orchestrator, Arc::new(RecordingTransport::new())));

        let handle = DispatchLoop::spawn(queue);
        let metrics = Arc::clone(handle.metrics());
        assert!(handle.shutdown().await.is_empty());
        // The interval fires immediately, so at most one tick ran.
        assert!(metrics.ticks() <= 1);
    }
}
