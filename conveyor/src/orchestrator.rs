//! The orchestrator service.
//!
//! Wraps the pure engine with persistence. Every operation on a pipeline
//! takes that pipeline's lock, derives a batch from a versioned snapshot and
//! commits it with the snapshot version. A version conflict (another process
//! committed first) re-derives the batch from fresh state, with backoff, up
//! to the configured attempt limit.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::core::{ActionId, PipelineId, Status, WorkerId};
use crate::dispatch::{CompletionReport, HeartbeatSignal, WorkRequest};
use crate::engine::{self, CompletionRequest, CompletionSource, MutationBatch};
use crate::errors::ConveyorError;
use crate::events::{EventNotifier, EventSink, NoOpNotifier, TriggerNotifier};
use crate::hierarchy::PipelineTree;
use crate::results::{NoOpResultSink, ResultSink};
use crate::store::InstanceStore;
use crate::utils::now_utc;
use crate::workers::WorkerRegistry;

/// A committed batch and the tree it produced.
#[derive(Debug)]
struct Committed {
    batch: MutationBatch,
    tree: PipelineTree,
}

/// Coordinates the engine, storage, workers and collaborators.
pub struct Orchestrator {
    store: Arc<dyn InstanceStore>,
    registry: Arc<WorkerRegistry>,
    notifier: Arc<dyn EventNotifier>,
    results: Arc<dyn ResultSink>,
    config: OrchestratorConfig,
    locks: DashMap<PipelineId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("locked_pipelines", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default config and no-op collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn InstanceStore>, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            store,
            registry,
            notifier: Arc::new(NoOpNotifier),
            results: Arc::new(NoOpResultSink),
            config: OrchestratorConfig::default(),
            locks: DashMap::new(),
        }
    }

    /// Creates an orchestrator whose notifier fires the configured triggers
    /// on `sink`.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid or a trigger pattern does
    /// not compile.
    pub fn from_config(
        config: OrchestratorConfig,
        store: Arc<dyn InstanceStore>,
        registry: Arc<WorkerRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConveyorError> {
        config.validate()?;
        let notifier = TriggerNotifier::new(config.triggers.clone(), sink)?;
        Ok(Self::new(store, registry)
            .with_notifier(Arc::new(notifier))
            .with_config(config))
    }

    /// Sets the event notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the result-storage collaborator.
    #[must_use]
    pub fn with_result_sink(mut self, results: Arc<dyn ResultSink>) -> Self {
        self.results = results;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the instance store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    /// Returns the worker registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    // ---- pipelines -----------------------------------------------------

    /// Launches a freshly built tree and stores it.
    pub async fn create_pipeline(&self, mut tree: PipelineTree) -> Result<PipelineId, ConveyorError> {
        let pipeline_id = tree.id();
        engine::launch_pipeline(&mut tree, now_utc())?;
        self.store.insert(tree).await?;
        info!(pipeline_id = %pipeline_id, "Pipeline created");
        Ok(pipeline_id)
    }

    /// Resets a whole pipeline run and relaunches it.
    pub async fn reset_pipeline(&self, pipeline_id: PipelineId) -> Result<MutationBatch, ConveyorError> {
        let Some(committed) = self
            .mutate(pipeline_id, |tree| engine::reset_pipeline(tree, now_utc()).map(Some))
            .await?
        else {
            return Ok(MutationBatch::new());
        };
        self.after_reset(&committed.batch).await;
        info!(pipeline_id = %pipeline_id, "Pipeline reset");
        Ok(committed.batch)
    }

    /// Re-derives a drifted pipeline's status from its leaves.
    ///
    /// Returns true if anything had to be repaired.
    pub async fn reconcile_pipeline(&self, pipeline_id: PipelineId) -> Result<bool, ConveyorError> {
        let committed = self
            .mutate(pipeline_id, |tree| {
                let batch = engine::reconcile(tree, now_utc())?;
                Ok((!batch.is_empty()).then_some(batch))
            })
            .await?;
        let Some(committed) = committed else {
            return Ok(false);
        };
        self.release_displaced(&committed.batch);

        let last_finished = committed
            .tree
            .actions()
            .filter(|a| a.end_time.is_some())
            .max_by_key(|a| a.end_time);
        if let Some(action) = last_finished {
            self.notifier.notify(committed.tree.pipeline(), action).await;
        }
        Ok(true)
    }

    // ---- completions ---------------------------------------------------

    /// Applies an automatic worker report.
    ///
    /// A `Success` report for a `callback_required` action commits nothing
    /// and returns an empty batch. The reporting worker stays assigned until
    /// [`callback_completion`](Self::callback_completion) finishes the
    /// action, so a live worker keeps the action out of the stale policy and
    /// a pruned one lets it be rewound and run again.
    pub async fn report_completion(&self, report: CompletionReport) -> Result<MutationBatch, ConveyorError> {
        let status = report.parse_status()?;
        let request = CompletionRequest::worker(report.action_id, status);
        self.complete(request, report.payload).await
    }

    /// Applies the dedicated callback for a `callback_required` action.
    pub async fn callback_completion(&self, report: CompletionReport) -> Result<MutationBatch, ConveyorError> {
        let status = report.parse_status()?;
        let request = CompletionRequest::callback(report.action_id, status);
        self.complete(request, report.payload).await
    }

    /// Sets an action's status on behalf of a manual caller.
    ///
    /// `force` re-completes an action that is already terminal.
    pub async fn set_status(
        &self,
        action_id: ActionId,
        status: Status,
        force: bool,
    ) -> Result<MutationBatch, ConveyorError> {
        let mut request = CompletionRequest::manual(action_id, status);
        if force {
            request = request.forced();
        }
        self.complete(request, None).await
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        payload: Option<serde_json::Value>,
    ) -> Result<MutationBatch, ConveyorError> {
        let pipeline_id = self.store.pipeline_of(request.action_id).await?;
        let committed = self
            .mutate(pipeline_id, |tree| {
                let batch = engine::complete_action(tree, &request, now_utc())?;
                Ok((!batch.is_empty()).then_some(batch))
            })
            .await?;
        let Some(committed) = committed else {
            debug!(
                action_id = %request.action_id,
                "Completion left the pipeline unchanged"
            );
            return Ok(MutationBatch::new());
        };

        let action = committed.tree.action(request.action_id)?;
        if let Some(worker) = action.assigned_worker {
            if self.registry.release_if_assigned(worker, request.action_id) {
                debug!(worker_id = %worker, action_id = %request.action_id, "Worker released");
            }
        }
        self.release_displaced(&committed.batch);
        if let Some(payload) = payload {
            if let Err(err) = self.results.store(pipeline_id, request.action_id, payload).await {
                warn!(
                    action_id = %request.action_id,
                    error = %err,
                    "Result sink rejected completion payload"
                );
            }
        }

        info!(
            pipeline_id = %pipeline_id,
            action_id = %request.action_id,
            status = %request.status,
            source = ?request.source,
            pipeline_status = %committed.tree.pipeline().status,
            "Action completed"
        );
        self.notifier.notify(committed.tree.pipeline(), action).await;
        Ok(committed.batch)
    }

    // ---- resets and dispatch -------------------------------------------

    /// Rewinds execution starting at an action.
    ///
    /// Returns false, changing nothing, when `require_in_progress` is set
    /// and the action is not `InProgress`.
    pub async fn reset_action(
        &self,
        action_id: ActionId,
        full_reset: bool,
        require_in_progress: bool,
    ) -> Result<bool, ConveyorError> {
        let pipeline_id = self.store.pipeline_of(action_id).await?;
        let committed = self
            .mutate(pipeline_id, |tree| {
                engine::reset_action(tree, action_id, full_reset, require_in_progress, now_utc())
            })
            .await?;
        let Some(committed) = committed else {
            return Ok(false);
        };
        self.after_reset(&committed.batch).await;
        info!(action_id = %action_id, full_reset, "Action reset");
        Ok(true)
    }

    /// Hands a `Ready` action to an idle worker and returns the request to deliver.
    pub async fn dispatch_action(
        &self,
        action_id: ActionId,
        worker: WorkerId,
    ) -> Result<WorkRequest, ConveyorError> {
        let pipeline_id = self.store.pipeline_of(action_id).await?;
        self.registry.assign(worker, action_id)?;

        let committed = self
            .mutate(pipeline_id, |tree| {
                engine::mark_dispatched(tree, action_id, worker, now_utc()).map(Some)
            })
            .await;
        let tree = match committed {
            Ok(Some(committed)) => committed.tree,
            Ok(None) => self.store.load(pipeline_id).await?.tree,
            Err(err) => {
                self.registry.release_if_assigned(worker, action_id);
                return Err(err);
            }
        };

        debug!(action_id = %action_id, worker_id = %worker, "Action dispatched");
        Ok(WorkRequest::for_action(&tree, action_id)?)
    }

    /// Records a worker heartbeat.
    pub fn heartbeat(&self, signal: &HeartbeatSignal) -> Result<(), ConveyorError> {
        self.registry.heartbeat_at(signal.worker_id, signal.timestamp)
    }

    /// Frees the workers a batch took actions away from.
    fn release_displaced(&self, batch: &MutationBatch) {
        for &(worker, action_id) in batch.released_workers() {
            if self.registry.release_if_assigned(worker, action_id) {
                debug!(worker_id = %worker, action_id = %action_id, "Displaced worker released");
            }
        }
    }

    async fn after_reset(&self, batch: &MutationBatch) {
        self.release_displaced(batch);
        for &action_id in batch.cleared_results() {
            if let Err(err) = self.results.clear(action_id).await {
                warn!(action_id = %action_id, error = %err, "Failed to clear action results");
            }
        }
    }

    // ---- commit loop ---------------------------------------------------

    fn lock_for(&self, pipeline_id: PipelineId) -> Arc<Mutex<()>> {
        self.locks.entry(pipeline_id).or_default().value().clone()
    }

    /// Derives and commits a batch under the pipeline lock.
    ///
    /// `derive` returning `None` means there is nothing to commit.
    async fn mutate<F>(&self, pipeline_id: PipelineId, mut derive: F) -> Result<Option<Committed>, ConveyorError>
    where
        F: FnMut(&mut PipelineTree) -> Result<Option<MutationBatch>, ConveyorError> + Send,
    {
        let lock = self.lock_for(pipeline_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.commit_with_retry(pipeline_id, &mut derive).await
        };
        drop(lock);

        if let Ok(Some(committed)) = &outcome {
            if committed.tree.pipeline().status.is_terminal() {
                self.locks.remove_if(&pipeline_id, |_, m| Arc::strong_count(m) == 1);
            }
        }
        outcome
    }

    async fn commit_with_retry<F>(
        &self,
        pipeline_id: PipelineId,
        derive: &mut F,
    ) -> Result<Option<Committed>, ConveyorError>
    where
        F: FnMut(&mut PipelineTree) -> Result<Option<MutationBatch>, ConveyorError> + Send,
    {
        let retry = &self.config.commit_retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut snapshot = self.store.load(pipeline_id).await?;
            let Some(batch) = derive(&mut snapshot.tree)? else {
                return Ok(None);
            };

            match self.store.commit(pipeline_id, snapshot.version, &batch).await {
                Ok(_) => {
                    return Ok(Some(Committed {
                        batch,
                        tree: snapshot.tree,
                    }))
                }
                Err(err) if err.is_retryable() && retry.allows_retry(attempts) => {
                    let delay = retry.delay_for(attempts - 1);
                    warn!(
                        pipeline_id = %pipeline_id,
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Commit conflicted, re-deriving from fresh state"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingEventSink, EventTrigger, MockEventNotifier};
    use crate::hierarchy::{ActionSpec, StageSpec, TreeBuilder, WorkflowSpec};
    use crate::results::{InMemoryResultSink, MockResultSink};
    use crate::store::{DispatchCandidate, InMemoryInstanceStore, RunningAction, VersionedTree};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pipeline() -> PipelineTree {
        TreeBuilder::new("orchestrated")
            .stage(
                StageSpec::new("s").workflow(
                    WorkflowSpec::new("w")
                        .action(ActionSpec::new("first"))
                        .action(ActionSpec::new("second")),
                ),
            )
            .build()
    }

    fn action_named(tree: &PipelineTree, name: &str) -> ActionId {
        tree.actions().find(|a| a.name == name).unwrap().id
    }

    async fn setup() -> (Orchestrator, Arc<InMemoryInstanceStore>, PipelineTree) {
        let store = Arc::new(InMemoryInstanceStore::new());
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()));
        let tree = pipeline();
        let id = orchestrator.create_pipeline(tree).await.unwrap();
        let tree = store.load(id).await.unwrap().tree;
        (orchestrator, store, tree)
    }

    #[tokio::test]
    async fn test_completion_flow_releases_worker() {
        let (orchestrator, store, tree) = setup().await;
        let first = action_named(&tree, "first");
        let worker = WorkerId::new();
        orchestrator.registry().register(worker).unwrap();

        let request = orchestrator.dispatch_action(first, worker).await.unwrap();
        assert_eq!(request.action_id, first);
        assert!(orchestrator.registry().list_idle().is_empty());

        orchestrator
            .report_completion(CompletionReport::new(first, Status::Success))
            .await
            .unwrap();

        assert_eq!(orchestrator.registry().list_idle(), vec![worker]);
        let stored = store.load(tree.id()).await.unwrap().tree;
        assert_eq!(stored.action(action_named(&tree, "second")).unwrap().status, Status::Ready);
    }

    #[tokio::test]
    async fn test_dispatch_rejected_keeps_worker_idle() {
        let (orchestrator, _, tree) = setup().await;
        let second = action_named(&tree, "second");
        let worker = WorkerId::new();
        orchestrator.registry().register(worker).unwrap();

        let err = orchestrator.dispatch_action(second, worker).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(orchestrator.registry().list_idle(), vec![worker]);
    }

    #[tokio::test]
    async fn test_notifier_called_once_per_committed_completion() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let mut notifier = MockEventNotifier::new();
        notifier
            .expect_notify()
            .withf(|pipeline, action| pipeline.status == Status::InProgress && action.status == Status::Failed)
            .times(1)
            .return_const(());
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()))
            .with_notifier(Arc::new(notifier));
        let id = orchestrator.create_pipeline(pipeline()).await.unwrap();
        let first = action_named(&store.load(id).await.unwrap().tree, "first");

        orchestrator.set_status(first, Status::Failed, false).await.unwrap();
        let err = orchestrator.set_status(first, Status::Success, false).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_payload_forwarded_and_cleared_on_reset() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let results = Arc::new(InMemoryResultSink::new());
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()))
            .with_result_sink(results.clone());
        let id = orchestrator.create_pipeline(pipeline()).await.unwrap();
        let first = action_named(&store.load(id).await.unwrap().tree, "first");

        orchestrator
            .report_completion(
                CompletionReport::new(first, Status::Failed).with_payload(serde_json::json!({"failures": 2})),
            )
            .await
            .unwrap();
        assert_eq!(results.results_for(first), vec![serde_json::json!({"failures": 2})]);

        assert!(orchestrator.reset_action(first, true, false).await.unwrap());
        assert!(results.results_for(first).is_empty());
    }

    #[tokio::test]
    async fn test_result_sink_failure_does_not_fail_completion() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let mut results = MockResultSink::new();
        results
            .expect_store()
            .times(1)
            .returning(|_, _, _| Err(ConveyorError::Config("sink offline".to_string())));
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()))
            .with_result_sink(Arc::new(results));
        let id = orchestrator.create_pipeline(pipeline()).await.unwrap();
        let first = action_named(&store.load(id).await.unwrap().tree, "first");

        let batch = orchestrator
            .report_completion(CompletionReport::new(first, Status::Success).with_payload(serde_json::json!([])))
            .await
            .unwrap();
        assert!(!batch.is_empty());
    }

    #[tokio::test]
    async fn test_reset_requiring_in_progress_returns_false() {
        let (orchestrator, store, tree) = setup().await;
        let first = action_named(&tree, "first");
        let version = store.version_of(tree.id());

        assert!(!orchestrator.reset_action(first, false, true).await.unwrap());
        assert_eq!(store.version_of(tree.id()), version);
    }

    #[tokio::test]
    async fn test_callback_suppression_commits_nothing() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()));
        let tree = TreeBuilder::new("gated")
            .stage(StageSpec::new("s").workflow(WorkflowSpec::new("w").action(ActionSpec::new("gate").callback_required())))
            .build();
        let id = orchestrator.create_pipeline(tree).await.unwrap();
        let gate = action_named(&store.load(id).await.unwrap().tree, "gate");

        let batch = orchestrator
            .report_completion(CompletionReport::new(gate, Status::Success))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(store.version_of(id), Some(1));

        let batch = orchestrator
            .callback_completion(CompletionReport::new(gate, Status::Success))
            .await
            .unwrap();
        assert_eq!(batch.terminal_pipeline_status(), Some(Status::Success));
    }

    #[tokio::test]
    async fn test_unknown_status_name() {
        let (orchestrator, _, tree) = setup().await;
        let report = CompletionReport {
            action_id: action_named(&tree, "first"),
            status: "MAYBE".to_string(),
            payload: None,
        };
        let err = orchestrator.report_completion(report).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STATUS");
    }

    #[tokio::test]
    async fn test_triggers_from_config() {
        let sink = Arc::new(CollectingEventSink::new());
        let store = Arc::new(InMemoryInstanceStore::new());
        let config = OrchestratorConfig::new().with_trigger(EventTrigger::new("finished"));
        let orchestrator =
            Orchestrator::from_config(config, store.clone(), Arc::new(WorkerRegistry::new()), sink.clone()).unwrap();
        let id = orchestrator.create_pipeline(pipeline()).await.unwrap();
        let tree = store.load(id).await.unwrap().tree;

        orchestrator.set_status(action_named(&tree, "first"), Status::Success, false).await.unwrap();
        assert!(sink.is_empty());
        orchestrator.set_status(action_named(&tree, "second"), Status::Warning, false).await.unwrap();
        assert_eq!(sink.event_types(), vec!["trigger.finished"]);
    }

    /// Fails the first `conflicts` commits as if another process won the race.
    struct ConflictingStore {
        inner: InMemoryInstanceStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl InstanceStore for ConflictingStore {
        async fn insert(&self, tree: PipelineTree) -> Result<u64, ConveyorError> {
            self.inner.insert(tree).await
        }

        async fn load(&self, pipeline_id: PipelineId) -> Result<VersionedTree, ConveyorError> {
            self.inner.load(pipeline_id).await
        }

        async fn pipeline_of(&self, action_id: ActionId) -> Result<PipelineId, ConveyorError> {
            self.inner.pipeline_of(action_id).await
        }

        async fn commit(
            &self,
            pipeline_id: PipelineId,
            expected_version: u64,
            batch: &MutationBatch,
        ) -> Result<u64, ConveyorError> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(crate::errors::ConcurrentModificationError::new(
                    pipeline_id,
                    expected_version,
                    expected_version + 1,
                )
                .into());
            }
            self.inner.commit(pipeline_id, expected_version, batch).await
        }

        async fn dispatch_candidates(&self) -> Result<Vec<DispatchCandidate>, ConveyorError> {
            self.inner.dispatch_candidates().await
        }

        async fn running_actions(&self) -> Result<Vec<RunningAction>, ConveyorError> {
            self.inner.running_actions().await
        }

        async fn unresolved_pipelines(&self) -> Result<Vec<PipelineId>, ConveyorError> {
            self.inner.unresolved_pipelines().await
        }
    }

    async fn conflicting(conflicts: u32) -> (Orchestrator, ActionId) {
        let store = Arc::new(ConflictingStore {
            inner: InMemoryInstanceStore::new(),
            conflicts: AtomicU32::new(conflicts),
        });
        let config = OrchestratorConfig::new()
            .with_commit_retry(crate::config::CommitRetryConfig::default().with_base_delay_ms(1));
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new())).with_config(config);
        let id = orchestrator.create_pipeline(pipeline()).await.unwrap();
        let first = action_named(&store.load(id).await.unwrap().tree, "first");
        (orchestrator, first)
    }

    #[tokio::test]
    async fn test_conflict_retried_within_limit() {
        let (orchestrator, first) = conflicting(2).await;
        let batch = orchestrator.set_status(first, Status::Success, false).await.unwrap();
        assert!(batch.action(first).is_some());
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_limit() {
        let (orchestrator, first) = conflicting(3).await;
        let err = orchestrator.set_status(first, Status::Success, false).await.unwrap_err();
        assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
    }

    #[tokio::test]
    async fn test_concurrent_completions_in_one_pipeline_serialize() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new())));
        let tree = TreeBuilder::new("wide")
            .stage(
                StageSpec::new("s").workflow(
                    (0..8).fold(WorkflowSpec::new("w"), |w, i| w.action(ActionSpec::new(format!("a{i}")).at(0, i))),
                ),
            )
            .build();
        let id = orchestrator.create_pipeline(tree).await.unwrap();
        let ids: Vec<ActionId> = store.load(id).await.unwrap().tree.actions().map(|a| a.id).collect();

        let tasks: Vec<_> = ids
            .into_iter()
            .map(|action| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.set_status(action, Status::Success, false).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let stored = store.load(id).await.unwrap();
        assert_eq!(stored.tree.pipeline().status, Status::Success);
        assert_eq!(stored.version, 9);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift() {
        let (orchestrator, store, tree) = setup().await;
        let mut batch = MutationBatch::new();
        for mut action in tree.actions().cloned() {
            action.status = Status::Success;
            batch.record(crate::hierarchy::InstanceChange::Action(action));
        }
        store.apply_unversioned(tree.id(), &batch).unwrap();

        assert_eq!(store.unresolved_pipelines().await.unwrap(), vec![tree.id()]);
        assert!(orchestrator.reconcile_pipeline(tree.id()).await.unwrap());
        assert!(!orchestrator.reconcile_pipeline(tree.id()).await.unwrap());
        assert!(store.unresolved_pipelines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_pipeline_releases_and_relaunches() {
        let (orchestrator, store, tree) = setup().await;
        let first = action_named(&tree, "first");
        let worker = WorkerId::new();
        orchestrator.registry().register(worker).unwrap();
        orchestrator.dispatch_action(first, worker).await.unwrap();

        let batch = orchestrator.reset_pipeline(tree.id()).await.unwrap();
        assert_eq!(batch.cleared_results().len(), 2);
        assert_eq!(orchestrator.registry().list_idle(), vec![worker]);
        let stored = store.load(tree.id()).await.unwrap().tree;
        assert_eq!(stored.action(first).unwrap().status, Status::Ready);
    }

    #[tokio::test]
    async fn test_readvanced_action_frees_its_old_worker() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()));
        let id = orchestrator
            .create_pipeline(crate::testing::linear_tree("readvance", &["a", "b"]))
            .await
            .unwrap();
        let tree = store.load(id).await.unwrap().tree;
        let (a, b) = (action_named(&tree, "a"), action_named(&tree, "b"));
        let (w1, w2) = (WorkerId::new(), WorkerId::new());
        orchestrator.registry().register(w1).unwrap();
        orchestrator.registry().register(w2).unwrap();

        orchestrator.dispatch_action(a, w1).await.unwrap();
        orchestrator.report_completion(CompletionReport::new(a, Status::Success)).await.unwrap();
        orchestrator.dispatch_action(b, w1).await.unwrap();

        assert!(orchestrator.reset_action(a, true, false).await.unwrap());
        orchestrator.dispatch_action(a, w2).await.unwrap();
        orchestrator.report_completion(CompletionReport::new(a, Status::Success)).await.unwrap();
        assert!(!orchestrator.registry().is_working_on(w1, b));
        assert_eq!(orchestrator.registry().list_idle().len(), 2);

        orchestrator.dispatch_action(b, w2).await.unwrap();
        orchestrator.report_completion(CompletionReport::new(b, Status::Success)).await.unwrap();
        assert_eq!(orchestrator.registry().list_idle().len(), 2);
        assert_eq!(store.load(id).await.unwrap().tree.pipeline().status, Status::Success);
    }

    #[tokio::test]
    async fn test_suppressed_success_keeps_worker_until_callback() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(WorkerRegistry::new()));
        let tree = TreeBuilder::new("callback")
            .stage(StageSpec::new("s").workflow(WorkflowSpec::new("w").action(ActionSpec::new("deploy").callback_required())))
            .build();
        let id = orchestrator.create_pipeline(tree).await.unwrap();
        let deploy = action_named(&store.load(id).await.unwrap().tree, "deploy");
        let worker = WorkerId::new();
        orchestrator.registry().register(worker).unwrap();
        orchestrator.dispatch_action(deploy, worker).await.unwrap();

        let batch = orchestrator
            .report_completion(CompletionReport::new(deploy, Status::Success))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(orchestrator.registry().is_working_on(worker, deploy));

        orchestrator
            .callback_completion(CompletionReport::new(deploy, Status::Success))
            .await
            .unwrap();
        assert_eq!(orchestrator.registry().list_idle(), vec![worker]);
    }

    #[tokio::test]
    async fn test_heartbeat_signal() {
        let (orchestrator, _, _) = setup().await;
        let worker = WorkerId::new();
        let signal = HeartbeatSignal {
            worker_id: worker,
            timestamp: now_utc(),
        };
        assert_eq!(orchestrator.heartbeat(&signal).unwrap_err().code(), "NOT_FOUND");
        orchestrator.registry().register(worker).unwrap();
        assert!(orchestrator.heartbeat(&signal).is_ok());
    }
}
