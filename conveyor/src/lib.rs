//! # Conveyor
//!
//! The orchestration core of a CI/CD system.
//!
//! Conveyor tracks pipeline runs as a four-level execution tree and drives
//! them to completion:
//!
//! - **Execution tree**: Pipeline → Stage → Workflow → Action instances,
//!   sequenced by `(order, slice)` at every level
//! - **Status aggregation**: a worst-of status model rolled up from the
//!   leaf actions as they complete
//! - **Resets**: partial, full and whole-pipeline rewinds for recovery
//! - **Dispatch**: a periodic loop that hands ready actions to idle
//!   workers, flags abandoned work and repairs interrupted commits
//! - **Notifications**: trigger rules evaluated after every committed
//!   completion
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conveyor::prelude::*;
//! use std::sync::Arc;
//!
//! let tree = TreeBuilder::new("nightly")
//!     .stage(StageSpec::new("build").workflow(
//!         WorkflowSpec::new("compile")
//!             .action(ActionSpec::new("linux").at(0, 0))
//!             .action(ActionSpec::new("macos").at(0, 1))
//!             .action(ActionSpec::new("package").at(1, 0)),
//!     ))
//!     .build();
//!
//! let store = Arc::new(InMemoryInstanceStore::new());
//! let registry = Arc::new(WorkerRegistry::new());
//! let orchestrator = Arc::new(Orchestrator::new(store, registry));
//! orchestrator.create_pipeline(tree).await?;
//!
//! let queue = Arc::new(DispatchQueue::new(orchestrator, transport));
//! let handle = DispatchLoop::spawn(queue);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod events;
pub mod hierarchy;
pub mod observability;
pub mod orchestrator;
pub mod results;
pub mod retry;
pub mod store;
pub mod testing;
pub mod utils;
pub mod workers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CommitRetryConfig, OrchestratorConfig};
    pub use crate::core::{
        aggregate, worse_of, ActionId, EnvParams, PipelineId, StageId, Status, WorkerId,
        WorkflowId,
    };
    pub use crate::dispatch::{
        CompletionReport, DispatchHandle, DispatchLoop, DispatchQueue, HeartbeatSignal,
        TickReport, WorkRequest,
    };
    pub use crate::engine::{
        complete_action, reset_action, reset_pipeline, CompletionRequest, CompletionSource,
        MutationBatch,
    };
    pub use crate::errors::{
        ConcurrentModificationError, ConveyorError, InvalidTransitionError, NotFoundError,
        WorkerUnavailableError,
    };
    pub use crate::events::{
        EventNotifier, EventSink, EventTrigger, LoggingEventSink, NoOpEventSink, TriggerNotifier,
        TriggerScope,
    };
    pub use crate::hierarchy::{
        ActionInstance, ActionSpec, PipelineInstance, PipelineTree, StageSpec, TreeBuilder,
        WorkflowSpec,
    };
    pub use crate::orchestrator::Orchestrator;
    pub use crate::results::{InMemoryResultSink, ResultSink};
    pub use crate::store::{InMemoryInstanceStore, InstanceStore};
    pub use crate::utils::{iso_timestamp, now_utc, Timestamp};
    pub use crate::workers::{WorkerRegistry, WorkerTransport};
}
