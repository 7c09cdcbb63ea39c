//! Delivery of work requests to workers.

use async_trait::async_trait;

use crate::core::WorkerId;
use crate::dispatch::WorkRequest;
use crate::errors::ConveyorError;

/// Hands a work request to a worker process.
///
/// Transport and encoding belong to the implementor. A returned error means
/// the worker never received the request; the dispatch queue then rewinds
/// the action so it is offered again.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Delivers one request.
    async fn deliver(&self, worker: WorkerId, request: &WorkRequest) -> Result<(), ConveyorError>;
}
