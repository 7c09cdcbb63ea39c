//! Worker transports for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{ActionId, WorkerId};
use crate::dispatch::WorkRequest;
use crate::errors::ConveyorError;
use crate::workers::WorkerTransport;

/// Accepts every request and remembers it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<(WorkerId, WorkRequest)>>,
}

impl RecordingTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every delivery in order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(WorkerId, WorkRequest)> {
        self.deliveries.lock().clone()
    }

    /// Returns the delivered action ids in order.
    #[must_use]
    pub fn delivered_actions(&self) -> Vec<ActionId> {
        self.deliveries.lock().iter().map(|(_, r)| r.action_id).collect()
    }

    /// Returns the number of deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Returns true if nothing was delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }
}

#[async_trait]
impl WorkerTransport for RecordingTransport {
    async fn deliver(&self, worker: WorkerId, request: &WorkRequest) -> Result<(), ConveyorError> {
        self.deliveries.lock().push((worker, request.clone()));
        Ok(())
    }
}

/// Rejects every request.
#[derive(Debug)]
pub struct FailingTransport {
    message: String,
    attempts: Mutex<usize>,
}

impl FailingTransport {
    /// Creates a transport failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: Mutex::new(0),
        }
    }

    /// Returns the number of rejected deliveries.
    #[must_use]
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl WorkerTransport for FailingTransport {
    async fn deliver(&self, worker: WorkerId, _request: &WorkRequest) -> Result<(), ConveyorError> {
        *self.attempts.lock() += 1;
        Err(ConveyorError::transport(worker, self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{find_action, linear_tree};

    #[tokio::test]
    async fn test_recording_transport() {
        let tree = linear_tree("p", &["only"]);
        let request = WorkRequest::for_action(&tree, find_action(&tree, "only").unwrap()).unwrap();
        let transport = RecordingTransport::new();
        let worker = WorkerId::new();

        transport.deliver(worker, &request).await.unwrap();
        assert_eq!(transport.len(), 1);
        assert_eq!(transport.deliveries()[0].0, worker);
        assert_eq!(transport.delivered_actions(), vec![request.action_id]);
    }

    #[tokio::test]
    async fn test_failing_transport() {
        let tree = linear_tree("p", &["only"]);
        let request = WorkRequest::for_action(&tree, find_action(&tree, "only").unwrap()).unwrap();
        let transport = FailingTransport::new("connection refused");

        let err = transport.deliver(WorkerId::new(), &request).await.unwrap_err();
        assert_eq!(err.code(), "TRANSPORT");
        assert_eq!(transport.attempts(), 1);
    }
}
