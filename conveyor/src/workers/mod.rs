//! Worker liveness bookkeeping and delivery of work to workers.

mod registry;
mod transport;

pub use registry::{PrunedWorker, RegistryState, WorkerRecord, WorkerRegistry};
pub use transport::WorkerTransport;
