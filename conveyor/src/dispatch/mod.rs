//! Work dispatch: the tick that assigns, watches and repairs, the
//! background loop driving it, and the payloads exchanged with workers.

mod queue;
mod request;
mod runner;

pub use queue::{Assignment, DispatchQueue, StaleAction, TickReport};
pub use request::{CompletionReport, HeartbeatSignal, WorkRequest, WORK_REQUEST_VERSION};
pub use runner::{DispatchHandle, DispatchLoop};
