//! Logging setup, tick metrics and timing.

mod logging;
mod metrics;
mod timer;

pub use logging::init_tracing;
pub use metrics::TickMetrics;
pub use timer::SpanTimer;
