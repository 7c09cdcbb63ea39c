//! Outbound notifications for committed transitions.
//!
//! The orchestrator calls an [`EventNotifier`] after each committed
//! completion. [`TriggerNotifier`] matches the configured [`EventTrigger`]
//! rules and forwards the hits to an [`EventSink`]; delivering them anywhere
//! is left to the sink.

mod notifier;
mod sink;
mod trigger;

#[cfg(test)]
pub use notifier::MockEventNotifier;
pub use notifier::{EventNotifier, NoOpNotifier, TriggerNotifier};
pub use sink::{CollectingEventSink, EmittedEvent, EventSink, LoggingEventSink, NoOpEventSink};
pub use trigger::{CompiledTrigger, EventTrigger, TriggerScope};
