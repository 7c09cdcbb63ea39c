//! Outbound event sinks.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn, Level};

/// Receives named events fired by the notifier.
///
/// Delivery (webhooks, chat, mail) belongs to the implementor.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - Dotted event name, e.g. `trigger.on-failure`
    /// * `data` - Optional JSON payload
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits without awaiting. Must never fail; problems are only logged.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Writes events to the tracing log.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if self.level == Level::DEBUG || self.level == Level::TRACE {
            debug!(event_type = %event_type, event_data = ?data, "Event fired");
        } else if self.level == Level::WARN || self.level == Level::ERROR {
            warn!(event_type = %event_type, event_data = ?data, "Event fired");
        } else {
            info!(event_type = %event_type, event_data = ?data, "Event fired");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// One event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedEvent {
    /// Event name.
    pub event_type: String,
    /// Payload, if any.
    pub data: Option<serde_json::Value>,
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<EmittedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every collected event.
    #[must_use]
    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event names, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<EmittedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops every collected event.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn push(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push(EmittedEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(event_type, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("trigger.any", None).await;
        let sink = LoggingEventSink::debug();
        sink.emit("trigger.any", Some(serde_json::json!({"status": "FAILED"}))).await;
        sink.try_emit("trigger.any", None);
    }

    #[test]
    fn test_collecting_sink_orders_events() {
        let sink = CollectingEventSink::new();
        tokio_test::block_on(sink.emit("trigger.first", None));
        sink.try_emit("trigger.second", Some(serde_json::json!({"n": 2})));
        sink.try_emit("other.third", None);

        assert_eq!(sink.event_types(), vec!["trigger.first", "trigger.second", "other.third"]);
        assert_eq!(sink.events_of_type("trigger.").len(), 2);
        assert_eq!(sink.events()[1].data, Some(serde_json::json!({"n": 2})));

        sink.clear();
        assert!(sink.is_empty());
    }
}
