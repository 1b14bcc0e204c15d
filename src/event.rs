use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::tree::NodeId;

/// Something that happened in the world and gets rendered into agent memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Private message between two agents.
    Message { sender: String, content: String },
    /// Announcement with no speaker, seen by everyone.
    Public { content: String },
    /// Environment status for a single agent.
    Status { content: String },
    /// Public speech by an agent.
    Speak { sender: String, content: String },
}

impl Event {
    pub fn message(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message { sender: sender.into(), content: content.into() }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self::Public { content: content.into() }
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::Status { content: content.into() }
    }

    pub fn speak(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Speak { sender: sender.into(), content: content.into() }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Message { sender, .. } | Self::Speak { sender, .. } => Some(sender),
            Self::Public { .. } | Self::Status { .. } => None,
        }
    }

    pub fn to_string(&self, time: Option<u64>) -> String {
        let body = match self {
            Self::Message { sender, content } => format!("[Private] {}: {}", sender, content),
            Self::Public { content } => format!("[Public] {}", content),
            Self::Status { content } => format!("[Status] {}", content),
            Self::Speak { sender, content } => format!("{} said: {}", sender, content),
        };

        match time {
            Some(t) => format!("[T{}] {}", t, body),
            None => body,
        }
    }
}

/// A structured record emitted by a simulator: `{type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl LogEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data }
    }

    pub fn tag(self, node: NodeId) -> TreeEvent {
        TreeEvent { kind: self.kind, data: self.data, node }
    }
}

/// A log record tagged with the tree node it came from, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub node: NodeId,
}

/// Callback receiving every immediate log event of a simulator.
/// Called from whichever thread is running the simulation.
pub type EventSink = Arc<dyn Fn(LogEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_formatting_with_time() {
        let event = Event::speak("Alice", "hello");
        assert_eq!(event.to_string(Some(3)), "[T3] Alice said: hello");
        assert_eq!(event.to_string(None), "Alice said: hello");
    }

    #[test]
    fn test_event_sender() {
        assert_eq!(Event::message("Bob", "psst").sender(), Some("Bob"));
        assert_eq!(Event::public("dawn").sender(), None);
        assert_eq!(Event::status("hungry").sender(), None);
    }

    #[test]
    fn test_tree_event_shape() {
        let event = LogEvent::new("run_start", json!({"turns": 2})).tag(NodeId::new(7));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "run_start", "data": {"turns": 2}, "node": 7}));
    }
}
