use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::NodeId;
use crate::event::{EventSink, LogEvent, TreeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Log history and live fan-out of one node.
///
/// `record` may be called from a blocking worker thread; both channel kinds
/// accept sends from any thread, so events reach async consumers without
/// going through the runtime.
pub struct NodeChannel {
    node: NodeId,
    logs: Mutex<Vec<LogEvent>>,
    subscribers: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<TreeEvent>)>>,
    tree_tx: broadcast::Sender<TreeEvent>,
}

impl fmt::Debug for NodeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeChannel")
            .field("node", &self.node)
            .field("logs", &self.logs.lock().len())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl NodeChannel {
    pub fn new(node: NodeId, logs: Vec<LogEvent>, tree_tx: broadcast::Sender<TreeEvent>) -> Self {
        Self {
            node,
            logs: Mutex::new(logs),
            subscribers: Mutex::new(Vec::new()),
            tree_tx,
        }
    }

    /// Append to the node's log, then fan out.
    pub fn record(&self, event: LogEvent) {
        self.logs.lock().push(event.clone());
        self.publish(event);
    }

    /// Fan out to node subscribers and the tree stream without logging.
    pub fn publish(&self, event: LogEvent) {
        let tagged = event.tag(self.node);

        self.subscribers
            .lock()
            .retain(|(_, tx)| tx.send(tagged.clone()).is_ok());

        // no receivers is fine
        let _ = self.tree_tx.send(tagged);
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.logs.lock().clone()
    }

    pub fn log_len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn subscribe(&self, id: SubscriptionId, tx: mpsc::UnboundedSender<TreeEvent>) {
        self.subscribers.lock().push((id, tx));
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Event sink for the node's simulator.
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let channel = Arc::clone(self);
        Arc::new(move |event: LogEvent| channel.record(event))
    }
}

/// Next event from a tree stream. A receiver that fell behind skips what it
/// missed and keeps going; `None` once every sender is gone.
pub async fn recv_tree_event(rx: &mut broadcast::Receiver<TreeEvent>) -> Option<TreeEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Tree subscriber lagged, skipped {} event(s)", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_logs_and_fans_out() {
        let (tree_tx, mut tree_rx) = broadcast::channel(16);
        let channel = Arc::new(NodeChannel::new(NodeId::new(3), Vec::new(), tree_tx));
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribe(SubscriptionId::new(1), tx);

        (channel.sink())(LogEvent::new("turn_start", json!({ "turn": 0 })));

        assert_eq!(channel.log_len(), 1);
        assert_eq!(rx.try_recv().unwrap().node, NodeId::new(3));
        assert_eq!(tree_rx.try_recv().unwrap().kind, "turn_start");
    }

    #[test]
    fn test_publish_does_not_log() {
        let (tree_tx, _) = broadcast::channel(16);
        let channel = NodeChannel::new(NodeId::new(1), Vec::new(), tree_tx);
        channel.publish(LogEvent::new("attached", json!({})));
        assert_eq!(channel.log_len(), 0);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (tree_tx, _) = broadcast::channel(16);
        let channel = NodeChannel::new(NodeId::new(1), Vec::new(), tree_tx);
        let (tx, rx) = mpsc::unbounded_channel();
        channel.subscribe(SubscriptionId::new(1), tx);
        drop(rx);

        channel.record(LogEvent::new("x", json!(null)));
        assert_eq!(channel.subscriber_count(), 0);
        assert!(!channel.unsubscribe(SubscriptionId::new(1)));
    }

    #[tokio::test]
    async fn test_lagging_tree_reader_keeps_receiving() {
        let (tree_tx, mut tree_rx) = broadcast::channel(2);
        let channel = NodeChannel::new(NodeId::new(1), Vec::new(), tree_tx);
        for turn in 0..5 {
            channel.publish(LogEvent::new("turn_start", json!({ "turn": turn })));
        }

        let event = recv_tree_event(&mut tree_rx).await.unwrap();
        assert_eq!(event.data["turn"], 3);
        assert_eq!(recv_tree_event(&mut tree_rx).await.unwrap().data["turn"], 4);

        drop(channel);
        assert!(recv_tree_event(&mut tree_rx).await.is_none());
    }
}
