//! In-process [`CloudLink`] that records traffic.
//!
//! Used by tests: publishes are kept in memory and announced on a broadcast
//! channel, inbound messages are injected by hand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::link::{CloudError, CloudLink, CloudMessage, QoS};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedFrame {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedFrame {
    /// The payload parsed as JSON, or `Value::Null` if it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

pub struct MemoryLink {
    published: Mutex<Vec<PublishedFrame>>,
    subscriptions: Mutex<Vec<String>>,
    inbound: mpsc::UnboundedSender<CloudMessage>,
    announce: broadcast::Sender<PublishedFrame>,
}

impl MemoryLink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CloudMessage>) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (announce, _) = broadcast::channel(256);
        let link = Arc::new(Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            inbound,
            announce,
        });
        (link, inbound_rx)
    }

    fn published_guard(&self) -> MutexGuard<'_, Vec<PublishedFrame>> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a message as if the broker had sent it.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), CloudError> {
        self.inbound
            .send(CloudMessage {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .map_err(|_| CloudError::Closed)
    }

    pub fn published(&self) -> Vec<PublishedFrame> {
        self.published_guard().clone()
    }

    /// JSON payloads published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        self.published_guard()
            .iter()
            .filter(|f| f.topic == topic)
            .map(PublishedFrame::json)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observe publishes as they happen.
    pub fn watch(&self) -> broadcast::Receiver<PublishedFrame> {
        self.announce.subscribe()
    }
}

#[async_trait]
impl CloudLink for MemoryLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), CloudError> {
        let frame = PublishedFrame {
            topic: topic.to_string(),
            payload,
            qos,
        };
        self.published_guard().push(frame.clone());
        // Nobody watching is fine.
        let _ = self.announce.send(frame);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), CloudError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_messages_arrive_on_the_inbound_channel() {
        let (link, mut inbound) = MemoryLink::new();
        link.inject("t/r/logs/config", br#"{"enabled":true}"#.to_vec()).unwrap();
        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.topic, "t/r/logs/config");
    }

    #[tokio::test]
    async fn publishes_are_recorded_and_announced() {
        let (link, _inbound) = MemoryLink::new();
        let mut watch = link.watch();
        link.publish("t/r/presence", b"{\"online\":true}".to_vec(), QoS::AtMostOnce)
            .await
            .unwrap();
        assert_eq!(watch.recv().await.unwrap().topic, "t/r/presence");
        assert_eq!(link.published_on("t/r/presence")[0]["online"], Value::Bool(true));
    }
}
