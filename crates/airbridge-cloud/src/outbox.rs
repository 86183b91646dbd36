//! Non-blocking outbound publishing.
//!
//! Producers (command handling, middleware callbacks, the vitals sampler)
//! serialize their payload and enqueue it; a single writer task drains the
//! queue into the [`CloudLink`].  Enqueueing never waits on network I/O.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::link::{CloudError, CloudLink};
use crate::topics::{OutboundTopic, TopicPrefix};

struct Frame {
    topic: OutboundTopic,
    payload: Vec<u8>,
}

/// Cheaply cloneable handle to the outbound queue.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Start the writer task.
    ///
    /// The task ends once every `Outbox` clone has been dropped and the queue
    /// is drained; await the returned handle to flush on shutdown.
    pub fn spawn(link: Arc<dyn CloudLink>, prefix: TopicPrefix) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let topic = prefix.outbound(frame.topic);
                match link.publish(&topic, frame.payload, frame.topic.qos()).await {
                    Ok(()) => debug!(topic = %frame.topic, "published message"),
                    Err(e) => warn!(topic = %frame.topic, error = %e, "publish failed"),
                }
            }
        });
        (Self { tx }, writer)
    }

    /// Serialize `payload` as JSON and queue it for `topic`.
    pub fn send<T: Serialize>(&self, topic: OutboundTopic, payload: &T) -> Result<(), CloudError> {
        let payload = serde_json::to_vec(payload)?;
        self.tx
            .send(Frame { topic, payload })
            .map_err(|_| CloudError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::QoS;
    use crate::memory::MemoryLink;
    use serde_json::json;

    #[tokio::test]
    async fn frames_reach_the_link_in_order() {
        let (link, _inbound) = MemoryLink::new();
        let (outbox, writer) = Outbox::spawn(link.clone(), TopicPrefix::new("t", "r"));

        outbox.send(OutboundTopic::DataIngest, &json!({"n": 1})).unwrap();
        outbox.send(OutboundTopic::CommandsConfirm, &json!({"n": 2})).unwrap();
        drop(outbox);
        writer.await.unwrap();

        let published = link.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "t/r/data/ingest");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert_eq!(published[1].topic, "t/r/commands/confirm");
        assert_eq!(published[1].json(), json!({"n": 2}));
    }

    #[tokio::test]
    async fn send_after_writer_exit_reports_closed() {
        let (link, _inbound) = MemoryLink::new();
        let (outbox, writer) = Outbox::spawn(link, TopicPrefix::new("t", "r"));
        writer.abort();
        let _ = writer.await;
        assert!(matches!(
            outbox.send(OutboundTopic::Presence, &json!({})),
            Err(CloudError::Closed)
        ));
    }
}
