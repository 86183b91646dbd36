//! The cloud broker collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = CloudError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(CloudError::Protocol(format!("unsupported qos level {other}"))),
        }
    }
}

/// A message received from the broker, addressed by its full topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A message the broker publishes on the client's behalf (last will) or the
/// client publishes after every (re)connect (birth).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WillMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
}

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("cloud connection failed: {0}")]
    Connect(String),

    #[error("cloud link is closed")]
    Closed,

    #[error("cloud protocol error: {0}")]
    Protocol(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pub/sub access to the cloud broker.
///
/// Inbound messages are delivered through the channel handed out when the
/// link is created, not through this trait.
#[async_trait]
pub trait CloudLink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), CloudError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), CloudError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_serializes_as_a_level() {
        assert_eq!(serde_json::to_string(&QoS::AtLeastOnce).unwrap(), "1");
        let qos: QoS = serde_json::from_str("0").unwrap();
        assert_eq!(qos, QoS::AtMostOnce);
        assert!(serde_json::from_str::<QoS>("2").is_err());
    }
}
