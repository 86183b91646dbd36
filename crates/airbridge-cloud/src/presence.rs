//! Online/offline announcements on the `presence` topic.
//!
//! The offline payload is registered as the link's last will so the broker
//! announces it when the bridge disappears without a clean shutdown.

use airbridge_types::Presence;

use crate::link::{CloudError, WillMessage};
use crate::topics::{OutboundTopic, TopicPrefix};

/// Version string reported in every presence payload.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn online() -> Presence {
    Presence {
        online: true,
        agent_version: AGENT_VERSION.to_string(),
    }
}

pub fn offline() -> Presence {
    Presence {
        online: false,
        agent_version: AGENT_VERSION.to_string(),
    }
}

fn presence_message(prefix: &TopicPrefix, presence: &Presence) -> Result<WillMessage, CloudError> {
    Ok(WillMessage {
        topic: prefix.outbound(OutboundTopic::Presence),
        payload: serde_json::to_string(presence)?,
        qos: OutboundTopic::Presence.qos(),
    })
}

/// Last will: the broker publishes `{"online": false}` if the link drops.
pub fn last_will(prefix: &TopicPrefix) -> Result<WillMessage, CloudError> {
    presence_message(prefix, &offline())
}

/// Published after every successful (re)connect.
pub fn birth(prefix: &TopicPrefix) -> Result<WillMessage, CloudError> {
    presence_message(prefix, &online())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn last_will_announces_offline_on_presence_topic() {
        let will = last_will(&TopicPrefix::new("t", "r")).unwrap();
        assert_eq!(will.topic, "t/r/presence");
        let body: Value = serde_json::from_str(&will.payload).unwrap();
        assert_eq!(body["online"], Value::Bool(false));
        assert_eq!(body["agent_version"], AGENT_VERSION);
    }

    #[test]
    fn birth_announces_online() {
        let birth = birth(&TopicPrefix::new("t", "r")).unwrap();
        let body: Value = serde_json::from_str(&birth.payload).unwrap();
        assert_eq!(body["online"], Value::Bool(true));
    }
}
