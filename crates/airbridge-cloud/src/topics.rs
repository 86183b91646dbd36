//! Cloud topic vocabulary.
//!
//! Every robot owns the topic subtree `{tenant_uuid}/{robot_id}/`.  The
//! bridge subscribes to the [`InboundTopic`]s below it and publishes on the
//! [`OutboundTopic`]s.
//!
//! | Short topic | Direction | QoS |
//! |---|---|---|
//! | `commands/send` | in | 0 |
//! | `containers/config` | in | 0 |
//! | `logs/config` | in | 0 |
//! | `data/config` | in | 0 |
//! | `vitals/config` | in | 0 |
//! | `presence` | out | 0 |
//! | `commands/confirm` | out | 0 |
//! | `containers/confirm` | out | 0 |
//! | `logs/ingest` | out | 1 |
//! | `vitals/ingest` | out | 0 |
//! | `data/ingest` | out | 1 |

use std::fmt;

use crate::link::QoS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundTopic {
    CommandsSend,
    ContainersConfig,
    LogsConfig,
    DataConfig,
    VitalsConfig,
}

impl InboundTopic {
    pub const ALL: [InboundTopic; 5] = [
        InboundTopic::CommandsSend,
        InboundTopic::ContainersConfig,
        InboundTopic::LogsConfig,
        InboundTopic::DataConfig,
        InboundTopic::VitalsConfig,
    ];

    pub fn short(&self) -> &'static str {
        match self {
            InboundTopic::CommandsSend => "commands/send",
            InboundTopic::ContainersConfig => "containers/config",
            InboundTopic::LogsConfig => "logs/config",
            InboundTopic::DataConfig => "data/config",
            InboundTopic::VitalsConfig => "vitals/config",
        }
    }

    pub fn from_short(short: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.short() == short)
    }
}

impl fmt::Display for InboundTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundTopic {
    Presence,
    CommandsConfirm,
    ContainersConfirm,
    LogsIngest,
    VitalsIngest,
    DataIngest,
}

impl OutboundTopic {
    pub fn short(&self) -> &'static str {
        match self {
            OutboundTopic::Presence => "presence",
            OutboundTopic::CommandsConfirm => "commands/confirm",
            OutboundTopic::ContainersConfirm => "containers/confirm",
            OutboundTopic::LogsIngest => "logs/ingest",
            OutboundTopic::VitalsIngest => "vitals/ingest",
            OutboundTopic::DataIngest => "data/ingest",
        }
    }

    /// Delivery guarantee used when publishing on this topic.
    pub fn qos(&self) -> QoS {
        match self {
            OutboundTopic::LogsIngest | OutboundTopic::DataIngest => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }
}

impl fmt::Display for OutboundTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// The `{tenant_uuid}/{robot_id}` prefix of one robot's topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPrefix {
    tenant_uuid: String,
    robot_id: String,
}

impl TopicPrefix {
    pub fn new(tenant_uuid: impl Into<String>, robot_id: impl Into<String>) -> Self {
        Self {
            tenant_uuid: tenant_uuid.into(),
            robot_id: robot_id.into(),
        }
    }

    /// Client identity used when opening the link: `{tenant}-{robot}`.
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.tenant_uuid, self.robot_id)
    }

    pub fn full(&self, short: &str) -> String {
        format!("{}/{}/{}", self.tenant_uuid, self.robot_id, short)
    }

    pub fn inbound(&self, topic: InboundTopic) -> String {
        self.full(topic.short())
    }

    pub fn outbound(&self, topic: OutboundTopic) -> String {
        self.full(topic.short())
    }

    /// Strip the first two segments from a full topic.
    ///
    /// Returns `None` when `topic` has fewer than three segments.
    pub fn strip<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let mut parts = topic.splitn(3, '/');
        parts.next()?;
        parts.next()?;
        parts.next()
    }
}
