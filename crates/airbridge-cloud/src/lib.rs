//! `airbridge-cloud` – the cloud-broker side of the bridge.
//!
//! - [`topics`] – the per-robot topic vocabulary and its QoS table.
//! - [`link`] – the [`CloudLink`] collaborator trait.
//! - [`ws_link`] – a [`CloudLink`] over a WebSocket with reconnects.
//! - [`memory`] – an in-process [`CloudLink`] for tests.
//! - [`outbox`] – a queue decoupling producers from network writes.
//! - [`presence`] – online/offline announcements and the last will.

pub mod link;
pub mod memory;
pub mod outbox;
pub mod presence;
pub mod topics;
pub mod ws_link;

pub use link::{CloudError, CloudLink, CloudMessage, QoS, WillMessage};
pub use memory::MemoryLink;
pub use outbox::Outbox;
pub use topics::{InboundTopic, OutboundTopic, TopicPrefix};
pub use ws_link::{ConnectOptions, WsLink};
