//! `airbridge-middleware` – the robot-middleware side of the bridge.
//!
//! - [`registry`] – runtime type resolution from `pkg/kind/Name` strings.
//! - [`codec`] – JSON ⇄ typed message conversion driven by descriptors.
//! - [`invocation`] – tracking of outstanding service calls and action goals.
//! - [`throttle`] – per-source rate limiting for outbound data.
//! - [`dispatcher`] – routing of inbound commands and data configuration.
//! - [`client`] – the [`MiddlewareClient`] collaborator trait.
//! - [`sim`] – the in-memory middleware behind the binary and the tests.

pub mod catalog;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod idl;
pub mod invocation;
pub mod registry;
pub mod schema;
pub mod sim;
pub mod throttle;

pub use client::{MiddlewareClient, MiddlewareLog, SubscriptionHandle};
pub use codec::{MessageCodec, TypedMessage, TypedValue};
pub use dispatcher::{CommandDispatcher, SampleEvent};
pub use error::{CodecError, IdlError, MiddlewareError};
pub use invocation::{InvocationOutcome, InvocationState, InvocationTracker};
pub use registry::{TypeRegistry, TypeResolver};
pub use sim::SimMiddleware;
pub use throttle::DataStreamThrottle;
