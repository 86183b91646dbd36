//! The robot middleware collaborator.
//!
//! The bridge never talks to a concrete middleware directly; it drives a
//! [`MiddlewareClient`] so the node runtime (or the in-memory
//! [`SimMiddleware`][crate::sim::SimMiddleware]) can be swapped freely.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::codec::TypedMessage;
use crate::error::MiddlewareError;

/// Called for every sample delivered on a subscribed topic.
pub type SampleCallback = Arc<dyn Fn(TypedMessage) + Send + Sync>;

/// Called for every feedback message of an in-flight goal.
pub type FeedbackCallback = Arc<dyn Fn(TypedMessage) + Send + Sync>;

/// Called for every record on the middleware's log stream.
pub type LogCallback = Arc<dyn Fn(MiddlewareLog) + Send + Sync>;

/// Opaque handle returned by [`MiddlewareClient::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// One record from the middleware log stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareLog {
    pub stamp_sec: i64,
    pub stamp_nanosec: u32,
    /// Numeric severity: 10 debug, 20 info, 30 warn, 40 error, 50 fatal.
    pub level: u8,
    pub name: String,
    pub msg: String,
    pub file: String,
    pub function: String,
    pub line: u32,
}

/// Result of submitting a goal.
///
/// `result` resolves once the action server finishes the goal.  It is only
/// meaningful when `accepted` is true.
pub struct GoalHandle {
    pub goal_id: Uuid,
    pub accepted: bool,
    pub result: BoxFuture<'static, Result<TypedMessage, MiddlewareError>>,
}

impl std::fmt::Debug for GoalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalHandle")
            .field("goal_id", &self.goal_id)
            .field("accepted", &self.accepted)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MiddlewareClient: Send + Sync {
    /// Subscribe to `topic`; `callback` fires for every incoming sample.
    async fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
        callback: SampleCallback,
    ) -> Result<SubscriptionHandle, MiddlewareError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), MiddlewareError>;

    /// Publish one message.  Fire-and-forget once it returns.
    async fn publish(
        &self,
        topic: &str,
        type_name: &str,
        message: TypedMessage,
    ) -> Result<(), MiddlewareError>;

    /// Whether a server for `name` is reachable right now.
    fn service_is_ready(&self, name: &str, type_name: &str) -> bool;

    async fn call_service(
        &self,
        name: &str,
        type_name: &str,
        request: TypedMessage,
    ) -> Result<TypedMessage, MiddlewareError>;

    fn action_server_is_ready(&self, name: &str, type_name: &str) -> bool;

    async fn send_goal(
        &self,
        name: &str,
        type_name: &str,
        goal: TypedMessage,
        feedback: FeedbackCallback,
    ) -> Result<GoalHandle, MiddlewareError>;

    async fn cancel_goal(&self, name: &str, goal_id: Uuid) -> Result<(), MiddlewareError>;

    /// Register a listener on the middleware log stream.
    fn on_log(&self, callback: LogCallback);
}
