//! In-memory middleware backing the `airbridge` binary and the tests.
//!
//! Topics loop back: a publish is recorded and delivered to every local
//! subscriber of the same topic.  Services and action servers exist only once
//! registered, and reply through the handler or script they were given.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future;
use tracing::debug;
use uuid::Uuid;

use crate::client::{
    FeedbackCallback, GoalHandle, LogCallback, MiddlewareClient, MiddlewareLog, SampleCallback,
    SubscriptionHandle,
};
use crate::codec::{Primitive, TypedMessage, TypedValue};
use crate::error::MiddlewareError;

pub type ServiceHandler =
    Arc<dyn Fn(&TypedMessage) -> Result<TypedMessage, MiddlewareError> + Send + Sync>;

enum SimService {
    Reply(ServiceHandler),
    /// Accept the call and never answer.
    Hang,
}

/// Computes feedback and result for a goal.
pub type GoalHandler =
    Arc<dyn Fn(&TypedMessage) -> Result<(Vec<TypedMessage>, TypedMessage), MiddlewareError> + Send + Sync>;

/// How a simulated action server treats incoming goals.
#[derive(Clone)]
pub enum ActionScript {
    /// Refuse every goal.
    Reject,
    /// Accept, emit `feedback` in order, then succeed with `result`.
    Complete {
        feedback: Vec<TypedMessage>,
        result: TypedMessage,
    },
    /// Accept and derive feedback and result from the goal.
    Compute(GoalHandler),
    /// Accept and never finish.
    Hang,
}

struct SimSubscription {
    topic: String,
    callback: SampleCallback,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    subscriptions: HashMap<SubscriptionHandle, SimSubscription>,
    log_listeners: Vec<LogCallback>,
    published: Vec<(String, TypedMessage)>,
    services: HashMap<String, SimService>,
    actions: HashMap<String, ActionScript>,
    canceled: Vec<Uuid>,
}

#[derive(Default)]
pub struct SimMiddleware {
    state: Mutex<SimState>,
}

impl SimMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator with a few example interfaces already served:
    /// `/add_two_ints`, `/trigger` and the `/fibonacci` action.
    pub fn with_demo_interfaces() -> Self {
        let sim = Self::new();
        sim.add_service("/add_two_ints", |req| {
            let sum = int64(req, "a").checked_add(int64(req, "b")).ok_or_else(|| {
                MiddlewareError::ServiceFailed {
                    name: "/add_two_ints".into(),
                    reason: "integer overflow".into(),
                }
            })?;
            Ok(TypedMessage::new("example_interfaces/srv/AddTwoInts_Response")
                .with("sum", TypedValue::Primitive(Primitive::Int64(sum))))
        });
        sim.add_service("/trigger", |_| {
            Ok(TypedMessage::new("std_srvs/srv/Trigger_Response")
                .with("success", TypedValue::Primitive(Primitive::Bool(true)))
                .with("message", TypedValue::Primitive(Primitive::String("triggered".into()))))
        });
        sim.add_action(
            "/fibonacci",
            ActionScript::Compute(Arc::new(|goal: &TypedMessage| {
                let order = match goal.get("order") {
                    Some(TypedValue::Primitive(Primitive::Int32(n))) => (*n).clamp(0, 46) as usize,
                    _ => 0,
                };
                let mut sequence: Vec<i32> = vec![0, 1];
                let mut feedback = Vec::new();
                while sequence.len() <= order {
                    let next = sequence[sequence.len() - 1] + sequence[sequence.len() - 2];
                    sequence.push(next);
                    feedback.push(fibonacci("example_interfaces/action/Fibonacci_Feedback", &sequence));
                }
                let result = fibonacci("example_interfaces/action/Fibonacci_Result", &sequence);
                Ok((feedback, result))
            })),
        );
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_service<F>(&self, name: &str, handler: F)
    where
        F: Fn(&TypedMessage) -> Result<TypedMessage, MiddlewareError> + Send + Sync + 'static,
    {
        self.state()
            .services
            .insert(name.to_string(), SimService::Reply(Arc::new(handler)));
    }

    /// Serve `name` without ever answering a call.
    pub fn add_hanging_service(&self, name: &str) {
        self.state().services.insert(name.to_string(), SimService::Hang);
    }

    pub fn add_action(&self, name: &str, script: ActionScript) {
        self.state().actions.insert(name.to_string(), script);
    }

    /// Deliver `message` to every subscriber of `topic`.  Returns the number
    /// of callbacks invoked.
    pub fn emit(&self, topic: &str, message: &TypedMessage) -> usize {
        let callbacks: Vec<SampleCallback> = self
            .state()
            .subscriptions
            .values()
            .filter(|s| s.topic == topic)
            .map(|s| s.callback.clone())
            .collect();
        for callback in &callbacks {
            callback(message.clone());
        }
        callbacks.len()
    }

    pub fn emit_log(&self, log: MiddlewareLog) {
        let listeners = self.state().log_listeners.clone();
        for listener in listeners {
            listener(log.clone());
        }
    }

    pub fn published(&self) -> Vec<(String, TypedMessage)> {
        self.state().published.clone()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .state()
            .subscriptions
            .values()
            .map(|s| s.topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn canceled_goals(&self) -> Vec<Uuid> {
        self.state().canceled.clone()
    }
}

fn int64(msg: &TypedMessage, field: &str) -> i64 {
    match msg.get(field) {
        Some(TypedValue::Primitive(Primitive::Int64(n))) => *n,
        _ => 0,
    }
}

fn fibonacci(type_name: &str, sequence: &[i32]) -> TypedMessage {
    TypedMessage::new(type_name).with(
        "sequence",
        TypedValue::Sequence(
            sequence
                .iter()
                .map(|n| TypedValue::Primitive(Primitive::Int32(*n)))
                .collect(),
        ),
    )
}

#[async_trait]
impl MiddlewareClient for SimMiddleware {
    async fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
        callback: SampleCallback,
    ) -> Result<SubscriptionHandle, MiddlewareError> {
        let mut state = self.state();
        state.next_handle += 1;
        let handle = SubscriptionHandle(state.next_handle);
        state.subscriptions.insert(
            handle,
            SimSubscription {
                topic: topic.to_string(),
                callback,
            },
        );
        debug!(topic, type_name, handle = handle.0, "sim subscribe");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), MiddlewareError> {
        self.state()
            .subscriptions
            .remove(&handle)
            .map(|_| ())
            .ok_or(MiddlewareError::UnknownSubscription(handle.0))
    }

    async fn publish(
        &self,
        topic: &str,
        type_name: &str,
        message: TypedMessage,
    ) -> Result<(), MiddlewareError> {
        debug!(topic, type_name, "sim publish");
        self.state().published.push((topic.to_string(), message.clone()));
        self.emit(topic, &message);
        Ok(())
    }

    fn service_is_ready(&self, name: &str, _type_name: &str) -> bool {
        self.state().services.contains_key(name)
    }

    async fn call_service(
        &self,
        name: &str,
        _type_name: &str,
        request: TypedMessage,
    ) -> Result<TypedMessage, MiddlewareError> {
        let handler = match self.state().services.get(name) {
            Some(SimService::Reply(handler)) => Some(handler.clone()),
            Some(SimService::Hang) => None,
            None => {
                return Err(MiddlewareError::ServiceFailed {
                    name: name.to_string(),
                    reason: "no such service".into(),
                });
            }
        };
        match handler {
            Some(handler) => handler(&request),
            None => future::pending().await,
        }
    }

    fn action_server_is_ready(&self, name: &str, _type_name: &str) -> bool {
        self.state().actions.contains_key(name)
    }

    async fn send_goal(
        &self,
        name: &str,
        _type_name: &str,
        goal: TypedMessage,
        feedback: FeedbackCallback,
    ) -> Result<GoalHandle, MiddlewareError> {
        let script = self
            .state()
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| MiddlewareError::Transport(format!("no action server for {name}")))?;
        let goal_id = Uuid::new_v4();

        let (accepted, result) = match script {
            ActionScript::Reject => (
                false,
                future::ready(Err(MiddlewareError::GoalAborted(goal_id))).boxed(),
            ),
            ActionScript::Complete {
                feedback: steps,
                result,
            } => {
                steps.into_iter().for_each(|step| feedback(step));
                (true, future::ready(Ok(result)).boxed())
            }
            ActionScript::Compute(handler) => match handler(&goal) {
                Ok((steps, result)) => {
                    steps.into_iter().for_each(|step| feedback(step));
                    (true, future::ready(Ok(result)).boxed())
                }
                Err(e) => (true, future::ready(Err(e)).boxed()),
            },
            ActionScript::Hang => (true, future::pending().boxed()),
        };

        Ok(GoalHandle {
            goal_id,
            accepted,
            result,
        })
    }

    async fn cancel_goal(&self, name: &str, goal_id: Uuid) -> Result<(), MiddlewareError> {
        debug!(action = name, goal = %goal_id, "sim cancel");
        self.state().canceled.push(goal_id);
        Ok(())
    }

    fn on_log(&self, callback: LogCallback) {
        self.state().log_listeners.push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn string_msg(data: &str) -> TypedMessage {
        TypedMessage::new("std_msgs/msg/String")
            .with("data", TypedValue::Primitive(Primitive::String(data.into())))
    }

    #[tokio::test]
    async fn publish_loops_back_to_subscribers() {
        let sim = SimMiddleware::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        sim.subscribe(
            "/chatter",
            "std_msgs/msg/String",
            Arc::new(move |_: TypedMessage| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        sim.publish("/chatter", "std_msgs/msg/String", string_msg("hi"))
            .await
            .unwrap();
        sim.publish("/other", "std_msgs/msg/String", string_msg("ignored"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sim.published().len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_handle_fails() {
        let sim = SimMiddleware::new();
        let err = sim.unsubscribe(SubscriptionHandle(99)).await.unwrap_err();
        assert_eq!(err, MiddlewareError::UnknownSubscription(99));
    }

    #[tokio::test]
    async fn demo_fibonacci_streams_feedback() {
        let sim = SimMiddleware::with_demo_interfaces();
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = steps.clone();
        let goal = TypedMessage::new("example_interfaces/action/Fibonacci_Goal")
            .with("order", TypedValue::Primitive(Primitive::Int32(5)));

        let handle = sim
            .send_goal(
                "/fibonacci",
                "example_interfaces/action/Fibonacci",
                goal,
                Arc::new(move |_: TypedMessage| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        assert!(handle.accepted);

        let result = handle.result.await.unwrap();
        let Some(TypedValue::Sequence(seq)) = result.get("sequence") else {
            panic!("missing sequence");
        };
        assert_eq!(seq.len(), 6);
        assert_eq!(seq[5], TypedValue::Primitive(Primitive::Int32(5)));
        assert_eq!(steps.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn demo_services_are_ready() {
        let sim = SimMiddleware::with_demo_interfaces();
        assert!(sim.service_is_ready("/add_two_ints", "example_interfaces/srv/AddTwoInts"));
        assert!(!sim.service_is_ready("/missing", "std_srvs/srv/Trigger"));

        let req = TypedMessage::new("example_interfaces/srv/AddTwoInts_Request")
            .with("a", TypedValue::Primitive(Primitive::Int64(20)))
            .with("b", TypedValue::Primitive(Primitive::Int64(22)));
        let reply = sim
            .call_service("/add_two_ints", "example_interfaces/srv/AddTwoInts", req)
            .await
            .unwrap();
        assert_eq!(reply.get("sum"), Some(&TypedValue::Primitive(Primitive::Int64(42))));
    }

    #[tokio::test]
    async fn demo_addition_overflow_is_a_service_failure() {
        let sim = SimMiddleware::with_demo_interfaces();
        let req = TypedMessage::new("example_interfaces/srv/AddTwoInts_Request")
            .with("a", TypedValue::Primitive(Primitive::Int64(i64::MAX)))
            .with("b", TypedValue::Primitive(Primitive::Int64(1)));
        let err = sim
            .call_service("/add_two_ints", "example_interfaces/srv/AddTwoInts", req)
            .await
            .unwrap_err();
        assert!(matches!(err, MiddlewareError::ServiceFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_service_never_answers() {
        let sim = SimMiddleware::new();
        sim.add_hanging_service("/stuck");
        assert!(sim.service_is_ready("/stuck", "std_srvs/srv/Trigger"));
        let call = sim.call_service("/stuck", "std_srvs/srv/Trigger", TypedMessage::new("std_srvs/srv/Trigger_Request"));
        assert!(tokio::time::timeout(std::time::Duration::from_secs(60), call).await.is_err());
    }

    #[test]
    fn log_listeners_receive_records() {
        let sim = SimMiddleware::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        sim.on_log(Arc::new(move |log: MiddlewareLog| {
            assert_eq!(log.level, 30);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        sim.emit_log(MiddlewareLog {
            stamp_sec: 0,
            stamp_nanosec: 0,
            level: 30,
            name: "planner".into(),
            msg: "slow".into(),
            file: "planner.cpp".into(),
            function: "plan".into(),
            line: 10,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
