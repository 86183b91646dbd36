//! Routing of inbound cloud commands and data-stream configuration.
//!
//! [`CommandDispatcher::dispatch`] turns one `commands/send` payload into
//! exactly one [`CommandResult`].  Every resolution, conversion and
//! readiness failure is folded into an error code here and never escapes.
//!
//! Data streams are configured through [`CommandDispatcher::configure_data`].
//! Middleware callbacks only enqueue [`SampleEvent`]s on a bounded queue,
//! dropping samples while it is full; throttling and encoding happen in
//! [`CommandDispatcher::on_sample`] on the consumer side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use airbridge_types::{
    BridgeError, CommandRequest, CommandResult, DataEnvelope, DataStreamSpec, ErrorCode,
    Interface,
};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::client::{MiddlewareClient, SampleCallback};
use crate::codec::{MessageCodec, TypedMessage};
use crate::invocation::InvocationTracker;
use crate::registry::TypeResolver;
use crate::throttle::{DataStreamThrottle, DataSubscription, period_for};

/// Raw samples waiting for [`CommandDispatcher::on_sample`].
pub const SAMPLE_QUEUE_CAPACITY: usize = 256;

/// A raw sample handed over by a middleware subscription callback.
#[derive(Debug, Clone)]
pub struct SampleEvent {
    pub source: String,
    pub stream_id: u64,
    pub message: TypedMessage,
    pub received_at: Instant,
}

pub struct CommandDispatcher {
    codec: MessageCodec,
    middleware: Arc<dyn MiddlewareClient>,
    tracker: InvocationTracker,
    streams: Mutex<DataStreamThrottle>,
    next_stream_id: AtomicU64,
    samples: mpsc::Sender<SampleEvent>,
}

impl CommandDispatcher {
    /// Build a dispatcher together with the receiving end of its sample
    /// queue.  The caller drains the receiver and feeds each event to
    /// [`CommandDispatcher::on_sample`].
    pub fn new(
        resolver: Arc<dyn TypeResolver>,
        middleware: Arc<dyn MiddlewareClient>,
        invocation_timeout: Duration,
    ) -> (Self, mpsc::Receiver<SampleEvent>) {
        let codec = MessageCodec::new(resolver);
        let tracker = InvocationTracker::new(codec.clone(), middleware.clone(), invocation_timeout);
        let (samples, samples_rx) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
        let dispatcher = Self {
            codec,
            middleware,
            tracker,
            streams: Mutex::new(DataStreamThrottle::new()),
            next_stream_id: AtomicU64::new(1),
            samples,
        };
        (dispatcher, samples_rx)
    }

    pub fn tracker(&self) -> &InvocationTracker {
        &self.tracker
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Validate and route one command.
    ///
    /// A value that does not have the command shape yields `unknown_error`
    /// with whatever `uuid` could be salvaged from it.
    pub async fn dispatch(&self, raw: &Value) -> CommandResult {
        match CommandRequest::from_value(raw) {
            Ok(request) => self.dispatch_request(&request).await,
            Err(e) => {
                let uuid = raw.get("uuid").and_then(Value::as_str).unwrap_or_default();
                warn!(command = %uuid, error = %e, "rejected malformed command");
                CommandResult::failed(uuid, ErrorCode::UnknownError)
            }
        }
    }

    #[instrument(
        skip_all,
        fields(command = %request.uuid, interface = %request.interface, name = %request.name)
    )]
    pub async fn dispatch_request(&self, request: &CommandRequest) -> CommandResult {
        debug!("dispatching command");
        let outcome = match request.interface {
            Interface::Topic => self.publish_topic(request).await,
            Interface::Service => self
                .tracker
                .submit_service(&request.uuid, &request.name, &request.type_name, &request.payload)
                .await
                .map(|_| ()),
            Interface::ActionSendGoal => self
                .tracker
                .submit_action(&request.uuid, &request.name, &request.type_name, &request.payload)
                .await
                .map(|_| ()),
            Interface::ActionCancelGoal => self.cancel_goal(request).await,
        };

        if let Err(e) = &outcome {
            let code = e.error_code();
            if code == ErrorCode::UnknownError {
                error!(command = %request.uuid, name = %request.name, error = %e, "command failed");
            } else {
                warn!(command = %request.uuid, name = %request.name, code = %code, error = %e, "command failed");
            }
        }
        CommandResult::from_outcome(&request.uuid, outcome)
    }

    async fn publish_topic(&self, request: &CommandRequest) -> Result<(), BridgeError> {
        let descriptor = self.codec.resolver().resolve(&request.type_name)?;
        let message = self.codec.decode_object(&descriptor, &request.payload)?;
        self.middleware
            .publish(&request.name, &request.type_name, message)
            .await?;
        info!(topic = %request.name, "published to middleware topic");
        Ok(())
    }

    async fn cancel_goal(&self, request: &CommandRequest) -> Result<(), BridgeError> {
        let goal_uuid = request
            .payload
            .get("goal_uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidPayload("`goal_uuid` must be a string".into()))?;
        self.tracker.cancel(&request.name, goal_uuid).await
    }

    // ── Data streams ────────────────────────────────────────────────────────

    /// Replace the whole set of data streams with the one described by `raw`.
    ///
    /// The new list is validated before anything is torn down, so an invalid
    /// message leaves the current streams untouched.  Entries whose rate is
    /// not a positive number or whose type cannot be resolved are skipped.
    /// Returns the number of streams now active.
    pub async fn configure_data(&self, raw: &Value) -> Result<usize, BridgeError> {
        let specs: Vec<DataStreamSpec> = serde_json::from_value(raw.clone())
            .map_err(|e| BridgeError::InvalidPayload(format!("data config: {e}")))?;

        let mut streams = self.streams.lock().await;

        for old in streams.drain() {
            self.release(&old).await;
        }

        for spec in specs {
            let Some(period) = period_for(spec.hz) else {
                warn!(source = %spec.source, hz = spec.hz, "skipping data stream with invalid rate");
                continue;
            };
            if let Err(e) = self.codec.resolver().resolve(&spec.type_name) {
                error!(source = %spec.source, error = %e, "skipping data stream with unknown type");
                continue;
            }

            let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
            let callback = self.sample_callback(&spec.source, stream_id);
            let handle = match self
                .middleware
                .subscribe(&spec.source, &spec.type_name, callback)
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    error!(source = %spec.source, error = %e, "topic subscription failed");
                    continue;
                }
            };

            let displaced = streams.insert(DataSubscription {
                source: spec.source.clone(),
                message_type: spec.type_name,
                rate_hz: spec.hz,
                period,
                stream_id,
                handle: Some(handle),
                last_sent: None,
            });
            if let Some(old) = displaced {
                warn!(source = %spec.source, "duplicate data source, keeping the last entry");
                self.release(&old).await;
            }
        }

        info!(streams = streams.len(), "data streams configured");
        Ok(streams.len())
    }

    async fn release(&self, stream: &DataSubscription) {
        if let Some(handle) = stream.handle {
            if let Err(e) = self.middleware.unsubscribe(handle).await {
                warn!(source = %stream.source, error = %e, "unsubscribe failed");
            }
        }
    }

    fn sample_callback(&self, source: &str, stream_id: u64) -> SampleCallback {
        let tx = self.samples.clone();
        let source = source.to_string();
        Arc::new(move |message: TypedMessage| {
            let sample = SampleEvent {
                source: source.clone(),
                stream_id,
                message,
                received_at: Instant::now(),
            };
            // A full queue means the consumer is behind; the throttle would
            // drop most of these anyway.  A closed one only happens at shutdown.
            if let Err(mpsc::error::TrySendError::Full(sample)) = tx.try_send(sample) {
                debug!(source = %sample.source, "sample queue full, dropping sample");
            }
        })
    }

    /// Throttle and encode one sample.
    ///
    /// Returns the envelope to publish on `data/ingest`, or `None` when the
    /// sample is dropped.
    pub async fn on_sample(&self, sample: SampleEvent) -> Option<DataEnvelope> {
        let admitted = self
            .streams
            .lock()
            .await
            .admit(&sample.source, sample.stream_id, sample.received_at);
        if !admitted {
            return None;
        }
        let payload = MessageCodec::encode(&sample.message);
        Some(DataEnvelope::new(sample.source, payload, Utc::now()))
    }

    /// Sources currently configured for streaming.
    pub async fn active_sources(&self) -> Vec<String> {
        let streams = self.streams.lock().await;
        let mut sources: Vec<String> = streams.iter().map(|s| s.source.clone()).collect();
        sources.sort();
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Primitive, TypedValue};
    use crate::registry::TypeRegistry;
    use crate::sim::SimMiddleware;
    use serde_json::json;

    fn dispatcher(
        sim: Arc<SimMiddleware>,
    ) -> (CommandDispatcher, mpsc::Receiver<SampleEvent>) {
        let registry = Arc::new(TypeRegistry::with_builtin().unwrap());
        CommandDispatcher::new(registry, sim, Duration::from_secs(5))
    }

    fn temperature(value: f64) -> TypedMessage {
        let stamp = TypedMessage::new("builtin_interfaces/msg/Time")
            .with("sec", TypedValue::Primitive(Primitive::Int32(0)))
            .with("nanosec", TypedValue::Primitive(Primitive::UInt32(0)));
        let header = TypedMessage::new("std_msgs/msg/Header")
            .with("stamp", TypedValue::Message(stamp))
            .with("frame_id", TypedValue::Primitive(Primitive::String("base".into())));
        TypedMessage::new("sensor_msgs/msg/Temperature")
            .with("header", TypedValue::Message(header))
            .with("temperature", TypedValue::Primitive(Primitive::Float64(value)))
            .with("variance", TypedValue::Primitive(Primitive::Float64(0.0)))
    }

    #[tokio::test]
    async fn publishes_topic_commands() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, _rx) = dispatcher(sim.clone());
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-1",
                "interface": "topic",
                "name": "/cmd_vel",
                "type": "geometry_msgs/msg/Twist",
                "payload": {"linear": {"x": 0.5, "y": 0, "z": 0}, "angular": {"x": 0, "y": 0, "z": 0}}
            }))
            .await;
        assert_eq!(result, CommandResult::ok("cmd-1"));

        let published = sim.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "/cmd_vel");
        assert_eq!(published[0].1.type_name(), "geometry_msgs/msg/Twist");
    }

    #[tokio::test]
    async fn malformed_type_is_invalid_type() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-2",
                "interface": "topic",
                "name": "/x",
                "type": "bad_type_no_slashes",
                "payload": {}
            }))
            .await;
        assert_eq!(result, CommandResult::failed("cmd-2", ErrorCode::InvalidType));
    }

    #[tokio::test]
    async fn unknown_type_is_invalid_type() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-3",
                "interface": "topic",
                "name": "/x",
                "type": "nonexistent_pkg/msg/Foo",
                "payload": {}
            }))
            .await;
        assert_eq!(result.error_code, Some(ErrorCode::InvalidType));
    }

    #[tokio::test]
    async fn payload_key_mismatch_is_invalid_payload() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-4",
                "interface": "topic",
                "name": "/chatter",
                "type": "std_msgs/msg/String",
                "payload": {"text": "hello"}
            }))
            .await;
        assert_eq!(result.error_code, Some(ErrorCode::InvalidPayload));
    }

    #[tokio::test]
    async fn invalid_shape_is_unknown_error_with_salvaged_uuid() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({"uuid": "cmd-5", "interface": "teleport", "name": "/x", "type": "a/msg/B", "payload": {}}))
            .await;
        assert_eq!(result, CommandResult::failed("cmd-5", ErrorCode::UnknownError));

        let result = dispatcher.dispatch(&json!({"interface": "topic"})).await;
        assert_eq!(result, CommandResult::failed("", ErrorCode::UnknownError));
    }

    #[tokio::test]
    async fn service_not_ready_is_reported_without_a_record() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-6",
                "interface": "service",
                "name": "/trigger",
                "type": "std_srvs/srv/Trigger",
                "payload": {}
            }))
            .await;
        assert_eq!(result, CommandResult::failed("cmd-6", ErrorCode::ServiceNotReady));
        assert!(dispatcher.tracker().pending().await.is_empty());
    }

    #[tokio::test]
    async fn ready_service_is_accepted() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::with_demo_interfaces()));
        let mut outcomes = dispatcher.tracker().subscribe_outcomes();
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-7",
                "interface": "service",
                "name": "/add_two_ints",
                "type": "example_interfaces/srv/AddTwoInts",
                "payload": {"a": 1, "b": 2}
            }))
            .await;
        assert_eq!(result, CommandResult::ok("cmd-7"));
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.response, Some(json!({"sum": 3})));
    }

    #[tokio::test]
    async fn action_server_not_ready_is_distinct() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-8",
                "interface": "action_send_goal",
                "name": "/fibonacci",
                "type": "example_interfaces/action/Fibonacci",
                "payload": {"order": 3}
            }))
            .await;
        assert_eq!(result.error_code, Some(ErrorCode::ActionServerNotReady));
    }

    #[tokio::test]
    async fn cancel_of_unknown_goal_is_goal_not_found() {
        let (dispatcher, _rx) = dispatcher(Arc::new(SimMiddleware::new()));
        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-9",
                "interface": "action_cancel_goal",
                "name": "/fibonacci",
                "type": "example_interfaces/action/Fibonacci",
                "payload": {"goal_uuid": "cmd-0"}
            }))
            .await;
        assert_eq!(result, CommandResult::failed("cmd-9", ErrorCode::GoalNotFound));

        let result = dispatcher
            .dispatch(&json!({
                "uuid": "cmd-10",
                "interface": "action_cancel_goal",
                "name": "/fibonacci",
                "type": "example_interfaces/action/Fibonacci",
                "payload": {}
            }))
            .await;
        assert_eq!(result.error_code, Some(ErrorCode::InvalidPayload));
    }

    #[tokio::test]
    async fn data_samples_are_throttled_and_wrapped() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, mut rx) = dispatcher(sim.clone());
        let active = dispatcher
            .configure_data(&json!([{"source": "/temp", "type": "sensor_msgs/msg/Temperature", "hz": 2}]))
            .await
            .unwrap();
        assert_eq!(active, 1);

        sim.emit("/temp", &temperature(21.5));
        sim.emit("/temp", &temperature(21.6));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        let envelope = dispatcher.on_sample(first).await.unwrap();
        assert_eq!(envelope.source, "/temp");
        assert_eq!(envelope.payload["temperature"], json!(21.5));
        assert!(envelope.sent_at.ends_with('Z'));

        // Second sample arrives well inside the 500ms period.
        assert!(dispatcher.on_sample(second).await.is_none());
    }

    #[tokio::test]
    async fn reconfiguration_forgets_removed_sources() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, mut rx) = dispatcher(sim.clone());
        dispatcher
            .configure_data(&json!([{"source": "/temp", "type": "sensor_msgs/msg/Temperature", "hz": 10}]))
            .await
            .unwrap();
        sim.emit("/temp", &temperature(20.0));
        let stale = rx.recv().await.unwrap();

        dispatcher
            .configure_data(&json!([{"source": "/battery", "type": "sensor_msgs/msg/BatteryState", "hz": 1}]))
            .await
            .unwrap();

        assert_eq!(sim.subscribed_topics(), ["/battery"]);
        assert_eq!(dispatcher.active_sources().await, ["/battery"]);
        assert!(dispatcher.on_sample(stale).await.is_none());
        assert_eq!(sim.emit("/temp", &temperature(20.0)), 0);
    }

    #[tokio::test]
    async fn invalid_data_config_keeps_current_streams() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, _rx) = dispatcher(sim.clone());
        dispatcher
            .configure_data(&json!([{"source": "/temp", "type": "sensor_msgs/msg/Temperature", "hz": 1}]))
            .await
            .unwrap();

        let err = dispatcher
            .configure_data(&json!([{"source": "/temp"}]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPayload(_)));
        assert_eq!(sim.subscribed_topics(), ["/temp"]);
    }

    #[tokio::test]
    async fn unusable_entries_are_skipped() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, _rx) = dispatcher(sim.clone());
        let active = dispatcher
            .configure_data(&json!([
                {"source": "/temp", "type": "sensor_msgs/msg/Temperature", "hz": 0},
                {"source": "/ghost", "type": "ghost_msgs/msg/Boo", "hz": 5},
                {"source": "/odom", "type": "geometry_msgs/msg/PoseStamped", "hz": 5},
                {"source": "/odom", "type": "geometry_msgs/msg/PoseStamped", "hz": 10}
            ]))
            .await
            .unwrap();
        assert_eq!(active, 1);
        assert_eq!(sim.subscribed_topics(), ["/odom"]);
    }

    #[tokio::test]
    async fn rate_too_low_for_a_period_is_skipped() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, mut rx) = dispatcher(sim.clone());
        let active = dispatcher
            .configure_data(&json!([
                {"source": "/temp", "type": "sensor_msgs/msg/Temperature", "hz": 1e-20},
                {"source": "/odom", "type": "geometry_msgs/msg/PoseStamped", "hz": 5}
            ]))
            .await
            .unwrap();
        assert_eq!(active, 1);
        assert_eq!(sim.subscribed_topics(), ["/odom"]);

        assert_eq!(sim.emit("/temp", &temperature(20.0)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn samples_beyond_the_queue_capacity_are_dropped() {
        let sim = Arc::new(SimMiddleware::new());
        let (dispatcher, mut rx) = dispatcher(sim.clone());
        dispatcher
            .configure_data(&json!([{"source": "/temp", "type": "sensor_msgs/msg/Temperature", "hz": 1}]))
            .await
            .unwrap();

        for i in 0..SAMPLE_QUEUE_CAPACITY + 10 {
            sim.emit("/temp", &temperature(i as f64));
        }
        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, SAMPLE_QUEUE_CAPACITY);
    }
}
