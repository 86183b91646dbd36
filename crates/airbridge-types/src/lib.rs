//! `airbridge-types` – shared wire and data types.
//!
//! Everything that crosses a crate boundary or the cloud link lives here:
//! inbound commands, outbound confirmations, data/log/vitals envelopes and the
//! [`BridgeError`] taxonomy that the command dispatcher folds into an
//! [`ErrorCode`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Middleware interaction pattern a cloud command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    /// Fire-and-forget publish on a topic.
    Topic,
    /// Asynchronous service call.
    Service,
    /// Send a goal to an action server.
    ActionSendGoal,
    /// Cancel a goal previously sent with [`Interface::ActionSendGoal`].
    ActionCancelGoal,
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interface::Topic => write!(f, "topic"),
            Interface::Service => write!(f, "service"),
            Interface::ActionSendGoal => write!(f, "action_send_goal"),
            Interface::ActionCancelGoal => write!(f, "action_cancel_goal"),
        }
    }
}

/// A validated command received on `commands/send`.
///
/// The `type` field is kept as a raw string: its three-segment shape is
/// checked by the type resolver so a malformed type surfaces as
/// [`ErrorCode::InvalidType`] rather than as a validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub uuid: String,
    pub interface: Interface,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub payload: Map<String, Value>,
}

impl CommandRequest {
    /// Validate an untyped JSON value against the command shape.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidCommand`] when a required key is missing,
    /// has the wrong JSON type, names an unknown interface, or when `name` is
    /// empty.
    pub fn from_value(value: &Value) -> Result<Self, BridgeError> {
        let request = Self::deserialize(value)
            .map_err(|e| BridgeError::InvalidCommand(e.to_string()))?;
        if request.name.is_empty() {
            return Err(BridgeError::InvalidCommand("`name` must not be empty".to_string()));
        }
        Ok(request)
    }
}

/// Machine-readable failure reason carried by confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidType,
    InvalidPayload,
    ServiceNotReady,
    ActionServerNotReady,
    GoalNotFound,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidType => "invalid_type",
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::ServiceNotReady => "service_not_ready",
            ErrorCode::ActionServerNotReady => "action_server_not_ready",
            ErrorCode::GoalNotFound => "goal_not_found",
            ErrorCode::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confirmation published on `commands/confirm` for every dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub error_code: Option<ErrorCode>,
    pub uuid: String,
}

impl CommandResult {
    pub fn ok(uuid: impl Into<String>) -> Self {
        Self {
            success: true,
            error_code: None,
            uuid: uuid.into(),
        }
    }

    pub fn failed(uuid: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            success: false,
            error_code: Some(code),
            uuid: uuid.into(),
        }
    }

    /// Build a result from the outcome of a submission.
    pub fn from_outcome(uuid: impl Into<String>, outcome: Result<(), BridgeError>) -> Self {
        match outcome {
            Ok(()) => Self::ok(uuid),
            Err(e) => Self::failed(uuid, e.error_code()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Data streaming
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a `data/config` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStreamSpec {
    /// Middleware topic to subscribe to.
    pub source: String,
    /// Fully-qualified message type, e.g. `"sensor_msgs/msg/BatteryState"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Maximum forwarding rate in samples per second.
    pub hz: f64,
}

/// Envelope published on `data/ingest` for every forwarded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope {
    pub sent_at: String,
    pub source: String,
    pub payload: Value,
}

impl DataEnvelope {
    pub fn new(source: impl Into<String>, payload: Value, sent_at: DateTime<Utc>) -> Self {
        Self {
            sent_at: iso_timestamp(sent_at),
            source: source.into(),
            payload,
        }
    }
}

/// Format a UTC instant as ISO-8601 with a trailing `Z`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Logs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Map a middleware severity byte (10/20/30/40/50) onto a level.
    pub fn from_severity(severity: u8) -> Option<Self> {
        match severity {
            10 => Some(LogLevel::Debug),
            20 => Some(LogLevel::Info),
            30 => Some(LogLevel::Warn),
            40 => Some(LogLevel::Error),
            50 => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

/// A middleware log record as forwarded on `logs/ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub msg: String,
    pub level: Option<LogLevel>,
    pub name: String,
    pub file: String,
    pub function: String,
    pub line: u32,
    pub stamp: String,
}

/// Payload of `logs/config` and `vitals/config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionToggle {
    pub enabled: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Vitals, containers, presence
// ─────────────────────────────────────────────────────────────────────────────

/// Host health snapshot published on `vitals/ingest`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub battery: f64,
    pub local_ip: String,
    pub public_ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPhase {
    Up,
    Down,
    Error,
}

/// Outcome of a compose workload operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub state: ContainerPhase,
    pub error_code: Option<String>,
}

impl ContainerState {
    pub fn up() -> Self {
        Self { state: ContainerPhase::Up, error_code: None }
    }

    pub fn down() -> Self {
        Self { state: ContainerPhase::Down, error_code: None }
    }

    pub fn error(code: impl Into<String>) -> Self {
        Self {
            state: ContainerPhase::Error,
            error_code: Some(code.into()),
        }
    }
}

/// Payload of `containers/config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUpdate {
    pub uuid: String,
    /// Compose document to run, or `null` to remove the workload.  The key
    /// itself is required.
    #[serde(deserialize_with = "Option::deserialize")]
    pub compose: Option<Map<String, Value>>,
}

/// Confirmation published on `containers/confirm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfirm {
    #[serde(flatten)]
    pub state: ContainerState,
    pub uuid: String,
}

/// Payload published on `presence` and registered as the link's last will.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub online: bool,
    pub agent_version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure taxonomy of the command/data engine.
///
/// Every variant folds into exactly one [`ErrorCode`] via
/// [`BridgeError::error_code`]; nothing below the dispatcher leaks past it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Type not found: {0}")]
    TypeNotFound(String),

    #[error("Malformed type name: {0}")]
    TypeMalformed(String),

    #[error("Service not ready: {0}")]
    ServiceNotReady(String),

    #[error("Action server not ready: {0}")]
    ActionServerNotReady(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No pending goal for command {0}")]
    GoalNotFound(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Middleware error: {0}")]
    Middleware(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl BridgeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BridgeError::TypeNotFound(_) | BridgeError::TypeMalformed(_) => ErrorCode::InvalidType,
            BridgeError::SchemaMismatch(_) | BridgeError::InvalidPayload(_) => {
                ErrorCode::InvalidPayload
            }
            BridgeError::ServiceNotReady(_) => ErrorCode::ServiceNotReady,
            BridgeError::ActionServerNotReady(_) => ErrorCode::ActionServerNotReady,
            BridgeError::GoalNotFound(_) => ErrorCode::GoalNotFound,
            BridgeError::InvalidCommand(_)
            | BridgeError::Middleware(_)
            | BridgeError::Unknown(_) => ErrorCode::UnknownError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn command_json() -> Value {
        json!({
            "uuid": "c0ffee",
            "interface": "topic",
            "name": "/cmd_vel",
            "type": "geometry_msgs/msg/Twist",
            "payload": { "linear": {}, "angular": {} }
        })
    }

    #[test]
    fn command_request_parses_valid_shape() {
        let request = CommandRequest::from_value(&command_json()).unwrap();
        assert_eq!(request.uuid, "c0ffee");
        assert_eq!(request.interface, Interface::Topic);
        assert_eq!(request.type_name, "geometry_msgs/msg/Twist");
        assert_eq!(request.payload.len(), 2);
    }

    #[test]
    fn command_request_rejects_empty_name() {
        let mut value = command_json();
        value["name"] = json!("");
        assert!(matches!(
            CommandRequest::from_value(&value),
            Err(BridgeError::InvalidCommand(_))
        ));
    }

    #[test]
    fn command_request_rejects_unknown_interface() {
        let mut value = command_json();
        value["interface"] = json!("parameter");
        assert!(CommandRequest::from_value(&value).is_err());
    }

    #[test]
    fn command_request_rejects_non_object_payload() {
        let mut value = command_json();
        value["payload"] = json!([1, 2, 3]);
        assert!(CommandRequest::from_value(&value).is_err());
    }

    #[test]
    fn command_request_rejects_missing_uuid() {
        let mut value = command_json();
        value.as_object_mut().unwrap().remove("uuid");
        assert!(CommandRequest::from_value(&value).is_err());
    }

    #[test]
    fn command_request_keeps_malformed_type_for_resolver() {
        let mut value = command_json();
        value["type"] = json!("bad_type_no_slashes");
        let request = CommandRequest::from_value(&value).unwrap();
        assert_eq!(request.type_name, "bad_type_no_slashes");
    }

    #[test]
    fn command_result_serialises_error_code_snake_case() {
        let result = CommandResult::failed("42", ErrorCode::ActionServerNotReady);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            json!({ "success": false, "error_code": "action_server_not_ready", "uuid": "42" })
        );

        let ok = serde_json::to_value(CommandResult::ok("7")).unwrap();
        assert_eq!(ok, json!({ "success": true, "error_code": null, "uuid": "7" }));
    }

    #[test]
    fn bridge_error_maps_onto_error_codes() {
        assert_eq!(BridgeError::TypeMalformed("x".into()).error_code(), ErrorCode::InvalidType);
        assert_eq!(BridgeError::TypeNotFound("x".into()).error_code(), ErrorCode::InvalidType);
        assert_eq!(
            BridgeError::SchemaMismatch("x".into()).error_code(),
            ErrorCode::InvalidPayload
        );
        assert_eq!(
            BridgeError::ServiceNotReady("x".into()).error_code(),
            ErrorCode::ServiceNotReady
        );
        assert_eq!(BridgeError::GoalNotFound("x".into()).error_code(), ErrorCode::GoalNotFound);
        assert_eq!(BridgeError::Middleware("x".into()).error_code(), ErrorCode::UnknownError);
    }

    #[test]
    fn data_envelope_timestamp_has_utc_marker() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let envelope = DataEnvelope::new("/battery", json!({ "percentage": 0.5 }), at);
        assert_eq!(envelope.sent_at, "2024-03-01T12:30:05.000000Z");
        assert_eq!(envelope.source, "/battery");
    }

    #[test]
    fn log_level_maps_severities() {
        assert_eq!(LogLevel::from_severity(10), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_severity(30), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_severity(50), Some(LogLevel::Fatal));
        assert_eq!(LogLevel::from_severity(0), None);
    }

    #[test]
    fn container_confirm_flattens_state() {
        let confirm = ContainerConfirm {
            state: ContainerState::error("compose_up"),
            uuid: "u1".to_string(),
        };
        let json = serde_json::to_value(&confirm).unwrap();
        assert_eq!(json, json!({ "state": "error", "error_code": "compose_up", "uuid": "u1" }));
    }

    #[test]
    fn container_update_accepts_null_compose() {
        let update: ContainerUpdate =
            serde_json::from_value(json!({ "uuid": "u2", "compose": null })).unwrap();
        assert!(update.compose.is_none());
    }

    #[test]
    fn container_update_requires_the_compose_key() {
        let err = serde_json::from_value::<ContainerUpdate>(json!({ "uuid": "u3" })).unwrap_err();
        assert!(err.to_string().contains("compose"));
    }
}
