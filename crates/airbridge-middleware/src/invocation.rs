//! Tracking of outstanding service calls and action goals.
//!
//! Submission is synchronous from the caller's point of view: the request is
//! resolved, decoded and readiness-checked, then the call itself runs on a
//! spawned task.  That task owns the invocation's completion path and is the
//! only place a record leaves the table.  It is supervised: if it panics, the
//! invocation is failed on its behalf.
//!
//! ```text
//! Submitting ──► Rejected
//!     │
//!     ▼
//!  Pending ──► Completed | Failed | Canceled
//! ```
//!
//! Every pending invocation is bounded by a timeout.  Terminal transitions are
//! logged and broadcast as [`InvocationOutcome`]s for in-process observers;
//! they are not relayed to the cloud.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use airbridge_types::BridgeError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{FeedbackCallback, MiddlewareClient};
use crate::codec::{MessageCodec, TypedMessage};
use crate::error::MiddlewareError;

const OUTCOME_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Service,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Submitting,
    Pending,
    Rejected,
    Completed,
    Failed,
    Canceled,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationState::Submitting | InvocationState::Pending)
    }
}

/// Bookkeeping for one outstanding call.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub id: Uuid,
    pub kind: InvocationKind,
    pub name: String,
    pub type_name: String,
    /// The `uuid` of the command that started this invocation.
    pub correlation: String,
    pub state: InvocationState,
    /// Server-side goal id, once the action server has answered.
    pub goal_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal transition of an invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub id: Uuid,
    pub kind: InvocationKind,
    pub name: String,
    pub correlation: String,
    pub state: InvocationState,
    pub detail: Option<String>,
    /// Service response or action result, when the call completed.
    pub response: Option<Value>,
}

struct Entry {
    record: InvocationRecord,
    cancel: Option<oneshot::Sender<()>>,
}

/// Owns every in-flight service call and action goal.
///
/// Clones share the same record table and outcome channel.
#[derive(Clone)]
pub struct InvocationTracker {
    codec: MessageCodec,
    middleware: Arc<dyn MiddlewareClient>,
    records: Arc<Mutex<HashMap<Uuid, Entry>>>,
    outcomes: broadcast::Sender<InvocationOutcome>,
    timeout: Duration,
}

impl InvocationTracker {
    pub fn new(codec: MessageCodec, middleware: Arc<dyn MiddlewareClient>, timeout: Duration) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        Self {
            codec,
            middleware,
            records: Arc::new(Mutex::new(HashMap::new())),
            outcomes,
            timeout,
        }
    }

    /// Receive every terminal transition from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<InvocationOutcome> {
        self.outcomes.subscribe()
    }

    /// Snapshot of the invocations that have not finished yet.
    pub async fn pending(&self) -> Vec<InvocationRecord> {
        self.records
            .lock()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Submit a service call.
    ///
    /// Returns once the call has been handed to the middleware.  When the
    /// service is not ready nothing is registered and
    /// [`BridgeError::ServiceNotReady`] is returned.
    pub async fn submit_service(
        &self,
        correlation: &str,
        name: &str,
        type_name: &str,
        payload: &Map<String, Value>,
    ) -> Result<Uuid, BridgeError> {
        let service = self.codec.resolver().resolve_service(type_name)?;
        let request = self.codec.decode_object(&service.request, payload)?;

        if !self.middleware.service_is_ready(name, type_name) {
            error!(service = %name, "call service failed: service is not ready");
            return Err(BridgeError::ServiceNotReady(name.to_string()));
        }

        let record = self.register(InvocationKind::Service, correlation, name, type_name, None).await;
        let id = record.id;
        info!(service = %name, invocation = %id, "called service");

        let tracker = self.clone();
        let (name, type_name) = (name.to_string(), type_name.to_string());
        self.supervise(id, async move {
            let call = tracker.middleware.call_service(&name, &type_name, request);
            let (state, detail, response) = match tokio::time::timeout(tracker.timeout, call).await {
                Ok(Ok(reply)) => (InvocationState::Completed, None, Some(MessageCodec::encode(&reply))),
                Ok(Err(e)) => (InvocationState::Failed, Some(e.to_string()), None),
                Err(_) => (InvocationState::Failed, Some("timeout".to_string()), None),
            };
            tracker.finish(id, state, detail, response).await;
        });

        Ok(id)
    }

    /// Submit an action goal.
    ///
    /// Acceptance, completion and feedback are handled on a spawned task.  A
    /// goal still pending can be withdrawn with [`InvocationTracker::cancel`].
    pub async fn submit_action(
        &self,
        correlation: &str,
        name: &str,
        type_name: &str,
        payload: &Map<String, Value>,
    ) -> Result<Uuid, BridgeError> {
        let action = self.codec.resolver().resolve_action(type_name)?;
        let goal = self.codec.decode_object(&action.goal, payload)?;

        if !self.middleware.action_server_is_ready(name, type_name) {
            error!(action = %name, "send goal failed: action server is not ready");
            return Err(BridgeError::ActionServerNotReady(name.to_string()));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let record = self
            .register(InvocationKind::Action, correlation, name, type_name, Some(cancel_tx))
            .await;
        let id = record.id;
        info!(action = %name, invocation = %id, "sent action goal");

        let tracker = self.clone();
        let (name, type_name) = (name.to_string(), type_name.to_string());
        self.supervise(id, async move {
            tracker.drive_goal(id, name, type_name, goal, cancel_rx).await;
        });

        Ok(id)
    }

    /// Run the completion path of invocation `id` on its own task.  A panic
    /// there fails the invocation instead of leaving its record behind.
    fn supervise<F>(&self, id: Uuid, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tracker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(work).await {
                error!(invocation = %id, error = %e, "invocation task failed");
                let detail = format!("invocation task failed: {e}");
                tracker.finish(id, InvocationState::Failed, Some(detail), None).await;
            }
        });
    }

    async fn drive_goal(
        &self,
        id: Uuid,
        name: String,
        type_name: String,
        goal: TypedMessage,
        cancel_rx: oneshot::Receiver<()>,
    ) {
        let feedback_action = name.clone();
        let feedback: FeedbackCallback = Arc::new(move |msg: TypedMessage| {
            debug!(action = %feedback_action, feedback = %MessageCodec::encode(&msg), "action feedback");
        });

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let sent = tokio::select! {
            sent = self.middleware.send_goal(&name, &type_name, goal, feedback) => sent,
            _ = &mut deadline => {
                self.finish(id, InvocationState::Failed, Some("timeout".into()), None).await;
                return;
            }
        };

        let handle = match sent {
            Ok(handle) => handle,
            Err(e) => {
                self.finish(id, InvocationState::Failed, Some(e.to_string()), None).await;
                return;
            }
        };

        if !handle.accepted {
            warn!(action = %name, goal = %handle.goal_id, "goal rejected");
            self.finish(id, InvocationState::Rejected, Some("goal rejected".into()), None).await;
            return;
        }

        let goal_id = handle.goal_id;
        if let Some(entry) = self.records.lock().await.get_mut(&id) {
            entry.record.goal_id = Some(goal_id);
        }
        info!(action = %name, goal = %goal_id, "goal accepted");

        tokio::select! {
            result = handle.result => match result {
                Ok(result) => {
                    let response = MessageCodec::encode(&result);
                    self.finish(id, InvocationState::Completed, None, Some(response)).await;
                }
                Err(MiddlewareError::GoalCanceled(_)) => {
                    self.finish(id, InvocationState::Canceled, None, None).await;
                }
                Err(e) => {
                    self.finish(id, InvocationState::Failed, Some(e.to_string()), None).await;
                }
            },
            Ok(()) = cancel_rx => {
                if let Err(e) = self.middleware.cancel_goal(&name, goal_id).await {
                    warn!(action = %name, goal = %goal_id, error = %e, "cancel request failed");
                }
                self.finish(id, InvocationState::Canceled, None, None).await;
            }
            _ = &mut deadline => {
                if let Err(e) = self.middleware.cancel_goal(&name, goal_id).await {
                    warn!(action = %name, goal = %goal_id, error = %e, "cancel after timeout failed");
                }
                self.finish(id, InvocationState::Failed, Some("timeout".into()), None).await;
            }
        }
    }

    /// Cancel the pending goal started by command `correlation` on `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::GoalNotFound`] when no such goal is pending.
    pub async fn cancel(&self, name: &str, correlation: &str) -> Result<(), BridgeError> {
        let mut records = self.records.lock().await;
        let entry = records.values_mut().find(|e| {
            e.record.kind == InvocationKind::Action
                && e.record.name == name
                && e.record.correlation == correlation
        });
        let sender = entry
            .and_then(|e| e.cancel.take())
            .ok_or_else(|| BridgeError::GoalNotFound(correlation.to_string()))?;
        sender
            .send(())
            .map_err(|_| BridgeError::GoalNotFound(correlation.to_string()))?;
        info!(action = %name, command = %correlation, "goal cancel requested");
        Ok(())
    }

    async fn register(
        &self,
        kind: InvocationKind,
        correlation: &str,
        name: &str,
        type_name: &str,
        cancel: Option<oneshot::Sender<()>>,
    ) -> InvocationRecord {
        let record = InvocationRecord {
            id: Uuid::new_v4(),
            kind,
            name: name.to_string(),
            type_name: type_name.to_string(),
            correlation: correlation.to_string(),
            state: InvocationState::Pending,
            goal_id: None,
            submitted_at: Utc::now(),
        };
        self.records.lock().await.insert(
            record.id,
            Entry {
                record: record.clone(),
                cancel,
            },
        );
        record
    }

    async fn finish(
        &self,
        id: Uuid,
        state: InvocationState,
        detail: Option<String>,
        response: Option<Value>,
    ) {
        let Some(entry) = self.records.lock().await.remove(&id) else {
            return;
        };
        let record = entry.record;
        match state {
            InvocationState::Completed => {
                info!(name = %record.name, invocation = %id, response = ?response, "invocation completed")
            }
            InvocationState::Canceled => info!(name = %record.name, invocation = %id, "invocation canceled"),
            _ => warn!(
                name = %record.name,
                invocation = %id,
                state = ?state,
                detail = detail.as_deref().unwrap_or_default(),
                "invocation did not complete"
            ),
        }
        // No observers is the normal case.
        let _ = self.outcomes.send(InvocationOutcome {
            id,
            kind: record.kind,
            name: record.name,
            correlation: record.correlation,
            state,
            detail,
            response,
        });
    }
}
