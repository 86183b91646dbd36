//! Broker link over a WebSocket.
//!
//! The broker speaks a small JSON protocol, one object per text frame, tagged
//! by `op`:
//!
//! | `op` | Direction | Fields |
//! |---|---|---|
//! | `connect` | client → broker | `client_id`, `username`, `password`, `keep_alive`, `will` |
//! | `connack` | broker → client | `accepted`, `reason` |
//! | `subscribe` | client → broker | `topic`, `qos` |
//! | `publish` | both | `topic`, `payload`, `qos` |
//! | `disconnect` | client → broker | |
//!
//! A background task owns the socket.  It reconnects with a fixed delay,
//! replays every subscription and the birth message after each connect, and
//! buffers publishes issued while disconnected.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::link::{CloudError, CloudLink, CloudMessage, QoS, WillMessage};

const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);
const BACKLOG_LIMIT: usize = 1024;

#[derive(Clone)]
pub struct ConnectOptions {
    /// `ws://host:port/path` of the broker endpoint.
    pub url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub will: Option<WillMessage>,
    pub birth: Option<WillMessage>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Frame {
    Connect {
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        keep_alive: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        will: Option<WillMessage>,
    },
    Connack {
        accepted: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: String,
        qos: QoS,
    },
    Disconnect,
}

impl Frame {
    fn to_message(&self) -> Result<Message, CloudError> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

enum Command {
    Publish { topic: String, payload: String, qos: QoS },
    Subscribe { topic: String, qos: QoS },
    Close,
}

enum SessionEnd {
    /// `close()` was called or every handle was dropped.
    Closed,
    /// The broker went away; reconnect.
    Dropped,
}

/// Handle to the background connection task.
pub struct WsLink {
    commands: mpsc::UnboundedSender<Command>,
}

impl WsLink {
    /// Start the connection task.
    ///
    /// Returns immediately; the task keeps (re)connecting until
    /// [`WsLink::close`] is called.  Broker publishes on subscribed topics are
    /// delivered on the returned receiver.
    pub fn spawn(
        options: ConnectOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CloudMessage>, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(options, commands_rx, inbound_tx));
        (Arc::new(Self { commands }), inbound_rx, task)
    }

    /// Disconnect cleanly.  The broker does not publish the last will.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    fn command(&self, command: Command) -> Result<(), CloudError> {
        self.commands.send(command).map_err(|_| CloudError::Closed)
    }
}

#[async_trait]
impl CloudLink for WsLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), CloudError> {
        let payload = String::from_utf8(payload)
            .map_err(|e| CloudError::Protocol(format!("payload is not UTF-8: {e}")))?;
        self.command(Command::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        })
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), CloudError> {
        self.command(Command::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection task
// ─────────────────────────────────────────────────────────────────────────────

struct LinkState {
    subscriptions: Vec<(String, QoS)>,
    backlog: VecDeque<Frame>,
}

impl LinkState {
    fn remember_subscription(&mut self, topic: String, qos: QoS) {
        if !self.subscriptions.iter().any(|(t, _)| *t == topic) {
            self.subscriptions.push((topic, qos));
        }
    }

    fn buffer(&mut self, frame: Frame) {
        if self.backlog.len() == BACKLOG_LIMIT {
            self.backlog.pop_front();
            warn!("cloud backlog full, dropping oldest message");
        }
        self.backlog.push_back(frame);
    }
}

async fn run(
    options: ConnectOptions,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<CloudMessage>,
) {
    let mut state = LinkState {
        subscriptions: Vec::new(),
        backlog: VecDeque::new(),
    };

    loop {
        match session(&options, &mut commands, &inbound, &mut state).await {
            Ok(SessionEnd::Closed) => {
                info!(url = %options.url, "cloud link closed");
                return;
            }
            Ok(SessionEnd::Dropped) => warn!(url = %options.url, "cloud connection lost"),
            Err(e) => warn!(url = %options.url, error = %e, "cloud connection failed"),
        }

        // Keep accepting commands while waiting to reconnect.
        let delay = sleep(options.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Close) => return,
                    Some(Command::Subscribe { topic, qos }) => state.remember_subscription(topic, qos),
                    Some(Command::Publish { topic, payload, qos }) => {
                        state.buffer(Frame::Publish { topic, payload, qos });
                    }
                },
            }
        }
    }
}

async fn session(
    options: &ConnectOptions,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    inbound: &mpsc::UnboundedSender<CloudMessage>,
    state: &mut LinkState,
) -> Result<SessionEnd, CloudError> {
    let (ws, _) = connect_async(options.url.as_str())
        .await
        .map_err(|e| CloudError::Connect(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let send_err = |e: tokio_tungstenite::tungstenite::Error| CloudError::Connect(e.to_string());

    let hello = Frame::Connect {
        client_id: options.client_id.clone(),
        username: options.username.clone(),
        password: options.password.clone(),
        keep_alive: options.keep_alive.as_secs(),
        will: options.will.clone(),
    };
    ws_tx.send(hello.to_message()?).await.map_err(send_err)?;

    // ── Handshake ────────────────────────────────────────────────────────────
    let deadline = Instant::now() + CONNACK_TIMEOUT;
    loop {
        let next = timeout(deadline.saturating_duration_since(Instant::now()), ws_rx.next())
            .await
            .map_err(|_| CloudError::Connect("no connack from broker".to_string()))?;
        match next {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(text.as_str()) {
                Ok(Frame::Connack { accepted: true, .. }) => break,
                Ok(Frame::Connack { reason, .. }) => {
                    return Err(CloudError::Connect(
                        reason.unwrap_or_else(|| "connection refused".to_string()),
                    ));
                }
                Ok(other) => debug!(frame = ?other, "ignoring frame before connack"),
                Err(e) => return Err(CloudError::Protocol(e.to_string())),
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(CloudError::Connect("closed during handshake".to_string()));
            }
            Some(Err(e)) => return Err(CloudError::Connect(e.to_string())),
            Some(Ok(_)) => {}
        }
    }
    info!(url = %options.url, client_id = %options.client_id, "connected to cloud broker");

    // Commands issued while connecting join the replay below.
    while let Ok(cmd) = commands.try_recv() {
        match cmd {
            Command::Close => {
                let _ = ws_tx.send(Frame::Disconnect.to_message()?).await;
                return Ok(SessionEnd::Closed);
            }
            Command::Subscribe { topic, qos } => state.remember_subscription(topic, qos),
            Command::Publish { topic, payload, qos } => state.buffer(Frame::Publish { topic, payload, qos }),
        }
    }

    for (topic, qos) in &state.subscriptions {
        let frame = Frame::Subscribe { topic: topic.clone(), qos: *qos };
        ws_tx.send(frame.to_message()?).await.map_err(send_err)?;
    }
    if let Some(birth) = &options.birth {
        let frame = Frame::Publish {
            topic: birth.topic.clone(),
            payload: birth.payload.clone(),
            qos: birth.qos,
        };
        ws_tx.send(frame.to_message()?).await.map_err(send_err)?;
    }
    while let Some(frame) = state.backlog.pop_front() {
        if let Err(e) = ws_tx.send(frame.to_message()?).await {
            state.backlog.push_front(frame);
            return Err(send_err(e));
        }
    }

    // ── Steady state ─────────────────────────────────────────────────────────
    let period = options.keep_alive.max(Duration::from_secs(1));
    let mut keep_alive = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let frame = match cmd {
                    None | Some(Command::Close) => {
                        let _ = ws_tx.send(Frame::Disconnect.to_message()?).await;
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Command::Subscribe { topic, qos }) => {
                        state.remember_subscription(topic.clone(), qos);
                        Frame::Subscribe { topic, qos }
                    }
                    Some(Command::Publish { topic, payload, qos }) => Frame::Publish { topic, payload, qos },
                };
                if let Err(e) = ws_tx.send(frame.to_message()?).await {
                    if matches!(frame, Frame::Publish { .. }) {
                        state.buffer(frame);
                    }
                    return Err(send_err(e));
                }
            }
            _ = keep_alive.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Ok(SessionEnd::Dropped);
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(text.as_str()) {
                        Ok(Frame::Publish { topic, payload, .. }) => {
                            let delivered = inbound.send(CloudMessage {
                                topic,
                                payload: payload.into_bytes(),
                            });
                            if delivered.is_err() {
                                debug!("inbound receiver dropped");
                            }
                        }
                        Ok(other) => debug!(frame = ?other, "ignoring broker frame"),
                        Err(e) => warn!(error = %e, "malformed broker frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                    Some(Err(e)) => return Err(CloudError::Connect(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
