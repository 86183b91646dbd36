//! The bridge event loop.
//!
//! [`Bridge::run`] owns every queue feeding the cloud:
//!
//! ```text
//!  cloud inbound ──► route by short topic ──► dispatcher / containers / toggles
//!  middleware samples ──► throttle + encode ──► data/ingest
//!  middleware logs ──► local debug log (+ logs/ingest when enabled)
//!  vitals sampler ──► vitals/ingest (when enabled)
//! ```
//!
//! Everything leaves through one [`Outbox`], so no producer ever waits on the
//! network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use airbridge_cloud::presence;
use airbridge_cloud::{
    CloudError, CloudLink, CloudMessage, InboundTopic, Outbox, OutboundTopic, QoS, TopicPrefix,
};
use airbridge_middleware::{CommandDispatcher, MiddlewareClient, MiddlewareLog, SampleEvent};
use airbridge_types::{
    CollectionToggle, ContainerConfirm, ContainerState, ContainerUpdate, ErrorCode, LogLevel,
    LogLine, Vitals, iso_timestamp,
};
use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::containers::{ContainerManager, apply_update};

pub struct Bridge {
    prefix: TopicPrefix,
    link: Arc<dyn CloudLink>,
    outbox: Outbox,
    writer: JoinHandle<()>,
    dispatcher: Arc<CommandDispatcher>,
    containers: Arc<dyn ContainerManager>,
    forward_logs: AtomicBool,
    forward_vitals: AtomicBool,
}

impl Bridge {
    pub fn new(
        prefix: TopicPrefix,
        link: Arc<dyn CloudLink>,
        dispatcher: Arc<CommandDispatcher>,
        containers: Arc<dyn ContainerManager>,
    ) -> Self {
        let (outbox, writer) = Outbox::spawn(link.clone(), prefix.clone());
        Self {
            prefix,
            link,
            outbox,
            writer,
            dispatcher,
            containers,
            forward_logs: AtomicBool::new(false),
            forward_vitals: AtomicBool::new(false),
        }
    }

    /// Run until `shutdown` flips to `true` or the inbound channel closes.
    ///
    /// Announces the bridge offline and flushes the outbox before returning.
    pub async fn run(
        self,
        middleware: Arc<dyn MiddlewareClient>,
        mut inbound: mpsc::UnboundedReceiver<CloudMessage>,
        mut samples: mpsc::Receiver<SampleEvent>,
        mut vitals: Option<mpsc::Receiver<Vitals>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CloudError> {
        for topic in InboundTopic::ALL {
            self.link
                .subscribe(&self.prefix.inbound(topic), QoS::AtMostOnce)
                .await?;
        }
        let (logs_tx, mut logs) = mpsc::unbounded_channel::<MiddlewareLog>();
        middleware.on_log(Arc::new(move |log: MiddlewareLog| {
            let _ = logs_tx.send(log);
        }));

        self.outbox.send(OutboundTopic::Presence, &presence::online())?;

        info!(client_id = %self.prefix.client_id(), "bridge running");
        let mut container_jobs = JoinSet::new();

        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.on_cloud_message(msg, &mut container_jobs).await,
                    None => {
                        warn!("cloud link closed its inbound channel");
                        break;
                    }
                },
                Some(sample) = samples.recv() => {
                    if let Some(envelope) = self.dispatcher.on_sample(sample).await {
                        self.publish(OutboundTopic::DataIngest, &envelope);
                    }
                }
                Some(log) = logs.recv() => self.on_middleware_log(log),
                Some(snapshot) = next_vitals(&mut vitals) => {
                    if self.forward_vitals.load(Ordering::Relaxed) {
                        self.publish(OutboundTopic::VitalsIngest, &snapshot);
                    }
                }
                Some(joined) = container_jobs.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "container task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
            }
        }

        container_jobs.shutdown().await;
        self.outbox.send(OutboundTopic::Presence, &presence::offline())?;

        // The writer ends once the last outbox handle is gone and its queue
        // is drained.
        let Bridge { outbox, writer, .. } = self;
        drop(outbox);
        if let Err(e) = writer.await {
            error!(error = %e, "outbox writer failed");
        }
        Ok(())
    }

    fn publish<T: Serialize>(&self, topic: OutboundTopic, payload: &T) {
        if let Err(e) = self.outbox.send(topic, payload) {
            warn!(topic = %topic, error = %e, "failed to queue cloud message");
        }
    }

    // ── Inbound routing ─────────────────────────────────────────────────────

    async fn on_cloud_message(&self, msg: CloudMessage, container_jobs: &mut JoinSet<()>) {
        let Some(topic) = self.prefix.strip(&msg.topic).and_then(InboundTopic::from_short) else {
            error!(topic = %msg.topic, "message on unknown topic ignored");
            return;
        };
        let data: Value = match serde_json::from_slice(&msg.payload) {
            Ok(data) => data,
            Err(e) => {
                warn!(topic = %topic, error = %e, "malformed JSON payload dropped");
                return;
            }
        };
        debug!(topic = %topic, "cloud message received");

        match topic {
            InboundTopic::CommandsSend => {
                let result = self.dispatcher.dispatch(&data).await;
                self.publish(OutboundTopic::CommandsConfirm, &result);
            }
            InboundTopic::ContainersConfig => {
                let containers = self.containers.clone();
                let outbox = self.outbox.clone();
                container_jobs.spawn(async move {
                    let confirm = container_update(containers.as_ref(), &data).await;
                    if let Err(e) = outbox.send(OutboundTopic::ContainersConfirm, &confirm) {
                        warn!(error = %e, "failed to queue container confirmation");
                    }
                });
            }
            InboundTopic::LogsConfig => toggle(&self.forward_logs, "logs", &data),
            InboundTopic::VitalsConfig => toggle(&self.forward_vitals, "vitals", &data),
            InboundTopic::DataConfig => {
                if let Err(e) = self.dispatcher.configure_data(&data).await {
                    warn!(error = %e, "data configuration rejected");
                }
            }
        }
    }

    fn on_middleware_log(&self, log: MiddlewareLog) {
        debug!(logger = %log.name, level = log.level, "{}", log.msg);
        if self.forward_logs.load(Ordering::Relaxed) {
            self.publish(OutboundTopic::LogsIngest, &log_line(log));
        }
    }
}

async fn next_vitals(vitals: &mut Option<mpsc::Receiver<Vitals>>) -> Option<Vitals> {
    match vitals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn toggle(flag: &AtomicBool, what: &str, data: &Value) {
    match serde_json::from_value::<CollectionToggle>(data.clone()) {
        Ok(CollectionToggle { enabled }) => {
            info!(enabled, "updating {what} configuration");
            flag.store(enabled, Ordering::Relaxed);
        }
        Err(e) => warn!(error = %e, "invalid {what} configuration"),
    }
}

async fn container_update(containers: &dyn ContainerManager, data: &Value) -> ContainerConfirm {
    match serde_json::from_value::<ContainerUpdate>(data.clone()) {
        Ok(update) => {
            let state = apply_update(containers, &update).await;
            info!(uuid = %update.uuid, state = ?state.state, "container update applied");
            ContainerConfirm { state, uuid: update.uuid }
        }
        Err(e) => {
            let uuid = data.get("uuid").and_then(Value::as_str).unwrap_or_default();
            warn!(uuid = %uuid, error = %e, "invalid container update");
            ContainerConfirm {
                state: ContainerState::error(ErrorCode::UnknownError.as_str()),
                uuid: uuid.to_string(),
            }
        }
    }
}

/// Convert a middleware log record for `logs/ingest`.
pub fn log_line(log: MiddlewareLog) -> LogLine {
    // Second resolution, like the middleware's own console output.
    let stamp = DateTime::from_timestamp(log.stamp_sec, 0)
        .map(iso_timestamp)
        .unwrap_or_default();
    LogLine {
        msg: log.msg,
        level: LogLevel::from_severity(log.level),
        name: log.name,
        file: log.file,
        function: log.function,
        line: log.line,
        stamp,
    }
}
