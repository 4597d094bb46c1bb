//! Upload progress streaming
//!
//! Pairs an upload request with a progress stream through a
//! client-supplied upload token. Queues are bounded at 200 events and
//! drop new progress rather than blocking the uploader. Streams
//! heartbeat every second to defeat proxy buffering, terminate on
//! client disconnect via the cancellation token, and are forcibly
//! closed after a 300 s TTL.

use async_trait::async_trait;
use dashmap::DashMap;
use ragvault_storage::{ProgressSink, UploadProgress};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Bounded capacity of one progress queue.
const QUEUE_CAPACITY: usize = 200;

/// Hard TTL on any progress stream.
const STREAM_TTL: Duration = Duration::from_secs(300);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Events delivered over the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Connected,
    UploadProgress {
        stage: String,
        bytes_received: u64,
        bytes_total: u64,
        percent: f64,
    },
    Done,
    Timeout,
    /// Rendered as an SSE comment line, not a data event.
    Heartbeat,
}

struct Channel {
    tx: mpsc::Sender<ProgressEvent>,
}

/// Process-wide registry pairing upload tokens with subscribers.
/// Clones are handles to the same registry.
#[derive(Clone, Default)]
pub struct ProgressBroker {
    channels: Arc<DashMap<Uuid, Channel>>,
}

impl ProgressBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the stream side for a token. Returns the event receiver and
    /// a cancellation token the HTTP layer trips on client disconnect.
    #[must_use]
    pub fn subscribe(&self, token: Uuid) -> (mpsc::Receiver<ProgressEvent>, CancellationToken) {
        let (raw_tx, mut raw_rx) = mpsc::channel::<ProgressEvent>(QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<ProgressEvent>(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        self.channels.insert(token, Channel { tx: raw_tx });

        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = out_tx.send(ProgressEvent::Connected).await;
            let deadline = tokio::time::sleep(STREAM_TTL);
            tokio::pin!(deadline);
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    event = raw_rx.recv() => {
                        match event {
                            Some(event) => {
                                let finished = matches!(event, ProgressEvent::Done);
                                // Drop on a full subscriber queue rather
                                // than blocking the uploader.
                                let _ = out_tx.try_send(event);
                                if finished {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = heartbeat.tick() => {
                        let _ = out_tx.try_send(ProgressEvent::Heartbeat);
                    }
                    () = &mut deadline => {
                        let _ = out_tx.send(ProgressEvent::Timeout).await;
                        break;
                    }
                    () = pump_cancel.cancelled() => {
                        debug!(%token, "progress stream cancelled by client");
                        break;
                    }
                }
            }
        });

        (out_rx, cancel)
    }

    /// Sink handed to the uploader for this token. Emissions to tokens
    /// nobody subscribed to are dropped silently.
    #[must_use]
    pub fn sink_for(&self, token: Uuid, stage: impl Into<String>) -> Arc<dyn ProgressSink> {
        Arc::new(TokenSink {
            broker: self.clone(),
            token,
            stage: stage.into(),
        })
    }

    /// Signal successful completion and tear the channel down.
    pub async fn complete(&self, token: Uuid) {
        if let Some((_, channel)) = self.channels.remove(&token) {
            let _ = channel.tx.send(ProgressEvent::Done).await;
        }
    }

    fn emit(&self, token: Uuid, event: ProgressEvent) {
        if let Some(channel) = self.channels.get(&token) {
            // Full queue: drop the event, never block the upload path.
            let _ = channel.tx.try_send(event);
        }
    }

    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.channels.len()
    }
}

struct TokenSink {
    broker: ProgressBroker,
    token: Uuid,
    stage: String,
}

#[async_trait]
impl ProgressSink for TokenSink {
    async fn emit(&self, progress: UploadProgress) {
        self.broker.emit(
            self.token,
            ProgressEvent::UploadProgress {
                stage: self.stage.clone(),
                bytes_received: progress.bytes_received,
                bytes_total: progress.bytes_total_hint,
                percent: progress.percent,
            },
        );
    }
}
