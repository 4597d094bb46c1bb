//! Worker dispatch loop
//!
//! Prefetch of one task per worker: a delivery is taken, processed to
//! completion, and only then acknowledged. Failed tasks are re-queued
//! onto the retry queue with exponential backoff (30 s doubling) up to
//! three retries, then dead-lettered. A soft timeout marks the
//! document failed before the task future is dropped; the hard timeout
//! bounds the whole delivery.

use crate::processor::{DocumentProcessor, ProcessDocumentArgs, TaskOutcome};
use parking_lot::Mutex;
use ragvault_core::traits::broker::{Delivery, QueueName, TaskBroker, TaskMessage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u64 = 3;
const RETRY_BASE_SECONDS: u64 = 30;
const SOFT_TIMEOUT: Duration = Duration::from_secs(270);
const HARD_TIMEOUT: Duration = Duration::from_secs(330);

/// Outcome of one `poll_once` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Idle,
    Completed,
    Skipped,
    RetryScheduled { attempt: u64 },
    DeadLettered,
}

/// One worker's dispatch loop over the broker queues.
pub struct WorkerRuntime {
    broker: Arc<dyn TaskBroker>,
    processor: Arc<DocumentProcessor>,
    dead_letters: Mutex<Vec<TaskMessage>>,
    soft_timeout: Duration,
    hard_timeout: Duration,
}

impl WorkerRuntime {
    #[must_use]
    pub fn new(broker: Arc<dyn TaskBroker>, processor: Arc<DocumentProcessor>) -> Self {
        Self {
            broker,
            processor,
            dead_letters: Mutex::new(Vec::new()),
            soft_timeout: SOFT_TIMEOUT,
            hard_timeout: HARD_TIMEOUT,
        }
    }

    /// Shorter timeouts for tests.
    #[must_use]
    pub const fn with_timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_timeout = soft;
        self.hard_timeout = hard;
        self
    }

    /// Messages that exhausted their retries.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<TaskMessage> {
        self.dead_letters.lock().clone()
    }

    /// Run until cancelled, polling the primary queue first and the
    /// retry queue when the primary is empty.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("worker runtime started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("worker runtime stopping");
                    return;
                }
                result = self.poll_once() => {
                    if matches!(result, PollResult::Idle) {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }

    /// Take and fully process at most one delivery.
    pub async fn poll_once(&self) -> PollResult {
        for queue in [
            QueueName::DocumentsIngest,
            QueueName::DocumentsRetry,
            QueueName::SystemHealth,
        ] {
            match self.broker.receive(queue).await {
                Ok(Some(delivery)) => {
                    if queue == QueueName::SystemHealth {
                        // Liveness pings carry no work.
                        let _ = self.broker.ack(delivery.tag).await;
                        return PollResult::Completed;
                    }
                    return self.handle_delivery(delivery).await;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(queue = %queue, error = %err, "broker receive failed");
                    return PollResult::Idle;
                }
            }
        }
        PollResult::Idle
    }

    async fn handle_delivery(&self, delivery: Delivery) -> PollResult {
        let args: ProcessDocumentArgs =
            match serde_json::from_value(delivery.message.kwargs.clone()) {
                Ok(args) => args,
                Err(err) => {
                    error!(error = %err, task = %delivery.message.task, "malformed task payload");
                    self.dead_letters.lock().push(delivery.message.clone());
                    let _ = self.broker.ack(delivery.tag).await;
                    return PollResult::DeadLettered;
                }
            };

        let outcome = tokio::time::timeout(self.hard_timeout, self.run_task(&args)).await;
        match outcome {
            Ok(Ok(TaskOutcome::Completed { .. })) => {
                let _ = self.broker.ack(delivery.tag).await;
                return PollResult::Completed;
            }
            Ok(Ok(
                TaskOutcome::Skipped { .. }
                | TaskOutcome::NotFound
                | TaskOutcome::FailedPermanently { .. },
            )) => {
                let _ = self.broker.ack(delivery.tag).await;
                return PollResult::Skipped;
            }
            Ok(Err(err)) => {
                warn!(document_id = %args.document_id, error = %err, "task failed");
            }
            Err(_elapsed) => {
                error!(document_id = %args.document_id, "task hit the hard timeout");
            }
        }

        // Acknowledge the delivery, then schedule the retry (the retry
        // message itself is the continuation).
        let _ = self.broker.ack(delivery.tag).await;

        let attempt = delivery.message.kwargs["retries"].as_u64().unwrap_or(0);
        if attempt >= MAX_RETRIES {
            error!(
                document_id = %args.document_id,
                attempts = attempt,
                "retries exhausted, dead-lettering"
            );
            self.dead_letters.lock().push(delivery.message);
            return PollResult::DeadLettered;
        }

        let delay = Duration::from_secs(RETRY_BASE_SECONDS * 2u64.pow(u32::try_from(attempt).unwrap_or(0)));
        let mut kwargs = delivery.message.kwargs;
        if let Value::Object(map) = &mut kwargs {
            map.insert("retries".to_string(), Value::from(attempt + 1));
        }
        let retry_message = TaskMessage::new(delivery.message.task, kwargs);
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = broker.publish(QueueName::DocumentsRetry, retry_message).await {
                error!(error = %err, "could not publish retry message");
            }
        });
        debug!(attempt = attempt + 1, delay_secs = delay.as_secs(), "retry scheduled");
        PollResult::RetryScheduled { attempt: attempt + 1 }
    }

    /// Run the processor under the soft timeout. On a soft timeout the
    /// document is marked failed before the task future is dropped.
    async fn run_task(
        &self,
        args: &ProcessDocumentArgs,
    ) -> Result<TaskOutcome, crate::processor::ProcessError> {
        match tokio::time::timeout(self.soft_timeout, self.processor.process(args)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(document_id = %args.document_id, "soft timeout exceeded");
                self.processor
                    .mark_timed_out(args.tenant_id, args.document_id)
                    .await;
                Ok(TaskOutcome::FailedPermanently {
                    reason: "task timed out (soft limit)".to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("dead_letters", &self.dead_letters.lock().len())
            .field("soft_timeout", &self.soft_timeout)
            .finish_non_exhaustive()
    }
}
