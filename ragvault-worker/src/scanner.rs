//! Stuck-task scanner
//!
//! Every 60 seconds, re-queue documents stuck in `pending` for more
//! than five minutes. This recovers from broker outages at upload time
//! and from workers that died before taking the task. The scan crosses
//! tenant boundaries intentionally; each re-queued task carries its
//! owner's tenant id. Batches are capped at 50 per tick to bound
//! database contention.

use ragvault_core::traits::broker::{QueueName, TaskBroker, TaskMessage};
use ragvault_core::traits::clock::Clock;
use ragvault_core::traits::repository::DocumentRepository;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SCAN_INTERVAL: Duration = Duration::from_secs(60);
const STUCK_AFTER_MINUTES: i64 = 5;
const SCAN_BATCH_LIMIT: usize = 50;

/// Periodic re-queue of stuck pending documents. The scanner itself
/// never retries; the next tick covers any failure.
pub struct RetryScanner {
    documents: Arc<dyn DocumentRepository>,
    broker: Arc<dyn TaskBroker>,
    clock: Arc<dyn Clock>,
}

impl RetryScanner {
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        broker: Arc<dyn TaskBroker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            broker,
            clock,
        }
    }

    /// One scan pass. Returns the number of documents re-queued.
    pub async fn scan_once(&self) -> usize {
        let cutoff = self.clock.now() - chrono::Duration::minutes(STUCK_AFTER_MINUTES);
        let stale = match self.documents.stale_pending(cutoff, SCAN_BATCH_LIMIT).await {
            Ok(stale) => stale,
            Err(err) => {
                warn!(error = %err, "stuck-document scan failed");
                return 0;
            }
        };

        let mut requeued = 0;
        for doc in stale {
            let message = TaskMessage::new(
                "process_document",
                json!({
                    "document_id": doc.id.to_string(),
                    "tenant_id": doc.tenant_id.to_string(),
                    "storage_key": doc.storage_key,
                    "content_type": doc.content_type,
                }),
            );
            match self.broker.publish(QueueName::DocumentsRetry, message).await {
                Ok(()) => requeued += 1,
                Err(err) => {
                    warn!(document_id = %doc.id, error = %err, "re-queue failed");
                }
            }
        }

        if requeued > 0 {
            info!(requeued, "stuck documents re-queued");
        }
        requeued
    }

    /// Run forever on the scan interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
            }
        }
    }
}
