//! Managed OCR strategy
//!
//! Wraps an external OCR service that offers a synchronous call for
//! short documents and an asynchronous job API for longer ones. Jobs
//! are polled with exponential backoff (2 s doubling to a 30 s cap)
//! under a 120 s ceiling; blowing the ceiling is a non-retriable
//! timeout.

use super::{ExtractError, ExtractedPage, OcrEngine};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Page count at or below which the synchronous call is used.
const SYNC_PAGE_THRESHOLD: usize = 3;

const POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);
const POLL_MAX_DELAY: Duration = Duration::from_secs(30);
const POLL_CEILING: Duration = Duration::from_secs(120);

/// State of an asynchronous OCR job.
#[derive(Debug, Clone)]
pub enum OcrJobStatus {
    InProgress,
    Succeeded(Vec<ExtractedPage>),
    Failed(String),
}

/// External managed OCR service seam.
#[async_trait]
pub trait ManagedOcrClient: Send + Sync {
    /// Synchronous detection over raw bytes (short documents only).
    async fn detect_sync(&self, bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractError>;

    /// Start an asynchronous job against a stored object. Returns the
    /// job id.
    async fn start_job(&self, storage_key: &str) -> Result<String, ExtractError>;

    async fn poll_job(&self, job_id: &str) -> Result<OcrJobStatus, ExtractError>;
}

/// OCR strategy backed by a [`ManagedOcrClient`].
pub struct ManagedOcrEngine<C> {
    client: C,
    /// Force the job API even for short documents (deployments that
    /// prefer passing a storage reference over raw bytes).
    prefer_storage_ref: bool,
}

impl<C: ManagedOcrClient> ManagedOcrEngine<C> {
    #[must_use]
    pub const fn new(client: C) -> Self {
        Self {
            client,
            prefer_storage_ref: false,
        }
    }

    #[must_use]
    pub const fn with_storage_ref_preference(mut self, prefer: bool) -> Self {
        self.prefer_storage_ref = prefer;
        self
    }

    async fn run_job(&self, storage_key: &str) -> Result<Vec<ExtractedPage>, ExtractError> {
        let job_id = self.client.start_job(storage_key).await?;
        info!(job_id, storage_key, "managed OCR job started");

        let mut waited = Duration::ZERO;
        let mut delay = POLL_INITIAL_DELAY;

        loop {
            match self.client.poll_job(&job_id).await? {
                OcrJobStatus::Succeeded(pages) => {
                    info!(job_id, pages = pages.len(), "managed OCR job succeeded");
                    return Ok(pages);
                }
                OcrJobStatus::Failed(message) => {
                    return Err(ExtractError::OcrFailed { message });
                }
                OcrJobStatus::InProgress => {}
            }

            if waited >= POLL_CEILING {
                return Err(ExtractError::OcrTimeout);
            }

            debug!(job_id, delay_secs = delay.as_secs(), "OCR job still running");
            tokio::time::sleep(delay).await;
            waited += delay;
            delay = (delay * 2).min(POLL_MAX_DELAY);
        }
    }
}

#[async_trait]
impl<C: ManagedOcrClient> OcrEngine for ManagedOcrEngine<C> {
    async fn extract(
        &self,
        bytes: &[u8],
        storage_key: &str,
        page_hint: usize,
    ) -> Result<Vec<ExtractedPage>, ExtractError> {
        if page_hint <= SYNC_PAGE_THRESHOLD && !self.prefer_storage_ref {
            return self.client.detect_sync(bytes).await;
        }
        self.run_job(storage_key).await
    }

    fn name(&self) -> &'static str {
        "managed_ocr"
    }
}
