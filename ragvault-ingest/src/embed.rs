//! Batched embedding pipeline
//!
//! Stateless per task: batches of 100 inputs per upstream call, at most
//! four batches in flight, and up to three retries per batch with
//! exponential backoff. Auth and invalid-request errors fail a batch
//! immediately. Batches that fail permanently are reported by chunk
//! index; the pipeline still returns whatever succeeded.

use crate::chunker::TextChunk;
use futures::future::join_all;
use ragvault_core::traits::provider::{EmbeddingProvider, ProviderError};
use ragvault_storage::VectorRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

const BATCH_SIZE: usize = 100;
const MAX_CONCURRENT_BATCHES: usize = 4;
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Pipeline output for one document.
#[derive(Debug)]
pub struct EmbeddingOutput {
    /// Records ready for vector upsert, in chunk order.
    pub vector_records: Vec<VectorRecord>,
    pub total_chunks: usize,
    pub total_tokens: u64,
    pub elapsed_ms: u64,
    /// Chunk indices that could not be embedded after all retries.
    pub failed_chunk_indices: Vec<u32>,
}

impl EmbeddingOutput {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.total_chunks - self.failed_chunk_indices.len()) as f64 / self.total_chunks as f64
        }
    }
}

/// One pipeline instance per worker task. The concurrency semaphore is
/// scoped to the instance, not the process.
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    tenant_id: Uuid,
}

impl EmbeddingPipeline {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, tenant_id: Uuid) -> Self {
        Self {
            provider,
            tenant_id,
        }
    }

    /// Embed all chunks with bounded concurrency and per-batch retry.
    pub async fn embed_chunks(&self, chunks: &[TextChunk]) -> EmbeddingOutput {
        if chunks.is_empty() {
            return EmbeddingOutput {
                vector_records: Vec::new(),
                total_chunks: 0,
                total_tokens: 0,
                elapsed_ms: 0,
                failed_chunk_indices: Vec::new(),
            };
        }

        let start = Instant::now();
        let batches: Vec<&[TextChunk]> = chunks.chunks(BATCH_SIZE).collect();
        info!(
            tenant_id = %self.tenant_id,
            chunks = chunks.len(),
            batches = batches.len(),
            model = self.provider.model_id(),
            "embedding pipeline start"
        );

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_BATCHES));
        let tasks = batches.iter().enumerate().map(|(batch_idx, batch)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                self.embed_batch_with_retry(batch, batch_idx).await
            }
        });
        let batch_results = join_all(tasks).await;

        let mut vector_records = Vec::with_capacity(chunks.len());
        let mut failed_chunk_indices = Vec::new();
        let mut total_tokens = 0u64;

        for (batch, result) in batches.iter().zip(batch_results) {
            match result {
                Ok((records, tokens)) => {
                    vector_records.extend(records);
                    total_tokens += tokens;
                }
                Err(err) => {
                    error!(error = %err, "embedding batch permanently failed");
                    failed_chunk_indices.extend(batch.iter().map(|c| c.chunk_index));
                }
            }
        }

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            tenant_id = %self.tenant_id,
            vectors = vector_records.len(),
            failed = failed_chunk_indices.len(),
            total_tokens,
            elapsed_ms,
            "embedding pipeline done"
        );

        EmbeddingOutput {
            total_chunks: chunks.len(),
            vector_records,
            total_tokens,
            elapsed_ms,
            failed_chunk_indices,
        }
    }

    /// Embed a single query string with the same model used at
    /// ingestion time.
    ///
    /// # Errors
    /// The provider error, unretried; query-time callers have their own
    /// latency budget.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let batch = self.provider.embed_batch(&[text.to_string()]).await?;
        batch.vectors.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                self.provider.model_id(),
                ragvault_core::traits::provider::ProviderErrorKind::InvalidRequest,
                "provider returned no vector for query",
            )
        })
    }

    async fn embed_batch_with_retry(
        &self,
        batch: &[TextChunk],
        batch_idx: usize,
    ) -> Result<(Vec<VectorRecord>, u64), ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let exponent = attempt - 1;
                let delay = RETRY_BASE_DELAY
                    .saturating_mul(2u32.saturating_pow(exponent))
                    .min(RETRY_MAX_DELAY);
                warn!(
                    batch_idx,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = last_error.as_ref().map(ToString::to_string),
                    "embedding batch retry"
                );
                tokio::time::sleep(delay).await;
            }

            match self.call_provider(batch).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retriable() => {
                    last_error = Some(err);
                }
                Err(err) => {
                    error!(batch_idx, error = %err, "non-retriable embedding error");
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::new(
                self.provider.model_id(),
                ragvault_core::traits::provider::ProviderErrorKind::ServerError,
                "embedding batch failed with no recorded error",
            )
        }))
    }

    async fn call_provider(
        &self,
        batch: &[TextChunk],
    ) -> Result<(Vec<VectorRecord>, u64), ProviderError> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let result = self.provider.embed_batch(&texts).await?;

        let records = batch
            .iter()
            .zip(result.vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.chunk_id.clone(),
                vector,
                metadata: chunk.metadata.clone(),
            })
            .collect();
        Ok((records, result.total_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::SemanticChunker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use ragvault_core::traits::provider::{EmbeddingBatch, ProviderErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails the first `failures` calls with `kind`.
    struct FlakyProvider {
        calls: AtomicUsize,
        failures: usize,
        kind: ProviderErrorKind,
        tokens_per_call: u64,
    }

    impl FlakyProvider {
        fn reliable() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures: 0,
                kind: ProviderErrorKind::ServerError,
                tokens_per_call: 10,
            }
        }

        fn failing_first(failures: usize, kind: ProviderErrorKind) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                kind,
                tokens_per_call: 10,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProviderError::new("fake-embed", self.kind, "scripted failure"));
            }
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|_| vec![0.5f32; 4]).collect(),
                total_tokens: self.tokens_per_call,
            })
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_id(&self) -> &str {
            "fake-embed"
        }
    }

    fn chunks(n: usize) -> Vec<TextChunk> {
        let paragraph = "A sentence of filler content for embedding tests, repeated to pass the minimum chunk length requirement comfortably in every case. "
            .repeat(2);
        let text = (0..n.max(1))
            .map(|i| format!("Paragraph {i}. {}", paragraph.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let produced = SemanticChunker::new().chunk(
            &text,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "key",
            None,
            None,
        );
        assert!(produced.len() >= n, "fixture produced too few chunks");
        produced.into_iter().take(n).collect()
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let pipeline = EmbeddingPipeline::new(Arc::new(FlakyProvider::reliable()), Uuid::new_v4());
        let out = pipeline.embed_chunks(&[]).await;
        assert_eq!(out.total_chunks, 0);
        assert!((out.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn records_align_with_chunks() {
        let pipeline = EmbeddingPipeline::new(Arc::new(FlakyProvider::reliable()), Uuid::new_v4());
        let input = chunks(2);
        let out = pipeline.embed_chunks(&input).await;

        assert_eq!(out.vector_records.len(), input.len());
        assert!(out.failed_chunk_indices.is_empty());
        for (record, chunk) in out.vector_records.iter().zip(&input) {
            assert_eq!(record.id, chunk.chunk_id);
            assert_eq!(record.metadata["tenant_id"], chunk.metadata["tenant_id"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let provider = Arc::new(FlakyProvider::failing_first(
            2,
            ProviderErrorKind::RateLimited,
        ));
        let pipeline = EmbeddingPipeline::new(provider.clone(), Uuid::new_v4());
        let out = pipeline.embed_chunks(&chunks(1)).await;

        assert!(out.failed_chunk_indices.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_into_partial_output() {
        let provider = Arc::new(FlakyProvider::failing_first(
            usize::MAX,
            ProviderErrorKind::ServerError,
        ));
        let pipeline = EmbeddingPipeline::new(provider.clone(), Uuid::new_v4());
        let input = chunks(1);
        let out = pipeline.embed_chunks(&input).await;

        assert_eq!(out.vector_records.len(), 0);
        assert_eq!(out.failed_chunk_indices.len(), input.len());
        // Initial attempt plus three retries.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert!(out.success_rate() < f64::EPSILON);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let provider = Arc::new(FlakyProvider::failing_first(
            usize::MAX,
            ProviderErrorKind::AuthFailed,
        ));
        let pipeline = EmbeddingPipeline::new(provider.clone(), Uuid::new_v4());
        let out = pipeline.embed_chunks(&chunks(1)).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(!out.failed_chunk_indices.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_the_semaphore() {
        struct GaugeProvider {
            current: AtomicUsize,
            peak: Mutex<usize>,
        }

        #[async_trait]
        impl EmbeddingProvider for GaugeProvider {
            async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, ProviderError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                {
                    let mut peak = self.peak.lock();
                    *peak = (*peak).max(now);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(EmbeddingBatch {
                    vectors: texts.iter().map(|_| vec![0.0f32; 4]).collect(),
                    total_tokens: 1,
                })
            }

            fn dimensions(&self) -> usize {
                4
            }

            fn model_id(&self) -> &str {
                "gauge"
            }
        }

        let provider = Arc::new(GaugeProvider {
            current: AtomicUsize::new(0),
            peak: Mutex::new(0),
        });

        // Build >4 batches by chunking many texts: force batch count by
        // cloning one chunk 450 times (5 batches of <=100).
        let template = chunks(1).remove(0);
        let many: Vec<TextChunk> = (0..450)
            .map(|i| {
                let mut c = template.clone();
                c.chunk_index = i;
                c
            })
            .collect();

        let pipeline = EmbeddingPipeline::new(provider.clone(), Uuid::new_v4());
        let out = pipeline.embed_chunks(&many).await;

        assert_eq!(out.vector_records.len(), 450);
        assert!(*provider.peak.lock() <= MAX_CONCURRENT_BATCHES);
    }
}
