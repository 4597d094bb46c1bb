//! The `process_document` task
//!
//! All steps run against a tenant-bound view derived from the task
//! payload. Empty extraction, empty chunking, or a fully failed
//! embedding pass mark the document `failed` and finish without retry
//! (re-running would hit the same wall); infrastructure failures
//! surface as errors so the runtime can retry them.

use chrono::Utc;
use ragvault_core::traits::object_store::ObjectStore;
use ragvault_core::traits::provider::EmbeddingProvider;
use ragvault_core::traits::repository::{AuditSink, ChunkRepository, DocumentRepository};
use ragvault_core::{actions, AuditEvent, ChunkRecord, DocumentStatus};
use ragvault_ingest::{EmbeddingPipeline, ExtractionCascade, SemanticChunker};
use ragvault_storage::VectorStore;
use ragvault_tenancy::TenantVectorManager;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Task payload, carried as JSON keyword arguments on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDocumentArgs {
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub storage_key: String,
    pub content_type: String,
}

/// Retriable infrastructure failures.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("storage download failed: {message}")]
    Download { message: String },

    #[error("vector upsert failed: {message}")]
    Upsert { message: String },

    #[error("repository failure: {message}")]
    Repo { message: String },
}

/// How one task invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Status gate hit: the document is already processed or being
    /// processed.
    Skipped { status: DocumentStatus },
    /// Unknown id or tenant mismatch; nothing to do.
    NotFound,
    /// Document transitioned to `ready`.
    Completed {
        chunk_count: u32,
        vector_count: u32,
        total_tokens: u64,
    },
    /// Document transitioned to `failed`; retrying cannot help.
    FailedPermanently { reason: String },
}

/// Executes the ten-step processing pipeline for one document.
pub struct DocumentProcessor {
    documents: Arc<dyn DocumentRepository>,
    chunks: Arc<dyn ChunkRepository>,
    audit: Arc<dyn AuditSink>,
    object_store: Arc<dyn ObjectStore>,
    vectors: Arc<TenantVectorManager>,
    cascade: Arc<ExtractionCascade>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: SemanticChunker,
}

impl DocumentProcessor {
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        chunks: Arc<dyn ChunkRepository>,
        audit: Arc<dyn AuditSink>,
        object_store: Arc<dyn ObjectStore>,
        vectors: Arc<TenantVectorManager>,
        cascade: Arc<ExtractionCascade>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            documents,
            chunks,
            audit,
            object_store,
            vectors,
            cascade,
            embedder,
            chunker: SemanticChunker::new(),
        }
    }

    /// Run the pipeline. Idempotent: a second sequential call for the
    /// same document is a no-op via the status gate.
    ///
    /// # Errors
    /// Only infrastructure failures the runtime should retry.
    pub async fn process(&self, args: &ProcessDocumentArgs) -> Result<TaskOutcome, ProcessError> {
        let task_start = Instant::now();
        let tenant_id = args.tenant_id;
        let document_id = args.document_id;

        // Step 1: idempotency gate.
        let Some(doc) = self
            .documents
            .get(tenant_id, document_id)
            .await
            .map_err(repo_err)?
        else {
            warn!(document_id = %document_id, "document not found or tenant mismatch");
            return Ok(TaskOutcome::NotFound);
        };
        if matches!(doc.status, DocumentStatus::Ready | DocumentStatus::Processing) {
            info!(document_id = %document_id, status = %doc.status, "skipping document");
            return Ok(TaskOutcome::Skipped { status: doc.status });
        }

        // Step 2: visible to the status endpoint immediately.
        self.documents
            .set_status(tenant_id, document_id, DocumentStatus::Processing, None)
            .await
            .map_err(repo_err)?;

        // Step 3: download, with the key prefix check as defence in
        // depth against tampering.
        let expected_prefix = format!("tenants/{tenant_id}/");
        if !args.storage_key.starts_with(&expected_prefix) {
            let reason = format!(
                "storage key {:?} does not match tenant prefix {expected_prefix:?}",
                args.storage_key
            );
            return self.fail(tenant_id, document_id, &reason).await;
        }
        let t_download = Instant::now();
        let bytes = match self.object_store.get_object(&args.storage_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.mark_failed_for_retry(tenant_id, document_id, &err.to_string())
                    .await;
                return Err(ProcessError::Download {
                    message: err.to_string(),
                });
            }
        };
        let download_ms = elapsed_ms(t_download);

        // Step 4: extraction cascade.
        let t_extract = Instant::now();
        let extraction = match self
            .cascade
            .extract(&bytes, &args.content_type, &args.storage_key)
            .await
        {
            Ok(extraction) => extraction,
            Err(err) => return self.fail(tenant_id, document_id, &err.to_string()).await,
        };
        let extract_ms = elapsed_ms(t_extract);
        if extraction.full_text.trim().is_empty() {
            return self.fail(tenant_id, document_id, "no text extracted").await;
        }

        // Step 5: semantic chunking.
        let t_chunk = Instant::now();
        let extra_meta = std::collections::HashMap::from([
            ("content_type".to_string(), json!(args.content_type)),
            ("strategy_used".to_string(), json!(extraction.strategy_used)),
            ("used_ocr".to_string(), json!(extraction.used_ocr)),
        ]);
        let text_chunks = self.chunker.chunk(
            &extraction.full_text,
            tenant_id,
            document_id,
            &args.storage_key,
            Some(&extraction.page_map),
            Some(&extra_meta),
        );
        let chunk_ms = elapsed_ms(t_chunk);
        if text_chunks.is_empty() {
            return self.fail(tenant_id, document_id, "no chunks produced").await;
        }

        // Step 6: batched embedding.
        let t_embed = Instant::now();
        let pipeline = EmbeddingPipeline::new(Arc::clone(&self.embedder), tenant_id);
        let embedding = pipeline.embed_chunks(&text_chunks).await;
        let embed_ms = elapsed_ms(t_embed);
        if embedding.vector_records.is_empty() {
            return self
                .fail(tenant_id, document_id, "all embedding batches failed")
                .await;
        }

        // Step 7: tenant-isolated vector upsert.
        let t_upsert = Instant::now();
        let store = self.vectors.store_for_tenant(tenant_id);
        let vector_count = match store.upsert(embedding.vector_records, 100).await {
            Ok(count) => count,
            Err(err) => {
                self.mark_failed_for_retry(tenant_id, document_id, &err.to_string())
                    .await;
                return Err(ProcessError::Upsert {
                    message: err.to_string(),
                });
            }
        };
        let upsert_ms = elapsed_ms(t_upsert);

        // Step 8: persist chunk rows for everything that embedded.
        let failed: HashSet<u32> = embedding.failed_chunk_indices.iter().copied().collect();
        let rows: Vec<ChunkRecord> = text_chunks
            .iter()
            .filter(|c| !failed.contains(&c.chunk_index))
            .map(|c| ChunkRecord {
                id: Uuid::new_v4(),
                tenant_id,
                document_id,
                chunk_index: c.chunk_index,
                text: c.text.clone(),
                token_count: c.token_est,
                vector_id: c.chunk_id.clone(),
                vector_store: self.vectors.backend_label().to_string(),
                created_at: Utc::now(),
            })
            .collect();
        let chunk_count = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        self.chunks.insert_many(rows).await.map_err(repo_err)?;

        // Step 9: searchable.
        let vector_count_u32 = u32::try_from(vector_count).unwrap_or(u32::MAX);
        self.documents
            .mark_ready(tenant_id, document_id, chunk_count, vector_count_u32)
            .await
            .map_err(repo_err)?;

        // Step 10: audit with the timing breakdown.
        self.append_audit(
            AuditEvent::new(tenant_id, actions::PROCESSED, true)
                .with_resource(format!("document:{document_id}"))
                .with_metadata(json!({
                    "chunk_count": chunk_count,
                    "vector_count": vector_count_u32,
                    "total_tokens": embedding.total_tokens,
                    "strategy_used": extraction.strategy_used,
                    "used_ocr": extraction.used_ocr,
                    "page_count": extraction.page_count,
                    "download_ms": download_ms,
                    "extract_ms": extract_ms,
                    "chunk_ms": chunk_ms,
                    "embed_ms": embed_ms,
                    "upsert_ms": upsert_ms,
                    "total_ms": elapsed_ms(task_start),
                })),
        )
        .await;

        info!(
            tenant_id = %tenant_id,
            document_id = %document_id,
            chunk_count,
            vector_count,
            total_ms = elapsed_ms(task_start),
            "document processed"
        );

        Ok(TaskOutcome::Completed {
            chunk_count,
            vector_count: vector_count_u32,
            total_tokens: embedding.total_tokens,
        })
    }

    /// Permanent failure: mark, audit, and finish without retry.
    async fn fail(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        reason: &str,
    ) -> Result<TaskOutcome, ProcessError> {
        self.mark_failed_for_retry(tenant_id, document_id, reason).await;
        Ok(TaskOutcome::FailedPermanently {
            reason: reason.to_string(),
        })
    }

    /// Soft-timeout handler: transition to `failed` before the task
    /// future is dropped.
    pub async fn mark_timed_out(&self, tenant_id: Uuid, document_id: Uuid) {
        self.mark_failed_for_retry(tenant_id, document_id, "task timed out (soft limit)")
            .await;
    }

    /// Transition to `failed` and write the failure audit row. Used by
    /// both permanent failures and pre-retry failures; a later retry
    /// passes the status gate because `failed` is re-processable.
    async fn mark_failed_for_retry(&self, tenant_id: Uuid, document_id: Uuid, reason: &str) {
        if let Err(err) = self
            .documents
            .set_status(
                tenant_id,
                document_id,
                DocumentStatus::Failed,
                Some(reason.to_string()),
            )
            .await
        {
            error!(document_id = %document_id, error = %err, "could not mark document failed");
        }
        self.append_audit(
            AuditEvent::new(tenant_id, actions::PROCESSING_FAILED, false)
                .with_resource(format!("document:{document_id}"))
                .with_metadata(json!({ "reason": reason })),
        )
        .await;
        error!(document_id = %document_id, reason, "document marked failed");
    }

    async fn append_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.append(event).await {
            error!(error = %err, "audit append failed");
        }
    }
}

fn repo_err(err: ragvault_core::traits::repository::RepoError) -> ProcessError {
    ProcessError::Repo {
        message: err.to_string(),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
