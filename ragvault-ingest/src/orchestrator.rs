//! Nine-step upload pipeline
//!
//! Validate name, fast-reject on declared size, sniff magic bytes,
//! check the allowlist, stream to object storage, dedupe, persist,
//! audit, enqueue. The tenant id comes only from the verified
//! principal; the storage key is server-constructed; the checksum is
//! computed from the actual bytes.

use crate::error::IngestError;
use crate::mime;
use ragvault_core::traits::broker::{QueueName, TaskBroker, TaskMessage};
use ragvault_core::traits::clock::Clock;
use ragvault_core::traits::ids::UuidGen;
use ragvault_core::traits::object_store::ObjectStore;
use ragvault_core::traits::repository::{AuditSink, DocumentRepository, RepoError};
use ragvault_core::{actions, AuditEvent, Document, DocumentStatus, MAX_FILE_SIZE_BYTES};
use ragvault_storage::{streaming_multipart_upload, MultipartError, ProgressSink};
use ragvault_tenancy::{ResourceType, TenantContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the async processing task published after a successful
/// upload.
pub const PROCESS_DOCUMENT_TASK: &str = "process_document";

/// One upload as received from the route glue.
pub struct UploadRequest<R> {
    pub filename: String,
    pub stream: R,
    /// Declared Content-Length, used only for fast rejection and
    /// progress percentages.
    pub content_length_hint: Option<u64>,
    pub display_name: String,
    /// Optional `document_permissions` JSON (array of role strings).
    pub permissions: Option<Value>,
    pub client_ip: Option<String>,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

/// HTTP-202-shaped success body.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub status: &'static str,
    pub checksum: String,
    pub processing_status: &'static str,
    pub storage_key: String,
    pub tenant_id: Uuid,
    pub document_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Stateless, dependency-injected orchestrator. One instance can serve
/// many requests; all side effects go through injected seams.
pub struct IngestionService {
    documents: Arc<dyn DocumentRepository>,
    audit: Arc<dyn AuditSink>,
    object_store: Arc<dyn ObjectStore>,
    broker: Arc<dyn TaskBroker>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn UuidGen>,
}

impl IngestionService {
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        audit: Arc<dyn AuditSink>,
        object_store: Arc<dyn ObjectStore>,
        broker: Arc<dyn TaskBroker>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn UuidGen>,
    ) -> Self {
        Self {
            documents,
            audit,
            object_store,
            broker,
            clock,
            ids,
        }
    }

    /// Execute the full ingestion pipeline for one upload.
    ///
    /// # Errors
    /// A typed [`IngestError`]; queue publish failure is not an error
    /// (the retry scanner recovers the document).
    pub async fn ingest<R>(
        &self,
        ctx: &TenantContext,
        request: UploadRequest<R>,
    ) -> Result<UploadResponse, IngestError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let tenant_id = ctx.tenant_id();
        let user_id = ctx.user_id();

        // Step 1: display name validation.
        let document_name = mime::validate_document_name(&request.display_name)?;
        let permissions = validate_permissions(request.permissions)?;

        // Step 2: fast rejection on the declared length, before any
        // body bytes are read.
        if let Some(declared) = request.content_length_hint {
            if declared > MAX_FILE_SIZE_BYTES {
                return Err(IngestError::PayloadTooLarge { size: declared });
            }
        }
        if request.filename.trim().is_empty() {
            return Err(IngestError::Missing);
        }

        let safe_filename = mime::sanitize_filename(&request.filename);
        let ext = mime::file_extension(&request.filename);

        self.append_audit(
            AuditEvent::new(tenant_id, actions::UPLOAD_ATTEMPT, true)
                .with_user(user_id)
                .with_metadata(json!({
                    "filename": safe_filename,
                    "document_name": document_name,
                    "size_hint": request.content_length_hint,
                }))
                .with_ip(request.client_ip.clone()),
        )
        .await;

        // Step 3: sniff exactly the first 8 bytes, then logically
        // prepend them so the uploader sees the complete stream.
        let mut reader = request.stream;
        let mut head = [0u8; 8];
        let head_len = read_head(&mut reader, &mut head).await?;
        if head_len == 0 {
            return Err(IngestError::Missing);
        }
        let full_stream = Cursor::new(head[..head_len].to_vec()).chain(reader);

        // Step 4: allowlist on detected MIME plus extension.
        let detected_mime = mime::detect_mime(&request.filename, &head[..head_len]);
        mime::check_allowlist(&request.filename, &detected_mime)?;

        // The server-generated id doubles as the object name.
        let document_id = self.ids.new_uuid();
        let storage_key = ctx.storage_key(ResourceType::Document, &format!("{document_id}{ext}"));

        info!(
            tenant_id = %tenant_id,
            document_id = %document_id,
            filename = %safe_filename,
            mime = %detected_mime,
            "ingest start"
        );

        // Step 5: streaming multipart upload with running MD5.
        let upload = match streaming_multipart_upload(
            self.object_store.as_ref(),
            &storage_key,
            &detected_mime,
            ctx.encryption_key_id(),
            full_stream,
            request.content_length_hint,
            request.progress.as_deref(),
        )
        .await
        {
            Ok(result) => result,
            Err(err) => {
                self.append_audit(
                    AuditEvent::new(tenant_id, actions::UPLOAD_FAILED, false)
                        .with_user(user_id)
                        .with_resource(format!("document:{document_id}"))
                        .with_metadata(json!({
                            "stage": "storage_streaming",
                            "content_type": detected_mime,
                            "error": err.to_string(),
                        }))
                        .with_ip(request.client_ip.clone()),
                )
                .await;
                return Err(match err {
                    MultipartError::TooLarge { bytes_seen } => {
                        IngestError::PayloadTooLarge { size: bytes_seen }
                    }
                    MultipartError::Empty => IngestError::Missing,
                    other => IngestError::StorageFailure {
                        message: other.to_string(),
                    },
                });
            }
        };

        // Step 6: duplicate probe. The relational unique constraint is
        // the authoritative guard; this is an early exit.
        if let Some(existing) = self
            .documents
            .find_by_checksum(tenant_id, &upload.md5_checksum)
            .await
            .map_err(internal)?
        {
            if self.object_store.tag_for_expiry(&storage_key).await.is_err() {
                warn!(key = %storage_key, "could not tag duplicate object for expiry");
            }
            self.append_audit(
                AuditEvent::new(tenant_id, actions::DUPLICATE_REJECTED, false)
                    .with_user(user_id)
                    .with_resource(format!("document:{}", existing.id))
                    .with_metadata(json!({
                        "md5_checksum": upload.md5_checksum,
                        "existing_document_id": existing.id.to_string(),
                        "storage_key_discarded": storage_key,
                    }))
                    .with_ip(request.client_ip.clone()),
            )
            .await;
            return Err(IngestError::Duplicate {
                existing_id: existing.id,
                checksum: upload.md5_checksum,
            });
        }

        // Step 7: persist the document row. A unique violation here is
        // a lost race with a concurrent upload of the same bytes.
        let mut metadata = serde_json::Map::new();
        if let Some(perms) = permissions {
            metadata.insert("document_permissions".to_string(), perms);
        }
        let created_at = self.clock.now();
        let doc = Document {
            id: document_id,
            tenant_id,
            uploaded_by: user_id,
            storage_key: storage_key.clone(),
            original_filename: safe_filename.clone(),
            display_name: document_name.clone(),
            content_type: detected_mime.clone(),
            size_bytes: upload.size_bytes,
            md5_checksum: upload.md5_checksum.clone(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            vector_count: 0,
            error_message: None,
            metadata: Value::Object(metadata),
            created_at,
            updated_at: created_at,
        };

        match self.documents.insert(doc).await {
            Ok(()) => {}
            Err(RepoError::DuplicateChecksum { existing_id }) => {
                if self.object_store.delete_object(&storage_key).await.is_err() {
                    warn!(key = %storage_key, "could not delete raced duplicate object");
                }
                return Err(IngestError::Duplicate {
                    existing_id,
                    checksum: upload.md5_checksum,
                });
            }
            Err(other) => return Err(internal(other)),
        }

        // Step 8: success audit with all derived metadata.
        self.append_audit(
            AuditEvent::new(tenant_id, actions::UPLOADED, true)
                .with_user(user_id)
                .with_resource(format!("document:{document_id}"))
                .with_metadata(json!({
                    "document_id": document_id.to_string(),
                    "document_name": document_name,
                    "filename": safe_filename,
                    "storage_key": storage_key,
                    "size_bytes": upload.size_bytes,
                    "md5_checksum": upload.md5_checksum,
                    "content_type": detected_mime,
                    "part_count": upload.part_count,
                    "etag": upload.etag,
                }))
                .with_ip(request.client_ip.clone()),
        )
        .await;

        // Step 9: enqueue the processing task. Non-fatal on broker
        // failure; the document is durable and the retry scanner will
        // re-queue it.
        let message = TaskMessage::new(
            PROCESS_DOCUMENT_TASK,
            json!({
                "document_id": document_id.to_string(),
                "tenant_id": tenant_id.to_string(),
                "storage_key": storage_key,
                "content_type": detected_mime,
            }),
        )
        .with_priority(5);

        if let Err(err) = self.broker.publish(QueueName::DocumentsIngest, message).await {
            error!(document_id = %document_id, error = %err, "queue publish failed (non-fatal)");
            self.append_audit(
                AuditEvent::new(tenant_id, actions::QUEUE_FAILED, false)
                    .with_user(user_id)
                    .with_resource(format!("document:{document_id}"))
                    .with_metadata(json!({
                        "error": err.to_string(),
                        "recovery": "retry-scanner",
                    }))
                    .with_ip(request.client_ip.clone()),
            )
            .await;
        }

        Ok(UploadResponse {
            document_id,
            status: "uploaded",
            checksum: upload.md5_checksum,
            processing_status: "queued",
            storage_key,
            tenant_id,
            document_name,
            size_bytes: upload.size_bytes,
            mime_type: detected_mime,
            created_at,
        })
    }

    /// Location header value for a freshly accepted document.
    #[must_use]
    pub fn status_location(document_id: Uuid) -> String {
        format!("/api/v1/documents/{document_id}/status")
    }

    async fn append_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.append(event).await {
            error!(error = %err, "audit append failed");
        }
    }
}

fn internal(err: RepoError) -> IngestError {
    IngestError::Internal {
        message: err.to_string(),
    }
}

fn validate_permissions(raw: Option<Value>) -> Result<Option<Value>, IngestError> {
    match raw {
        None => Ok(None),
        Some(Value::Array(tags)) if tags.iter().all(Value::is_string) => {
            Ok(Some(Value::Array(tags)))
        }
        Some(_) => Err(IngestError::InvalidPermissions),
    }
}

/// Read up to 8 bytes without consuming more than the sniff window.
async fn read_head<R>(reader: &mut R, head: &mut [u8; 8]) -> Result<usize, IngestError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut filled = 0;
    while filled < head.len() {
        let n = reader
            .read(&mut head[filled..])
            .await
            .map_err(|e| IngestError::StorageFailure {
                message: format!("failed reading upload stream: {e}"),
            })?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
