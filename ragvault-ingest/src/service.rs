//! Document lifecycle operations behind the read and delete endpoints

use crate::error::IngestError;
use ragvault_core::traits::object_store::ObjectStore;
use ragvault_core::traits::repository::{
    AuditSink, ChunkRepository, DocumentPage, DocumentRepository, RepoError,
};
use ragvault_core::{actions, AuditEvent, Document, DocumentStatus};
use ragvault_storage::VectorStore;
use ragvault_tenancy::{TenantContext, TenantVectorManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// `GET /documents/{id}/status` body.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatusView {
    pub document_id: Uuid,
    pub processing_status: DocumentStatus,
    pub chunk_count: u32,
    pub vector_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Tenant-scoped document reads and soft deletion.
pub struct DocumentService {
    documents: Arc<dyn DocumentRepository>,
    chunks: Arc<dyn ChunkRepository>,
    audit: Arc<dyn AuditSink>,
    object_store: Arc<dyn ObjectStore>,
    vectors: Arc<TenantVectorManager>,
}

impl DocumentService {
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        chunks: Arc<dyn ChunkRepository>,
        audit: Arc<dyn AuditSink>,
        object_store: Arc<dyn ObjectStore>,
        vectors: Arc<TenantVectorManager>,
    ) -> Self {
        Self {
            documents,
            chunks,
            audit,
            object_store,
            vectors,
        }
    }

    /// Processing status for one document, 404-shaped when the id does
    /// not exist inside the caller's tenant.
    ///
    /// # Errors
    /// [`IngestError::NotFound`] or a repository failure.
    pub async fn status(
        &self,
        ctx: &TenantContext,
        document_id: Uuid,
    ) -> Result<DocumentStatusView, IngestError> {
        let doc = self
            .documents
            .get(ctx.tenant_id(), document_id)
            .await
            .map_err(repo_err)?
            .ok_or(IngestError::NotFound)?;

        Ok(DocumentStatusView {
            document_id: doc.id,
            processing_status: doc.status,
            chunk_count: doc.chunk_count,
            vector_count: doc.vector_count,
            error_message: doc.error_message,
            updated_at: doc.updated_at,
        })
    }

    /// Paginated tenant listing with an optional status filter.
    ///
    /// # Errors
    /// Repository failures only; an empty page is not an error.
    pub async fn list(
        &self,
        ctx: &TenantContext,
        page: u32,
        limit: u32,
        status: Option<DocumentStatus>,
    ) -> Result<DocumentPage, IngestError> {
        self.documents
            .list(ctx.tenant_id(), page, limit, status)
            .await
            .map_err(repo_err)
    }

    /// Soft-delete a document: mark the row deleted, purge its vectors
    /// and chunk rows, and tag the stored object for lifecycle expiry.
    /// Storage-side cleanup is best effort; the row transition is the
    /// authoritative change.
    ///
    /// # Errors
    /// [`IngestError::NotFound`] when the id is not in the tenant.
    pub async fn delete(&self, ctx: &TenantContext, document_id: Uuid) -> Result<(), IngestError> {
        let tenant_id = ctx.tenant_id();
        let doc: Document = self
            .documents
            .get(tenant_id, document_id)
            .await
            .map_err(repo_err)?
            .ok_or(IngestError::NotFound)?;

        self.documents
            .set_status(tenant_id, document_id, DocumentStatus::Deleted, None)
            .await
            .map_err(repo_err)?;

        let store = self.vectors.store_for(ctx);
        let purged = match store.delete_by_document(document_id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(document_id = %document_id, error = %err, "vector purge failed");
                0
            }
        };
        let chunk_rows = self
            .chunks
            .delete_by_document(tenant_id, document_id)
            .await
            .unwrap_or_else(|err| {
                warn!(document_id = %document_id, error = %err, "chunk purge failed");
                0
            });
        if self.object_store.tag_for_expiry(&doc.storage_key).await.is_err() {
            warn!(key = %doc.storage_key, "could not tag deleted object for expiry");
        }

        if let Err(err) = self
            .audit
            .append(
                AuditEvent::new(tenant_id, actions::DELETED, true)
                    .with_user(ctx.user_id())
                    .with_resource(format!("document:{document_id}"))
                    .with_metadata(json!({
                        "vectors_purged": purged,
                        "chunk_rows_purged": chunk_rows,
                        "storage_key": doc.storage_key,
                    })),
            )
            .await
        {
            warn!(error = %err, "audit append failed for deletion");
        }

        info!(
            tenant_id = %tenant_id,
            document_id = %document_id,
            purged,
            "document soft-deleted"
        );
        Ok(())
    }
}

fn repo_err(err: RepoError) -> IngestError {
    IngestError::Internal {
        message: err.to_string(),
    }
}
