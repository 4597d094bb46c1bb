//! Relational repository seams
//!
//! The concrete SQL driver lives outside the core. Every method takes an
//! explicit `tenant_id`; there is no way to issue a tenant-unscoped
//! query except the deliberately cross-tenant stuck-document scan used
//! by the retry scanner.

use crate::types::audit::AuditEvent;
use crate::types::document::{ChunkRecord, Document, DocumentStatus};
use crate::types::prompt::PromptTemplate;
use crate::types::usage::{MonthlyUsageReport, UsageDelta, UsageKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("row not found")]
    NotFound,

    #[error("duplicate checksum for tenant; existing document {existing_id}")]
    DuplicateChecksum { existing_id: Uuid },

    #[error("repository backend error: {message}")]
    Backend { message: String },
}

/// One page of a tenant's document listing.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub items: Vec<Document>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Tenant-scoped document rows.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a new row. Fails with [`RepoError::DuplicateChecksum`]
    /// when a non-deleted row with the same `(tenant_id, md5_checksum)`
    /// exists; this constraint is the authoritative duplicate guard.
    async fn insert(&self, doc: Document) -> Result<(), RepoError>;

    /// Early-exit duplicate probe by checksum among non-deleted rows.
    async fn find_by_checksum(
        &self,
        tenant_id: Uuid,
        md5_checksum: &str,
    ) -> Result<Option<Document>, RepoError>;

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, RepoError>;

    async fn list(
        &self,
        tenant_id: Uuid,
        page: u32,
        limit: u32,
        status: Option<DocumentStatus>,
    ) -> Result<DocumentPage, RepoError>;

    async fn set_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: DocumentStatus,
        error_message: Option<String>,
    ) -> Result<(), RepoError>;

    /// Transition to `ready` with final chunk and vector counts.
    async fn mark_ready(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        chunk_count: u32,
        vector_count: u32,
    ) -> Result<(), RepoError>;

    /// Documents stuck in `pending` since before `older_than`, oldest
    /// first, bounded by `limit`. Crosses tenant boundaries
    /// intentionally; each returned row carries its owner's tenant id.
    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Document>, RepoError>;
}

/// Tenant-scoped chunk rows; lifecycle is cascaded from the document.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn insert_many(&self, chunks: Vec<ChunkRecord>) -> Result<(), RepoError>;

    async fn delete_by_document(&self, tenant_id: Uuid, document_id: Uuid)
        -> Result<u64, RepoError>;

    async fn count_by_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<u64, RepoError>;
}

/// Append-only audit sink. The storage role behind a production
/// implementation must deny UPDATE and DELETE; this trait exposes
/// nothing but append and a scoped read.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), RepoError>;

    /// Tenant-scoped read for status pages and tests.
    async fn entries(&self, tenant_id: Uuid) -> Result<Vec<crate::AuditRecord>, RepoError>;
}

/// Versioned prompt rows.
#[async_trait]
pub trait PromptRepository: Send + Sync {
    /// Active rows for `(tenant_id, name)`; `None` selects global rows.
    async fn active_templates(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Vec<PromptTemplate>, RepoError>;

    async fn insert(&self, template: PromptTemplate) -> Result<(), RepoError>;
}

/// Additive token-usage accumulator.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    /// Upsert the row for `key` with additive sums and a request-count
    /// increment.
    async fn record(&self, key: UsageKey, delta: UsageDelta) -> Result<(), RepoError>;

    async fn monthly_report(
        &self,
        tenant_id: Uuid,
        month: &str,
    ) -> Result<MonthlyUsageReport, RepoError>;
}
