//! In-memory repository, audit, usage, and broker backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use ragvault_core::traits::broker::{BrokerError, Delivery, QueueName, TaskBroker, TaskMessage};
use ragvault_core::traits::repository::{
    AuditSink, ChunkRepository, DocumentPage, DocumentRepository, PromptRepository, RepoError,
    UsageRecorder,
};
use ragvault_core::{
    AuditEvent, AuditRecord, ChunkRecord, Document, DocumentStatus, ModelUsage,
    MonthlyUsageReport, PromptTemplate, UsageDelta, UsageKey,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Memory-backed [`DocumentRepository`] enforcing the
/// `(tenant_id, md5_checksum)` uniqueness constraint among non-deleted
/// rows, exactly like the relational unique index it stands in for.
#[derive(Debug, Default)]
pub struct MemoryDocumentRepository {
    rows: RwLock<HashMap<Uuid, Document>>,
}

impl MemoryDocumentRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn insert(&self, doc: Document) -> Result<(), RepoError> {
        let mut rows = self.rows.write();
        if let Some(existing) = rows.values().find(|d| {
            d.tenant_id == doc.tenant_id
                && d.md5_checksum == doc.md5_checksum
                && d.status != DocumentStatus::Deleted
        }) {
            return Err(RepoError::DuplicateChecksum {
                existing_id: existing.id,
            });
        }
        rows.insert(doc.id, doc);
        Ok(())
    }

    async fn find_by_checksum(
        &self,
        tenant_id: Uuid,
        md5_checksum: &str,
    ) -> Result<Option<Document>, RepoError> {
        Ok(self
            .rows
            .read()
            .values()
            .find(|d| {
                d.tenant_id == tenant_id
                    && d.md5_checksum == md5_checksum
                    && d.status != DocumentStatus::Deleted
            })
            .cloned())
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, RepoError> {
        Ok(self
            .rows
            .read()
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id && d.status != DocumentStatus::Deleted)
            .cloned())
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        page: u32,
        limit: u32,
        status: Option<DocumentStatus>,
    ) -> Result<DocumentPage, RepoError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let mut items: Vec<Document> = self
            .rows
            .read()
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .filter(|d| match status {
                Some(wanted) => d.status == wanted,
                None => d.status != DocumentStatus::Deleted,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = items.len() as u64;
        let offset = ((page - 1) * limit) as usize;
        let items = items
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok(DocumentPage {
            items,
            total,
            page,
            limit,
        })
    }

    async fn set_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: DocumentStatus,
        error_message: Option<String>,
    ) -> Result<(), RepoError> {
        let mut rows = self.rows.write();
        let doc = rows
            .get_mut(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or(RepoError::NotFound)?;
        doc.status = status;
        doc.error_message = error_message;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_ready(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        chunk_count: u32,
        vector_count: u32,
    ) -> Result<(), RepoError> {
        let mut rows = self.rows.write();
        let doc = rows
            .get_mut(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or(RepoError::NotFound)?;
        doc.status = DocumentStatus::Ready;
        doc.chunk_count = chunk_count;
        doc.vector_count = vector_count;
        doc.error_message = None;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Document>, RepoError> {
        let mut stale: Vec<Document> = self
            .rows
            .read()
            .values()
            .filter(|d| d.status == DocumentStatus::Pending && d.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stale.truncate(limit);
        Ok(stale)
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Memory-backed [`ChunkRepository`].
#[derive(Debug, Default)]
pub struct MemoryChunkRepository {
    rows: RwLock<Vec<ChunkRecord>>,
}

impl MemoryChunkRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkRepository for MemoryChunkRepository {
    async fn insert_many(&self, chunks: Vec<ChunkRecord>) -> Result<(), RepoError> {
        self.rows.write().extend(chunks);
        Ok(())
    }

    async fn delete_by_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<u64, RepoError> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|c| !(c.tenant_id == tenant_id && c.document_id == document_id));
        Ok((before - rows.len()) as u64)
    }

    async fn count_by_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<u64, RepoError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.document_id == document_id)
            .count() as u64)
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Append-only audit sink. Ids are monotonic; there is no update or
/// delete anywhere on this type.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    next_id: AtomicU64,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<(), RepoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.lock().push(AuditRecord {
            id,
            event,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn entries(&self, tenant_id: Uuid) -> Result<Vec<AuditRecord>, RepoError> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.event.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Memory-backed [`PromptRepository`] enforcing
/// `(tenant_id, name, version)` uniqueness.
#[derive(Debug, Default)]
pub struct MemoryPromptRepository {
    rows: Mutex<Vec<PromptTemplate>>,
}

impl MemoryPromptRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptRepository for MemoryPromptRepository {
    async fn active_templates(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Vec<PromptTemplate>, RepoError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.name == name && t.is_active)
            .cloned()
            .collect())
    }

    async fn insert(&self, template: PromptTemplate) -> Result<(), RepoError> {
        let mut rows = self.rows.lock();
        if rows.iter().any(|t| {
            t.tenant_id == template.tenant_id
                && t.name == template.name
                && t.version == template.version
        }) {
            return Err(RepoError::Backend {
                message: format!(
                    "prompt template {}@{} already exists for this tenant",
                    template.name, template.version
                ),
            });
        }
        rows.push(template);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct UsageTotals {
    input_tokens: u64,
    output_tokens: u64,
    request_count: u64,
    cost_usd: f64,
}

/// Memory-backed [`UsageRecorder`] with additive upsert semantics.
#[derive(Debug, Default)]
pub struct MemoryUsageRecorder {
    rows: Mutex<HashMap<UsageKey, UsageTotals>>,
}

impl MemoryUsageRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageRecorder for MemoryUsageRecorder {
    async fn record(&self, key: UsageKey, delta: UsageDelta) -> Result<(), RepoError> {
        let mut rows = self.rows.lock();
        let totals = rows.entry(key).or_default();
        totals.input_tokens += delta.input_tokens;
        totals.output_tokens += delta.output_tokens;
        totals.request_count += 1;
        totals.cost_usd += delta.cost_usd;
        Ok(())
    }

    async fn monthly_report(
        &self,
        tenant_id: Uuid,
        month: &str,
    ) -> Result<MonthlyUsageReport, RepoError> {
        let rows = self.rows.lock();
        let mut report = MonthlyUsageReport {
            tenant_id,
            month: month.to_string(),
            total_input: 0,
            total_output: 0,
            total_requests: 0,
            total_cost_usd: 0.0,
            by_model: Vec::new(),
        };

        for (key, totals) in rows
            .iter()
            .filter(|(k, _)| k.tenant_id == tenant_id && k.month == month)
        {
            report.total_input += totals.input_tokens;
            report.total_output += totals.output_tokens;
            report.total_requests += totals.request_count;
            report.total_cost_usd += totals.cost_usd;
            report.by_model.push(ModelUsage {
                model: key.model.clone(),
                provider: key.provider.clone(),
                input_tokens: totals.input_tokens,
                output_tokens: totals.output_tokens,
                request_count: totals.request_count,
                cost_usd: totals.cost_usd,
            });
        }
        report
            .by_model
            .sort_by(|a, b| b.cost_usd.partial_cmp(&a.cost_usd).unwrap_or(std::cmp::Ordering::Equal));
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Memory-backed [`TaskBroker`] with priority delivery on the ingest
/// queue and explicit ack/nack for at-least-once semantics. The `down`
/// switch simulates a broker outage in tests.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<QueueName, VecDeque<TaskMessage>>>,
    in_flight: Mutex<HashMap<u64, (QueueName, TaskMessage)>>,
    next_tag: AtomicU64,
    down: AtomicBool,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a broker outage (publishes fail until restored).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    #[must_use]
    pub fn queue_depth(&self, queue: QueueName) -> usize {
        self.queues.lock().get(&queue).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn publish(&self, queue: QueueName, message: TaskMessage) -> Result<(), BrokerError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable {
                message: "broker connection refused".to_string(),
            });
        }

        let mut queues = self.queues.lock();
        let q = queues.entry(queue).or_default();
        if queue.max_priority().is_some() {
            // Priority queue: deliver higher priority first, FIFO among
            // equals.
            let pos = q
                .iter()
                .position(|m| m.priority < message.priority)
                .unwrap_or(q.len());
            q.insert(pos, message);
        } else {
            q.push_back(message);
        }
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> Result<Option<Delivery>, BrokerError> {
        let message = {
            let mut queues = self.queues.lock();
            queues.get_mut(&queue).and_then(VecDeque::pop_front)
        };
        Ok(message.map(|message| {
            let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight
                .lock()
                .insert(tag, (queue, message.clone()));
            Delivery { message, tag }
        }))
    }

    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.in_flight
            .lock()
            .remove(&tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery { tag })
    }

    async fn nack(&self, tag: u64) -> Result<(), BrokerError> {
        let (queue, message) = self
            .in_flight
            .lock()
            .remove(&tag)
            .ok_or(BrokerError::UnknownDelivery { tag })?;
        self.queues
            .lock()
            .entry(queue)
            .or_default()
            .push_front(message);
        Ok(())
    }
}
