//! Shared index with per-tenant namespaces
//!
//! One index holds every tenant's vectors, partitioned by a namespace
//! label derived from the tenant id. Namespaces are provisioned
//! implicitly on first upsert, mirroring namespace-native backends.

use super::{
    metadata_matches, normalized_cosine, validate_tenant, MetadataFilter, QueryHit, VectorRecord,
    VectorStore, VectorStoreError, MAX_TOP_K,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredVector {
    vector: Vec<f32>,
    metadata: HashMap<String, Value>,
}

/// Process-wide shared index. Clones are handles to the same storage;
/// safe for concurrent use from many tenants at once.
#[derive(Debug, Clone, Default)]
pub struct SharedVectorIndex {
    namespaces: Arc<DashMap<String, HashMap<String, StoredVector>>>,
}

impl SharedVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace label for a tenant: `tenant_<uuid>`.
    #[must_use]
    pub fn namespace_for(tenant_id: Uuid) -> String {
        format!("tenant_{tenant_id}")
    }

    /// Bind a store to one tenant. The namespace is derived here and
    /// cannot be changed afterwards.
    #[must_use]
    pub fn store_for(&self, tenant_id: Uuid) -> NamespacedVectorStore {
        NamespacedVectorStore {
            index: self.clone(),
            tenant_id,
            namespace: Self::namespace_for(tenant_id),
        }
    }

    /// Number of provisioned namespaces (operator diagnostics).
    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }
}

/// Tenant-bound view over the shared index.
#[derive(Debug)]
pub struct NamespacedVectorStore {
    index: SharedVectorIndex,
    tenant_id: Uuid,
    namespace: String,
}

#[async_trait]
impl VectorStore for NamespacedVectorStore {
    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert(
        &self,
        records: Vec<VectorRecord>,
        batch_size: usize,
    ) -> Result<usize, VectorStoreError> {
        validate_tenant(&records, self.tenant_id)?;

        let total = records.len();
        let mut remaining = records;
        while !remaining.is_empty() {
            let batch: Vec<_> = remaining
                .drain(..batch_size.min(remaining.len()))
                .collect();
            let mut namespace = self
                .index
                .namespaces
                .entry(self.namespace.clone())
                .or_default();
            for record in batch {
                namespace.insert(
                    record.id,
                    StoredVector {
                        vector: record.vector,
                        metadata: record.metadata,
                    },
                );
            }
        }

        debug!(namespace = %self.namespace, count = total, "vectors upserted");
        Ok(total)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>, VectorStoreError> {
        let top_k = top_k.min(MAX_TOP_K);

        // The namespace is the primary boundary; the tenant_id filter is
        // stamped on as defence in depth.
        let mut combined = filter.cloned().unwrap_or_default();
        combined.insert(
            "tenant_id".to_string(),
            Value::String(self.tenant_id.to_string()),
        );

        let Some(namespace) = self.index.namespaces.get(&self.namespace) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<QueryHit> = namespace
            .iter()
            .filter(|(_, stored)| metadata_matches(&stored.metadata, &combined))
            .map(|(id, stored)| QueryHit {
                id: id.clone(),
                score: normalized_cosine(vector, &stored.vector),
                text: stored
                    .metadata
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                metadata: stored.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError> {
        if let Some(mut namespace) = self.index.namespaces.get_mut(&self.namespace) {
            for id in ids {
                namespace.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<usize, VectorStoreError> {
        let wanted = Value::String(document_id.to_string());
        let Some(mut namespace) = self.index.namespaces.get_mut(&self.namespace) else {
            return Ok(0);
        };
        let before = namespace.len();
        namespace.retain(|_, stored| stored.metadata.get("document_id") != Some(&wanted));
        Ok(before - namespace.len())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self
            .index
            .namespaces
            .get(&self.namespace)
            .map_or(0, |ns| ns.len()))
    }
}
