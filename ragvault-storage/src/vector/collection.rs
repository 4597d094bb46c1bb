//! Collection-per-tenant realization
//!
//! Each tenant owns a distinct collection whose name is derived from
//! the tenant id with hyphens stripped (collection names must be
//! alphanumeric-plus-underscore in most engines). The collection is
//! provisioned idempotently when the store is first bound.

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

const COLLECTION_PREFIX: &str = "Tenant";

#[derive(Debug, Clone)]
struct StoredVector {
    vector: Vec<f32>,
    metadata: HashMap<String, Value>,
}

/// Registry of per-tenant collections. Clones are handles to the same
/// storage.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: Arc<DashMap<String, HashMap<String, StoredVector>>>,
}

impl CollectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection name for a tenant: `Tenant_<uuid_without_hyphens>`.
    #[must_use]
    pub fn collection_name(tenant_id: Uuid) -> String {
        format!("{COLLECTION_PREFIX}_{}", tenant_id.simple())
    }

    /// Bind a store to one tenant, provisioning its collection if it
    /// does not exist yet. Provisioning is idempotent.
    #[must_use]
    pub fn store_for(&self, tenant_id: Uuid) -> CollectionVectorStore {
        let name = Self::collection_name(tenant_id);
        if !self.collections.contains_key(&name) {
            self.collections.entry(name.clone()).or_default();
            debug!(collection = %name, "collection provisioned");
        }
        CollectionVectorStore {
            registry: self.clone(),
            tenant_id,
            collection: name,
        }
    }

    /// Whether a tenant's collection has been provisioned.
    #[must_use]
    pub fn exists(&self, tenant_id: Uuid) -> bool {
        self.collections
            .contains_key(&Self::collection_name(tenant_id))
    }
}

/// Tenant-bound store over its own collection.
#[derive(Debug)]
pub struct CollectionVectorStore {
    registry: CollectionRegistry,
    tenant_id: Uuid,
    collection: String,
}

#[async_trait]
impl VectorStore for CollectionVectorStore {
    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn namespace(&self) -> &str {
        &self.collection
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
            let mut collection = self
                .registry
                .collections
                .entry(self.collection.clone())
                .or_default();
            for record in batch {
                collection.insert(
                    record.id,
                    StoredVector {
                        vector: record.vector,
                        metadata: record.metadata,
                    },
                );
            }
        }
        Ok(total)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>, VectorStoreError> {
        let top_k = top_k.min(MAX_TOP_K);

        let mut combined = filter.cloned().unwrap_or_default();
        combined.insert(
            "tenant_id".to_string(),
            Value::String(self.tenant_id.to_string()),
        );

        let Some(collection) = self.registry.collections.get(&self.collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<QueryHit> = collection
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
        if let Some(mut collection) = self.registry.collections.get_mut(&self.collection) {
            for id in ids {
                collection.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<usize, VectorStoreError> {
        let wanted = Value::String(document_id.to_string());
        let Some(mut collection) = self.registry.collections.get_mut(&self.collection) else {
            return Ok(0);
        };
        let before = collection.len();
        collection.retain(|_, stored| stored.metadata.get("document_id") != Some(&wanted));
        Ok(before - collection.len())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self
            .registry
            .collections
            .get(&self.collection)
            .map_or(0, |c| c.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(tenant: Uuid, idx: u32) -> VectorRecord {
        let metadata: HashMap<String, Value> = [
            ("tenant_id".to_string(), json!(tenant.to_string())),
            ("document_id".to_string(), json!("doc")),
            ("text".to_string(), json!("body")),
        ]
        .into_iter()
        .collect();
        VectorRecord {
            id: format!("v{idx}"),
            vector: vec![1.0, 0.0],
            metadata,
        }
    }

    #[test]
    fn collection_names_strip_hyphens() {
        let tenant = Uuid::new_v4();
        let name = CollectionRegistry::collection_name(tenant);
        assert!(name.starts_with("Tenant_"));
        assert!(!name.contains('-'));
    }

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let registry = Arc::new(CollectionRegistry::new());
        let tenant = Uuid::new_v4();

        let store = registry.store_for(tenant);
        store.upsert(vec![record(tenant, 0)], 100).await.unwrap();

        // Re-binding must not wipe existing vectors.
        let rebound = registry.store_for(tenant);
        assert_eq!(rebound.count().await.unwrap(), 1);
        assert!(registry.exists(tenant));
    }

    #[tokio::test]
    async fn tenants_get_disjoint_collections() {
        let registry = Arc::new(CollectionRegistry::new());
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        let store_a = registry.store_for(tenant_a);
        let store_b = registry.store_for(tenant_b);
        store_a.upsert(vec![record(tenant_a, 0)], 100).await.unwrap();

        assert_eq!(store_a.count().await.unwrap(), 1);
        assert_eq!(store_b.count().await.unwrap(), 0);
        assert_ne!(store_a.namespace(), store_b.namespace());
    }
}
