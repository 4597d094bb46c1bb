//! Cross-backend tenant isolation guarantees.

use ragvault_storage::{
    CollectionRegistry, SharedVectorIndex, VectorRecord, VectorStore, VectorStoreError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn record(tenant: Uuid, id: &str) -> VectorRecord {
    let metadata: HashMap<String, Value> = [
        ("tenant_id".to_string(), json!(tenant.to_string())),
        ("document_id".to_string(), json!("doc")),
        ("text".to_string(), json!(format!("content of {id}"))),
    ]
    .into_iter()
    .collect();
    VectorRecord {
        id: id.to_string(),
        vector: vec![0.6, 0.8],
        metadata,
    }
}

async fn assert_isolated(store_a: Arc<dyn VectorStore>, store_b: Arc<dyn VectorStore>) {
    let tenant_a = store_a.tenant_id();
    let tenant_b = store_b.tenant_id();

    store_a
        .upsert(vec![record(tenant_a, "a-1"), record(tenant_a, "a-2")], 100)
        .await
        .unwrap();
    store_b
        .upsert(vec![record(tenant_b, "b-1")], 100)
        .await
        .unwrap();

    // Every hit carries the caller's tenant id; never the other's.
    for (store, tenant) in [(&store_a, tenant_a), (&store_b, tenant_b)] {
        let hits = store.query(&[0.6, 0.8], 10, None).await.unwrap();
        assert!(!hits.is_empty());
        for hit in hits {
            assert_eq!(hit.metadata["tenant_id"], json!(tenant.to_string()));
        }
    }

    // Cross-tenant records are refused before any write happens.
    let err = store_a
        .upsert(vec![record(tenant_b, "smuggled")], 100)
        .await
        .unwrap_err();
    assert!(matches!(err, VectorStoreError::TenantMismatch { .. }));
    assert_eq!(store_a.count().await.unwrap(), 2);

    // Deleting everything in one tenant leaves the other untouched.
    store_a.delete(&["a-1".to_string(), "a-2".to_string()]).await.unwrap();
    assert_eq!(store_a.count().await.unwrap(), 0);
    assert_eq!(store_b.count().await.unwrap(), 1);
}

#[tokio::test]
async fn namespaced_backend_isolates_tenants() {
    let index = Arc::new(SharedVectorIndex::new());
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    assert_isolated(
        Arc::new(index.store_for(tenant_a)),
        Arc::new(index.store_for(tenant_b)),
    )
    .await;
    assert_eq!(index.namespace_count(), 2);
}

#[tokio::test]
async fn collection_backend_isolates_tenants() {
    let registry = Arc::new(CollectionRegistry::new());
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    assert_isolated(
        Arc::new(registry.store_for(tenant_a)),
        Arc::new(registry.store_for(tenant_b)),
    )
    .await;
}

#[tokio::test]
async fn top_k_is_capped_at_one_hundred() {
    let index = Arc::new(SharedVectorIndex::new());
    let tenant = Uuid::new_v4();
    let store = index.store_for(tenant);

    let records: Vec<VectorRecord> = (0..150).map(|i| record(tenant, &format!("v{i}"))).collect();
    store.upsert(records, 100).await.unwrap();

    let hits = store.query(&[0.6, 0.8], 150, None).await.unwrap();
    assert_eq!(hits.len(), 100);
}
