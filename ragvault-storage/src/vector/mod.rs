//! Tenant-scoped vector store trait and shared types
//!
//! Every instance is bound to one tenant at construction. The
//! backend-specific namespace is the primary isolation boundary; the
//! `tenant_id` metadata filter is stamped onto every query as a second
//! guard, and upserts reject records whose metadata claims another
//! tenant.

pub mod collection;
pub mod namespaced;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on `top_k` accepted by queries.
pub const MAX_TOP_K: usize = 100;

/// A single embedding record to upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Deterministic 32-char hex id derived from
    /// `tenant:document:chunk_index`, so re-upserts overwrite.
    pub id: String,
    pub vector: Vec<f32>,
    /// Filterable payload. Must carry `tenant_id`, `document_id`,
    /// `chunk_index`, and `text` for retrieval without a DB join.
    pub metadata: HashMap<String, Value>,
}

/// One similarity-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    /// Cosine similarity normalized into `[0, 1]`.
    pub score: f32,
    pub metadata: HashMap<String, Value>,
    pub text: String,
}

/// Metadata filter ANDed with the mandatory tenant scope.
///
/// Scalar values match by equality. Array values match when the stored
/// metadata shares at least one element (or, for a stored scalar, when
/// the filter array contains it).
pub type MetadataFilter = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("record {record_id} tenant mismatch: expected {expected}, got {got:?}")]
    TenantMismatch {
        record_id: String,
        expected: Uuid,
        got: Option<String>,
    },

    #[error("vector store backend error: {message}")]
    Backend { message: String },
}

/// Uniform vector store interface; instances are tenant-bound.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The tenant this instance is bound to.
    fn tenant_id(&self) -> Uuid;

    /// Backend-specific isolation key (namespace or collection name).
    fn namespace(&self) -> &str;

    /// Insert or overwrite records in batches. Returns the number of
    /// vectors upserted. Fails closed on any tenant mismatch before
    /// writing anything.
    async fn upsert(
        &self,
        records: Vec<VectorRecord>,
        batch_size: usize,
    ) -> Result<usize, VectorStoreError>;

    /// Nearest-neighbour search within the bound tenant only.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>, VectorStoreError>;

    /// Delete vectors by id.
    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError>;

    /// Delete all vectors belonging to one document.
    async fn delete_by_document(&self, document_id: Uuid) -> Result<usize, VectorStoreError>;

    /// Total vectors in this tenant's namespace.
    async fn count(&self) -> Result<usize, VectorStoreError>;
}

/// Cosine similarity mapped from `[-1, 1]` into `[0, 1]`.
#[must_use]
pub(crate) fn normalized_cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

/// Whether stored metadata satisfies one filter entry.
pub(crate) fn metadata_matches(metadata: &HashMap<String, Value>, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(key, wanted)| {
        let Some(actual) = metadata.get(key) else {
            return false;
        };
        match (wanted, actual) {
            (Value::Array(allowed), Value::Array(present)) => {
                present.iter().any(|v| allowed.contains(v))
            }
            (Value::Array(allowed), scalar) => allowed.contains(scalar),
            (scalar, actual) => scalar == actual,
        }
    })
}

/// Validate every record against the bound tenant before any write.
pub(crate) fn validate_tenant(
    records: &[VectorRecord],
    tenant_id: Uuid,
) -> Result<(), VectorStoreError> {
    let expected = tenant_id.to_string();
    for record in records {
        let got = record
            .metadata
            .get("tenant_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        if got.as_deref() != Some(expected.as_str()) {
            return Err(VectorStoreError::TenantMismatch {
                record_id: record.id.clone(),
                expected: tenant_id,
                got,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.3, 0.4, 0.5];
        let score = normalized_cosine(&v, &v);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!(normalized_cosine(&a, &b) < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(normalized_cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn filter_scalar_equality_and_array_overlap() {
        let metadata: HashMap<String, Value> = [
            ("document_id".to_string(), json!("doc-1")),
            ("document_permissions".to_string(), json!(["finance"])),
        ]
        .into_iter()
        .collect();

        let mut filter = MetadataFilter::new();
        filter.insert("document_id".to_string(), json!("doc-1"));
        assert!(metadata_matches(&metadata, &filter));

        filter.insert("document_permissions".to_string(), json!(["finance", "hr"]));
        assert!(metadata_matches(&metadata, &filter));

        filter.insert("document_permissions".to_string(), json!(["hr"]));
        assert!(!metadata_matches(&metadata, &filter));

        let mut missing = MetadataFilter::new();
        missing.insert("absent".to_string(), json!("x"));
        assert!(!metadata_matches(&metadata, &missing));
    }
}
