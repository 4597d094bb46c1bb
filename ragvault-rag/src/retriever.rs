//! Hybrid retrieval pipeline
//!
//! Dense fetch from the tenant's vector store, an in-memory BM25 pass
//! over those candidates, reciprocal-rank fusion, a defence-in-depth
//! permission filter, and an optional cross-encoder rerank. Every
//! stage degrades gracefully except the dense fetch itself.

use crate::bm25::Bm25Index;
use crate::error::QueryError;
use crate::rerank::Reranker;
use ragvault_core::traits::provider::EmbeddingProvider;
use ragvault_storage::{MetadataFilter, QueryHit, VectorStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// RRF constant; moderate penalty for lower-ranked documents.
const RRF_K: f64 = 60.0;

/// Ceiling on the final result count.
const MAX_TOP_K: usize = 20;

/// Ceiling the reranker output defaults to.
const RERANK_TOP_N: usize = 5;

/// One retrieval request.
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query_text: String,
    pub top_k: usize,
    /// Extra metadata constraints ANDed onto the dense query.
    pub metadata_filter: Option<MetadataFilter>,
    /// Roles the caller may read; candidates carrying a disjoint
    /// permission set are dropped. Candidates without permissions are
    /// world-readable.
    pub document_permissions: Option<Vec<String>>,
}

/// One retrieved chunk with merged scoring metadata
/// (`vector_score`, `rrf_score`, `rerank_score?`,
/// `rerank_original_rank?`).
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, Value>,
}

impl RetrievedDocument {
    fn from_hit(hit: QueryHit, rrf_score: f64) -> Self {
        let mut metadata = hit.metadata;
        metadata.insert(
            "vector_score".to_string(),
            json!((f64::from(hit.score) * 10_000.0).round() / 10_000.0),
        );
        metadata.insert(
            "rrf_score".to_string(),
            json!((rrf_score * 1_000_000.0).round() / 1_000_000.0),
        );
        Self {
            id: hit.id,
            text: hit.text,
            metadata,
        }
    }

    /// Relevance used for context ordering: rerank score when present,
    /// otherwise the dense score.
    #[must_use]
    pub fn relevance(&self) -> f64 {
        self.metadata
            .get("rerank_score")
            .or_else(|| self.metadata.get("vector_score"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

/// Hybrid retriever bound to one tenant's vector store.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridRetriever {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
        }
    }

    /// Execute the full pipeline. An empty result is not an error here;
    /// the query service decides whether that means `NO_CONTEXT`.
    ///
    /// # Errors
    /// Embedding or dense-fetch failures only.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<RetrievedDocument>, QueryError> {
        let top_k = request.top_k.clamp(1, MAX_TOP_K);
        let dense_k = (top_k * 4).max(20);

        // Step 1: embed the query.
        let batch = self
            .embedder
            .embed_batch(&[request.query_text.clone()])
            .await?;
        let Some(query_vector) = batch.vectors.into_iter().next() else {
            return Err(QueryError::Internal {
                message: "embedding provider returned no query vector".to_string(),
            });
        };

        // Step 2: dense fetch.
        let dense: Vec<QueryHit> = self
            .store
            .query(&query_vector, dense_k, request.metadata_filter.as_ref())
            .await
            .map_err(|e| QueryError::Store {
                message: e.to_string(),
            })?;

        if dense.is_empty() {
            info!(tenant_id = %self.store.tenant_id(), "no dense candidates");
            return Ok(Vec::new());
        }

        // Step 3: BM25 over the dense corpus, degrading to dense-only
        // on failure.
        let bm25_ranks = self.bm25_ranks(&request.query_text, &dense, dense_k);

        // Step 4: reciprocal-rank fusion.
        let fused = rrf_merge(dense, &bm25_ranks);

        // Step 5: permission hard-filter (defence in depth; the store
        // filter should already have excluded these).
        let fused = match &request.document_permissions {
            Some(allowed) => {
                let before = fused.len();
                let kept = apply_permission_filter(fused, allowed);
                if kept.len() < before {
                    info!(
                        dropped = before - kept.len(),
                        "permission filter removed candidates"
                    );
                }
                kept
            }
            None => fused,
        };
        if fused.is_empty() {
            warn!(tenant_id = %self.store.tenant_id(), "all candidates filtered by permissions");
            return Ok(Vec::new());
        }

        // Step 6: cross-encoder rerank, falling back to RRF order.
        let final_docs = match &self.reranker {
            Some(reranker) => {
                let take = top_k.min(RERANK_TOP_N);
                match reranker.rerank(&request.query_text, &fused, take).await {
                    Ok(scores) => apply_rerank(fused, &scores),
                    Err(err) => {
                        warn!(error = %err, "reranker unavailable, keeping fusion order");
                        fused.into_iter().take(top_k).collect()
                    }
                }
            }
            None => fused.into_iter().take(top_k).collect(),
        };

        info!(
            tenant_id = %self.store.tenant_id(),
            returned = final_docs.len(),
            "hybrid retrieval complete"
        );
        Ok(final_docs)
    }

    /// Document id to 1-based BM25 rank.
    fn bm25_ranks(&self, query: &str, dense: &[QueryHit], top_k: usize) -> HashMap<String, usize> {
        let corpus: Vec<String> = dense.iter().map(|hit| hit.text.clone()).collect();
        match Bm25Index::build(&corpus) {
            Ok(index) => index
                .search(query, top_k)
                .into_iter()
                .map(|hit| (dense[hit.corpus_index].id.clone(), hit.rank))
                .collect(),
            Err(err) => {
                warn!(error = %err, "BM25 unavailable, continuing dense-only");
                HashMap::new()
            }
        }
    }
}

/// Fuse the dense ranking with BM25 ranks:
/// `score(d) = Σ 1 / (60 + rank_i)` over the lists `d` appears in.
fn rrf_merge(dense: Vec<QueryHit>, bm25_ranks: &HashMap<String, usize>) -> Vec<RetrievedDocument> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for (rank, hit) in dense.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let contribution = 1.0 / (RRF_K + (rank + 1) as f64);
        *scores.entry(hit.id.clone()).or_default() += contribution;
    }
    for (id, rank) in bm25_ranks {
        #[allow(clippy::cast_precision_loss)]
        let contribution = 1.0 / (RRF_K + *rank as f64);
        *scores.entry(id.clone()).or_default() += contribution;
    }

    let mut fused: Vec<RetrievedDocument> = dense
        .into_iter()
        .map(|hit| {
            let rrf = scores.get(&hit.id).copied().unwrap_or_default();
            RetrievedDocument::from_hit(hit, rrf)
        })
        .collect();
    fused.sort_by(|a, b| {
        let score = |d: &RetrievedDocument| {
            d.metadata
                .get("rrf_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

fn apply_permission_filter(
    candidates: Vec<RetrievedDocument>,
    allowed: &[String],
) -> Vec<RetrievedDocument> {
    if allowed.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|doc| {
            let perms: Vec<&str> = doc
                .metadata
                .get("document_permissions")
                .and_then(Value::as_array)
                .map(|tags| tags.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            perms.is_empty() || perms.iter().any(|p| allowed.iter().any(|a| a == p))
        })
        .collect()
}

fn apply_rerank(
    candidates: Vec<RetrievedDocument>,
    scores: &[crate::rerank::RerankScore],
) -> Vec<RetrievedDocument> {
    let mut result = Vec::with_capacity(scores.len());
    for scored in scores {
        let Some(doc) = candidates.get(scored.candidate_index) else {
            continue;
        };
        let mut doc = doc.clone();
        doc.metadata
            .insert("rerank_score".to_string(), json!(scored.score));
        doc.metadata.insert(
            "rerank_original_rank".to_string(),
            json!(scored.candidate_index + 1),
        );
        result.push(doc);
    }
    result
}
