//! Cross-encoder reranking seam
//!
//! The reranker jointly scores (query, candidate) pairs for the final
//! ordering. The concrete model is an external collaborator; the
//! retriever degrades to RRF order whenever reranking is unavailable
//! or fails.

use crate::retriever::RetrievedDocument;
use async_trait::async_trait;
use ragvault_core::traits::provider::ProviderError;

/// One reranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankScore {
    /// Index into the candidate slice that was submitted.
    pub candidate_index: usize,
    pub score: f64,
}

/// Cross-encoder reranker adapter.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score candidates against the query; return up to `top_n`
    /// entries ordered by relevance descending.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RetrievedDocument],
        top_n: usize,
    ) -> Result<Vec<RerankScore>, ProviderError>;
}

/// Identity reranker: preserves the incoming order with flat scores.
/// Used when no cross-encoder is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: &[RetrievedDocument],
        top_n: usize,
    ) -> Result<Vec<RerankScore>, ProviderError> {
        Ok((0..candidates.len().min(top_n))
            .map(|candidate_index| RerankScore {
                candidate_index,
                score: 0.0,
            })
            .collect())
    }
}
