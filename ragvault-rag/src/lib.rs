//! Hybrid retrieval and grounded question answering
//!
//! Dense search over the tenant's vector namespace fused with an
//! in-memory BM25 pass, reciprocal-rank fusion, a permission filter,
//! and an optional cross-encoder rerank. The prompt manager layers
//! versioned templates with A/B weights and the long-context reorder
//! on top; the query service wires it all into the LLM gateway.

pub mod bm25;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod rerank;
pub mod retriever;

pub use bm25::Bm25Index;
pub use error::QueryError;
pub use pipeline::{QueryRequest, QueryResponse, QueryService, StreamInfo};
pub use prompt::PromptManager;
pub use rerank::{NoopReranker, RerankScore, Reranker};
pub use retriever::{HybridRetriever, RetrievalRequest, RetrievedDocument};
