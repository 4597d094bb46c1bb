//! Grounded question answering
//!
//! Wires retrieval, context shaping, prompt rendering, and the LLM
//! gateway into the query path, and audits every served query with the
//! question truncated to 500 characters.

use crate::error::QueryError;
use crate::prompt::PromptManager;
use crate::rerank::Reranker;
use crate::retriever::{HybridRetriever, RetrievalRequest, RetrievedDocument};
use ragvault_core::traits::provider::{ChatDeltaStream, EmbeddingProvider};
use ragvault_core::traits::repository::AuditSink;
use ragvault_core::{actions, AuditEvent};
use ragvault_gateway::{
    build_messages, CallerIdentity, LlmGateway, ModelRequirements, PrivacyLevel, RoutingStrategy,
};
use ragvault_tenancy::{TenantContext, TenantVectorManager};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

const AUDIT_QUESTION_LIMIT: usize = 500;

/// `POST /query` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub privacy: PrivacyLevel,
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default)]
    pub document_permissions: Option<Vec<String>>,
}

const fn default_top_k() -> usize {
    5
}

/// Non-streaming answer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub model_id: String,
    pub provider: String,
    pub latency_ms: u64,
    pub chunks_used: usize,
}

/// Provenance returned alongside a delta stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub model_id: String,
    pub provider: String,
    pub chunks_used: usize,
}

/// Query-path orchestrator, one instance per process.
pub struct QueryService {
    vectors: Arc<TenantVectorManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    prompts: Arc<PromptManager>,
    gateway: Arc<LlmGateway>,
    audit: Arc<dyn AuditSink>,
}

impl QueryService {
    #[must_use]
    pub fn new(
        vectors: Arc<TenantVectorManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        prompts: Arc<PromptManager>,
        gateway: Arc<LlmGateway>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            vectors,
            embedder,
            reranker,
            prompts,
            gateway,
            audit,
        }
    }

    /// Answer a question against the tenant's corpus.
    ///
    /// # Errors
    /// [`QueryError::NoContext`] when retrieval finds nothing, or the
    /// underlying retrieval/gateway failure.
    pub async fn answer(
        &self,
        ctx: &TenantContext,
        tenant_name: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, QueryError> {
        let (docs, messages) = self.prepare(ctx, tenant_name, request).await?;
        let chunks_used = docs.len();

        let outcome = self
            .gateway
            .complete(
                CallerIdentity {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                },
                &ModelRequirements {
                    privacy: request.privacy,
                    strategy: request.strategy,
                    ..Default::default()
                },
                &messages,
            )
            .await?;

        self.append_audit(
            ctx,
            actions::QUERY_RAG,
            &request.question,
            chunks_used,
            &outcome.model_id,
            &outcome.provider,
            Some(outcome.latency_ms),
        )
        .await;

        info!(
            tenant_id = %ctx.tenant_id(),
            chunks_used,
            model = %outcome.model_id,
            latency_ms = outcome.latency_ms,
            "query answered"
        );

        Ok(QueryResponse {
            answer: outcome.content,
            model_id: outcome.model_id,
            provider: outcome.provider,
            latency_ms: outcome.latency_ms,
            chunks_used,
        })
    }

    /// Streaming variant: fallback happens before the first delta; the
    /// audit row is written when the stream is handed over.
    ///
    /// # Errors
    /// Same classification as [`Self::answer`].
    pub async fn answer_stream(
        &self,
        ctx: &TenantContext,
        tenant_name: &str,
        request: &QueryRequest,
    ) -> Result<(StreamInfo, ChatDeltaStream), QueryError> {
        let (docs, messages) = self.prepare(ctx, tenant_name, request).await?;
        let chunks_used = docs.len();

        let (spec, stream) = self
            .gateway
            .stream(
                CallerIdentity {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                },
                &ModelRequirements {
                    privacy: request.privacy,
                    strategy: request.strategy,
                    ..Default::default()
                },
                &messages,
            )
            .await?;

        self.append_audit(
            ctx,
            actions::QUERY_RAG_STREAM,
            &request.question,
            chunks_used,
            &spec.model_id,
            &spec.provider,
            None,
        )
        .await;

        Ok((
            StreamInfo {
                model_id: spec.model_id,
                provider: spec.provider,
                chunks_used,
            },
            stream,
        ))
    }

    /// Retrieval, reorder, and prompt assembly shared by both paths.
    async fn prepare(
        &self,
        ctx: &TenantContext,
        tenant_name: &str,
        request: &QueryRequest,
    ) -> Result<
        (
            Vec<RetrievedDocument>,
            Vec<ragvault_core::traits::provider::ChatMessage>,
        ),
        QueryError,
    > {
        let retriever = HybridRetriever::new(
            self.vectors.store_for(ctx),
            Arc::clone(&self.embedder),
            self.reranker.clone(),
        );

        let docs = retriever
            .retrieve(&RetrievalRequest {
                query_text: request.question.clone(),
                top_k: request.top_k,
                metadata_filter: None,
                document_permissions: request.document_permissions.clone(),
            })
            .await?;

        if docs.is_empty() {
            return Err(QueryError::NoContext);
        }

        let reordered = PromptManager::reorder_context(docs);
        let context = PromptManager::format_context(&reordered);
        let system_prompt = self
            .prompts
            .system_prompt(ctx.tenant_id(), tenant_name, &context, &request.question)
            .await;
        let messages = build_messages(&system_prompt, &request.question);

        Ok((reordered, messages))
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_audit(
        &self,
        ctx: &TenantContext,
        action: &str,
        question: &str,
        chunks_used: usize,
        model_id: &str,
        provider: &str,
        latency_ms: Option<u64>,
    ) {
        let truncated: String = question.chars().take(AUDIT_QUESTION_LIMIT).collect();
        let event = AuditEvent::new(ctx.tenant_id(), action, true)
            .with_user(ctx.user_id())
            .with_metadata(json!({
                "question": truncated,
                "chunks_used": chunks_used,
                "model": model_id,
                "provider": provider,
                "latency_ms": latency_ms,
            }));
        if let Err(err) = self.audit.append(event).await {
            error!(error = %err, "query audit append failed");
        }
    }
}
