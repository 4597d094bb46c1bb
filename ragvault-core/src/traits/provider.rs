//! Model provider seams
//!
//! Concrete SDKs are external collaborators. Adapters implement these
//! traits and classify failures through [`ProviderErrorKind`]; the
//! gateway and the embedding pipeline dispatch on the enum, never on
//! error strings.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Failure classification shared by all provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    RateLimited,
    ServerError,
    Timeout,
    Network,
    AuthFailed,
    InvalidRequest,
}

impl ProviderErrorKind {
    /// Whether a failure of this kind may succeed on another attempt or
    /// another provider.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Timeout | Self::Network
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("{provider}: {kind:?}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// One batch of embedding vectors plus reported token usage.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: u64,
}

/// Embedding model adapter.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts in one upstream call. The returned vector
    /// list is positionally aligned with the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, ProviderError>;

    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Token usage as reported by the provider, when available.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<ChatUsage>,
}

/// Lazy sequence of content deltas from a streaming completion.
pub type ChatDeltaStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Chat model adapter for one provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider label matching the model catalogue.
    fn provider_label(&self) -> &str;

    async fn complete(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ProviderError>;

    /// Open a delta stream. Errors before the first delta allow the
    /// gateway to fail over; errors mid-stream surface to the caller.
    async fn stream(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatDeltaStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(ProviderErrorKind::RateLimited.is_retriable());
        assert!(ProviderErrorKind::ServerError.is_retriable());
        assert!(ProviderErrorKind::Timeout.is_retriable());
        assert!(ProviderErrorKind::Network.is_retriable());
        assert!(!ProviderErrorKind::AuthFailed.is_retriable());
        assert!(!ProviderErrorKind::InvalidRequest.is_retriable());
    }
}
