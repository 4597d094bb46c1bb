//! Query-path failures

use ragvault_core::traits::provider::ProviderError;
use ragvault_core::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// Retrieval found nothing to ground an answer on.
    #[error("no relevant context found for this question")]
    NoContext,

    #[error("embedding provider failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("vector store failed: {message}")]
    Store { message: String },

    #[error(transparent)]
    Gateway(#[from] ragvault_gateway::GatewayError),

    #[error("internal query error: {message}")]
    Internal { message: String },
}

impl ApiError for QueryError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::NoContext => ErrorCode::NoContext,
            _ => ErrorCode::InternalError,
        }
    }
}
