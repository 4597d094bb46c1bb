//! Gateway failures

use ragvault_core::traits::provider::ProviderError;
use ragvault_core::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No registered model satisfies the request constraints. A
    /// deployment problem, not a caller problem.
    #[error("no model satisfies the requested constraints: {detail}")]
    NoEligibleModel { detail: String },

    /// A model was selected but no adapter is registered under its
    /// provider label.
    #[error("no provider adapter registered for {label:?}")]
    MissingAdapter { label: String },

    /// A non-retriable provider failure (auth, bad request); no
    /// further providers were tried.
    #[error("provider rejected the request: {0}")]
    NonRetriable(#[from] ProviderError),

    /// Every provider in the fallback chain failed.
    #[error("all providers failed:\n{}", attempts.join("\n"))]
    AllProvidersFailed { attempts: Vec<String> },
}

impl ApiError for GatewayError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::InternalError
    }
}
