//! Error envelope and workspace-wide error enum
//!
//! Subsystem crates define their own `thiserror` enums and implement
//! [`ApiError`] to map into the uniform wire envelope. Stack traces and
//! internal messages never leave the process; the envelope carries a
//! stable code, a safe message, and optional structured details.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable machine-readable error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnsupportedFileType,
    FileTooLarge,
    MissingFile,
    InvalidDocumentName,
    InvalidPermissionsFormat,
    DuplicateDocument,
    StorageError,
    QueueError,
    DocumentNotFound,
    Unauthorized,
    TokenExpired,
    Forbidden,
    ValidationError,
    InternalError,
    NoContext,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::MissingFile => "MISSING_FILE",
            Self::InvalidDocumentName => "INVALID_DOCUMENT_NAME",
            Self::InvalidPermissionsFormat => "INVALID_PERMISSIONS_FORMAT",
            Self::DuplicateDocument => "DUPLICATE_DOCUMENT",
            Self::StorageError => "STORAGE_ERROR",
            Self::QueueError => "QUEUE_ERROR",
            Self::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Forbidden => "FORBIDDEN",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::NoContext => "NO_CONTEXT",
        }
    }

    /// HTTP status this code maps to.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::UnsupportedFileType
            | Self::MissingFile
            | Self::InvalidDocumentName
            | Self::InvalidPermissionsFormat => 400,
            Self::Unauthorized | Self::TokenExpired => 401,
            Self::Forbidden => 403,
            Self::DocumentNotFound | Self::NoContext => 404,
            Self::DuplicateDocument => 409,
            Self::FileTooLarge => 413,
            Self::ValidationError => 422,
            Self::StorageError | Self::InternalError => 500,
            Self::QueueError => 503,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform wire error body: `{error_code, message, details?, request_id?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Mapping from a subsystem error into the wire envelope.
pub trait ApiError: std::error::Error {
    /// Stable code for this error.
    fn error_code(&self) -> ErrorCode;

    /// Optional structured details (e.g. the existing document id on a
    /// duplicate rejection). Never include internal state.
    fn details(&self) -> Option<Value> {
        None
    }

    /// Build the wire envelope for this error.
    fn to_envelope(&self) -> ErrorEnvelope {
        let mut envelope = ErrorEnvelope::new(self.error_code(), self.to_string());
        envelope.details = self.details();
        envelope
    }
}

/// Workspace-wide error enum for code that composes multiple subsystems.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Broker error: {message}")]
    Broker { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Security violation: {message}")]
    Security { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ApiError for VaultError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::Storage { .. } => ErrorCode::StorageError,
            Self::Broker { .. } => ErrorCode::QueueError,
            Self::NotFound { .. } => ErrorCode::DocumentNotFound,
            Self::Security { .. } => ErrorCode::Forbidden,
            Self::Configuration { .. } | Self::Provider { .. } | Self::Internal { .. } => {
                ErrorCode::InternalError
            }
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_on_the_wire() {
        let json = serde_json::to_string(&ErrorCode::DuplicateDocument).unwrap();
        assert_eq!(json, "\"DUPLICATE_DOCUMENT\"");
        assert_eq!(ErrorCode::FileTooLarge.as_str(), "FILE_TOO_LARGE");
    }

    #[test]
    fn status_mapping_matches_api_contract() {
        assert_eq!(ErrorCode::FileTooLarge.http_status(), 413);
        assert_eq!(ErrorCode::DuplicateDocument.http_status(), 409);
        assert_eq!(ErrorCode::TokenExpired.http_status(), 401);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::QueueError.http_status(), 503);
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let envelope = ErrorEnvelope::new(ErrorCode::MissingFile, "no file field");
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("request_id").is_none());
        assert_eq!(json["error_code"], "MISSING_FILE");
    }

    #[test]
    fn vault_error_maps_to_envelope() {
        let err = VaultError::Broker {
            message: "connection refused".to_string(),
        };
        let envelope = err.to_envelope();
        assert_eq!(envelope.error_code, ErrorCode::QueueError);
        assert!(envelope.message.contains("connection refused"));
    }
}
