//! Typed ingestion failures

use ragvault_core::{ApiError, ErrorCode};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid document name {name:?}")]
    InvalidName { name: String },

    #[error("document_permissions must be a JSON array of role strings")]
    InvalidPermissions,

    #[error("file exceeds the maximum allowed size ({size} bytes)")]
    PayloadTooLarge { size: u64 },

    #[error("no file was provided")]
    Missing,

    #[error("unsupported file type: {detail}")]
    UnsupportedType { detail: String },

    #[error("an identical document already exists")]
    Duplicate { existing_id: Uuid, checksum: String },

    #[error("object storage failure: {message}")]
    StorageFailure { message: String },

    /// Queue publish failures are non-fatal on the upload path; this
    /// variant only surfaces from operations where the broker is
    /// load-bearing.
    #[error("message broker unavailable: {message}")]
    BrokerUnavailable { message: String },

    #[error("document not found")]
    NotFound,

    #[error("internal ingestion error: {message}")]
    Internal { message: String },
}

impl ApiError for IngestError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidName { .. } => ErrorCode::InvalidDocumentName,
            Self::InvalidPermissions => ErrorCode::InvalidPermissionsFormat,
            Self::PayloadTooLarge { .. } => ErrorCode::FileTooLarge,
            Self::Missing => ErrorCode::MissingFile,
            Self::UnsupportedType { .. } => ErrorCode::UnsupportedFileType,
            Self::Duplicate { .. } => ErrorCode::DuplicateDocument,
            Self::StorageFailure { .. } => ErrorCode::StorageError,
            Self::BrokerUnavailable { .. } => ErrorCode::QueueError,
            Self::NotFound => ErrorCode::DocumentNotFound,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Duplicate {
                existing_id,
                checksum,
            } => Some(json!({
                "existing_document_id": existing_id.to_string(),
                "md5_checksum": checksum,
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_carries_the_existing_id_in_details() {
        let existing = Uuid::new_v4();
        let err = IngestError::Duplicate {
            existing_id: existing,
            checksum: "a".repeat(32),
        };
        assert_eq!(err.error_code().http_status(), 409);
        let details = err.details().unwrap();
        assert_eq!(details["existing_document_id"], existing.to_string());
    }

    #[test]
    fn size_rejection_is_413() {
        let err = IngestError::PayloadTooLarge { size: 62_914_560 };
        assert_eq!(err.error_code(), ErrorCode::FileTooLarge);
        assert_eq!(err.error_code().http_status(), 413);
    }
}
