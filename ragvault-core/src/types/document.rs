//! Document and chunk records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Hard ceiling on uploaded file size (50 MiB).
pub const MAX_FILE_SIZE_BYTES: u64 = 52_428_800;

/// Fixed multipart part size (5 MiB, object-store minimum).
pub const STORAGE_PART_SIZE: usize = 5 * 1024 * 1024;

/// Document lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
    Deleted,
}

impl DocumentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded file owned by a tenant.
///
/// Invariants enforced by the ingestion path and the repository:
/// - `(tenant_id, md5_checksum)` unique among non-deleted rows
/// - `storage_key` starts with `tenants/<tenant_id>/documents/`
/// - `size_bytes <= MAX_FILE_SIZE_BYTES`
/// - `md5_checksum` is 32 lowercase hex chars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub storage_key: String,
    pub original_filename: String,
    pub display_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub md5_checksum: String,
    pub status: DocumentStatus,
    pub chunk_count: u32,
    pub vector_count: u32,
    pub error_message: Option<String>,
    /// Opaque JSON bag; carries optional `document_permissions` tags.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Permission tags attached at upload time, if any.
    #[must_use]
    pub fn permission_tags(&self) -> Vec<String> {
        self.metadata
            .get("document_permissions")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One text segment derived from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    /// 0-based, unique within the document.
    pub chunk_index: u32,
    pub text: String,
    pub token_count: u32,
    /// Deterministic 32-char hex id shared with the vector store.
    pub vector_id: String,
    /// Backend label the vector was written to.
    pub vector_store: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn permission_tags_default_to_empty() {
        let doc = Document {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            uploaded_by: None,
            storage_key: String::new(),
            original_filename: "a.pdf".to_string(),
            display_name: "A".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 1,
            md5_checksum: "0".repeat(32),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            vector_count: 0,
            error_message: None,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(doc.permission_tags().is_empty());

        let mut tagged = doc;
        tagged.metadata = json!({"document_permissions": ["finance", "hr"]});
        assert_eq!(tagged.permission_tags(), vec!["finance", "hr"]);
    }
}
