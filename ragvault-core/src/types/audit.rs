//! Append-only audit events
//!
//! Callers construct an [`AuditEvent`]; the sink assigns the monotonic id
//! and server timestamp when it appends. There is no update or delete
//! operation anywhere on this path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Well-known audit action names.
pub mod actions {
    pub const UPLOAD_ATTEMPT: &str = "document.upload_attempt";
    pub const UPLOADED: &str = "document.uploaded";
    pub const DUPLICATE_REJECTED: &str = "document.duplicate_rejected";
    pub const UPLOAD_FAILED: &str = "document.upload_failed";
    pub const QUEUE_FAILED: &str = "document.queue_failed";
    pub const PROCESSED: &str = "document.processed";
    pub const PROCESSING_FAILED: &str = "document.processing_failed";
    pub const DELETED: &str = "document.deleted";
    pub const QUERY_RAG: &str = "query.rag";
    pub const QUERY_RAG_STREAM: &str = "query.rag.stream";
}

/// An audit event as produced by pipeline code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    /// Dotted action string, e.g. `document.uploaded`.
    pub action: String,
    /// Typed resource identifier, e.g. `document:<uuid>`.
    pub resource: Option<String>,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub success: bool,
}

impl AuditEvent {
    #[must_use]
    pub fn new(tenant_id: Uuid, action: impl Into<String>, success: bool) -> Self {
        Self {
            tenant_id,
            user_id: None,
            action: action.into(),
            resource: None,
            metadata: Value::Object(serde_json::Map::new()),
            ip_address: None,
            success,
        }
    }

    #[must_use]
    pub const fn with_user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

/// A stored audit row: the event plus sink-assigned id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic, assigned by the sink.
    pub id: u64,
    #[serde(flatten)]
    pub event: AuditEvent,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_optional_fields() {
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let event = AuditEvent::new(tenant, actions::UPLOADED, true)
            .with_user(Some(user))
            .with_resource(format!("document:{user}"))
            .with_metadata(json!({"size_bytes": 1024}))
            .with_ip(Some("10.0.0.1".to_string()));

        assert_eq!(event.action, "document.uploaded");
        assert_eq!(event.user_id, Some(user));
        assert!(event.success);
        assert_eq!(event.metadata["size_bytes"], 1024);
    }
}
