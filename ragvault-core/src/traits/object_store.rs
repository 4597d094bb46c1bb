//! Object storage seam
//!
//! Models the multipart subset of an S3-style object store. Server-side
//! encryption with the tenant's key identifier is mandatory on every
//! write, so the key id is a required argument on initiation.

use async_trait::async_trait;
use thiserror::Error;

/// Receipt for one uploaded part; required to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    /// 1-based part number.
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("unknown multipart upload: {upload_id}")]
    UnknownUpload { upload_id: String },

    #[error("object storage backend error: {message}")]
    Backend { message: String },
}

/// S3-style object store bound to one bucket.
///
/// Implementations must treat `abort_multipart` as the cleanup of record:
/// after an abort no parts for that upload id remain billable.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload with mandatory server-side encryption
    /// under `encryption_key_id`. Returns the upload id.
    async fn initiate_multipart(
        &self,
        key: &str,
        content_type: &str,
        encryption_key_id: &str,
    ) -> Result<String, ObjectStoreError>;

    /// Upload one part. Part numbers are 1-based and dense.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<PartReceipt, ObjectStoreError>;

    /// Complete the upload from the recorded receipts. Returns the final
    /// etag of the assembled object.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<String, ObjectStoreError>;

    /// Abort an in-progress upload so no orphaned parts remain.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), ObjectStoreError>;

    /// Fetch a complete object.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Hard-delete an object.
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Best-effort soft delete: tag the object so a lifecycle rule
    /// expires it. Used when a duplicate upload is rejected after the
    /// bytes already landed.
    async fn tag_for_expiry(&self, key: &str) -> Result<(), ObjectStoreError>;
}
