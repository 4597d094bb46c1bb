//! In-memory object store
//!
//! Implements the multipart contract faithfully enough to verify the
//! abort-on-error invariant: parts live under their upload id until
//! completed or aborted, and an aborted upload leaves nothing behind.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use ragvault_core::traits::object_store::{ObjectStore, ObjectStoreError, PartReceipt};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
    encryption_key_id: String,
    expiry_tagged: bool,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: String,
    encryption_key_id: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// Memory-backed [`ObjectStore`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
    pending: DashMap<String, Mutex<PendingUpload>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight multipart uploads; zero after every failure
    /// path if abort discipline holds.
    #[must_use]
    pub fn pending_upload_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether an object is tagged for lifecycle expiry.
    #[must_use]
    pub fn is_expiry_tagged(&self, key: &str) -> bool {
        self.objects.get(key).is_some_and(|o| o.expiry_tagged)
    }

    /// Encryption key id recorded at initiation (test hook).
    #[must_use]
    pub fn encryption_key_of(&self, key: &str) -> Option<String> {
        self.objects.get(key).map(|o| o.encryption_key_id.clone())
    }

    /// Content type recorded at initiation (test hook).
    #[must_use]
    pub fn content_type_of(&self, key: &str) -> Option<String> {
        self.objects.get(key).map(|o| o.content_type.clone())
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn initiate_multipart(
        &self,
        key: &str,
        content_type: &str,
        encryption_key_id: &str,
    ) -> Result<String, ObjectStoreError> {
        if encryption_key_id.is_empty() {
            return Err(ObjectStoreError::Backend {
                message: "server-side encryption key id is required".to_string(),
            });
        }
        let upload_id = Uuid::new_v4().to_string();
        self.pending.insert(
            upload_id.clone(),
            Mutex::new(PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                encryption_key_id: encryption_key_id.to_string(),
                parts: BTreeMap::new(),
            }),
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<PartReceipt, ObjectStoreError> {
        let pending = self
            .pending
            .get(upload_id)
            .ok_or_else(|| ObjectStoreError::UnknownUpload {
                upload_id: upload_id.to_string(),
            })?;
        let mut guard = pending.lock();
        if guard.key != key {
            return Err(ObjectStoreError::Backend {
                message: format!("upload id {upload_id} belongs to a different key"),
            });
        }
        let etag = format!("{:x}", md5::compute(&body));
        guard.parts.insert(part_number, body);
        Ok(PartReceipt { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<String, ObjectStoreError> {
        let (_, pending) =
            self.pending
                .remove(upload_id)
                .ok_or_else(|| ObjectStoreError::UnknownUpload {
                    upload_id: upload_id.to_string(),
                })?;
        let pending = pending.into_inner();

        if pending.parts.len() != parts.len() {
            return Err(ObjectStoreError::Backend {
                message: "part manifest does not match uploaded parts".to_string(),
            });
        }

        let bytes: Vec<u8> = pending.parts.into_values().flatten().collect();
        let etag = format!("{:x}-{}", md5::compute(&bytes), parts.len());
        self.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: pending.content_type,
                encryption_key_id: pending.encryption_key_id,
                expiry_tagged: false,
            },
        );
        Ok(etag)
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), ObjectStoreError> {
        self.pending.remove(upload_id);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.remove(key);
        Ok(())
    }

    async fn tag_for_expiry(&self, key: &str) -> Result<(), ObjectStoreError> {
        let mut object = self
            .objects
            .get_mut(key)
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })?;
        object.expiry_tagged = true;
        Ok(())
    }
}
