//! Vector store backends, multipart uploads, and repository backends
//!
//! Two vector-store realizations share one trait: a namespaced shared
//! index and a collection-per-tenant registry. Both are bound to a
//! single tenant at construction and refuse records that claim another
//! tenant. The in-memory object store and repositories back tests and
//! single-node deployments; production swaps them behind the
//! `ragvault-core` traits.

pub mod multipart;
pub mod object;
pub mod repository;
pub mod vector;

pub use multipart::{
    streaming_multipart_upload, MultipartError, ProgressSink, StreamUploadResult, UploadProgress,
};
pub use object::MemoryObjectStore;
pub use repository::memory::{
    MemoryAuditSink, MemoryBroker, MemoryChunkRepository, MemoryDocumentRepository,
    MemoryPromptRepository, MemoryUsageRecorder,
};
pub use vector::collection::CollectionRegistry;
pub use vector::namespaced::SharedVectorIndex;
pub use vector::{MetadataFilter, QueryHit, VectorRecord, VectorStore, VectorStoreError};
