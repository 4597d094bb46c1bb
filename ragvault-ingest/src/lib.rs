//! Upload orchestration and the asynchronous processing pipeline pieces
//!
//! The request path runs the nine-step ingestion pipeline: validate,
//! sniff, stream to storage, dedupe, persist, audit, enqueue. The
//! worker-side pieces here (extraction cascade, semantic chunker,
//! embedding pipeline) are pure or trait-injected so the worker runtime
//! can drive them without touching any SDK directly.

pub mod chunker;
pub mod embed;
pub mod error;
pub mod extract;
pub mod mime;
pub mod orchestrator;
pub mod progress;
pub mod service;

pub use chunker::{ChunkerConfig, SemanticChunker, TextChunk};
pub use embed::{EmbeddingOutput, EmbeddingPipeline};
pub use error::IngestError;
pub use extract::{
    ExtractError, ExtractionCascade, ExtractionResult, ExtractedPage, ManagedOcrClient,
    ManagedOcrEngine, OcrEngine, OcrJobStatus, TextLayerEngine, Utf8TextLayer,
};
pub use orchestrator::{IngestionService, UploadRequest, UploadResponse};
pub use progress::{ProgressBroker, ProgressEvent};
pub use service::{DocumentService, DocumentStatusView};
