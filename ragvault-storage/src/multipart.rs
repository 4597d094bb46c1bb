//! Streaming multipart uploader
//!
//! Reads the input in fixed 5 MiB chunks and uploads each as one part,
//! maintaining a running MD5 across the whole stream. Peak memory per
//! upload is one part buffer regardless of file size. Any failure
//! aborts the multipart transaction so no orphaned parts remain
//! billable.

use async_trait::async_trait;
use ragvault_core::traits::object_store::{ObjectStore, ObjectStoreError, PartReceipt};
use ragvault_core::{MAX_FILE_SIZE_BYTES, STORAGE_PART_SIZE};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Progress event emitted after each uploaded part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub bytes_received: u64,
    /// Declared content length when the client sent one; otherwise the
    /// running byte count.
    pub bytes_total_hint: u64,
    pub percent: f64,
}

/// Optional async progress callback. Sink failures are swallowed and
/// never affect the upload.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, progress: UploadProgress);
}

/// Returned on success.
#[derive(Debug, Clone)]
pub struct StreamUploadResult {
    pub storage_key: String,
    /// MD5 hex digest of the complete byte stream.
    pub md5_checksum: String,
    pub size_bytes: u64,
    /// Etag of the completed multipart object.
    pub etag: String,
    pub part_count: u32,
}

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("upload exceeds the {MAX_FILE_SIZE_BYTES}-byte limit")]
    TooLarge { bytes_seen: u64 },

    #[error("upload stream contained no bytes")]
    Empty,

    #[error("stream read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// Stream `reader` into `key` as a multipart upload.
///
/// # Errors
/// [`MultipartError::TooLarge`] once the cumulative size passes the
/// ceiling, [`MultipartError::Empty`] for a zero-byte stream, or the
/// underlying store/read error. The multipart transaction is aborted on
/// every error path.
pub async fn streaming_multipart_upload<R>(
    store: &dyn ObjectStore,
    key: &str,
    content_type: &str,
    encryption_key_id: &str,
    mut reader: R,
    size_hint: Option<u64>,
    progress: Option<&dyn ProgressSink>,
) -> Result<StreamUploadResult, MultipartError>
where
    R: AsyncRead + Send + Unpin,
{
    let upload_id = store
        .initiate_multipart(key, content_type, encryption_key_id)
        .await?;
    debug!(key, upload_id, "multipart upload initiated");

    match run_parts(store, key, &upload_id, &mut reader, size_hint, progress).await {
        Ok(result) => {
            info!(
                key,
                parts = result.part_count,
                size_bytes = result.size_bytes,
                etag = %result.etag,
                "multipart upload complete"
            );
            Ok(result)
        }
        Err(err) => {
            // Abort so no orphaned parts remain; the original error
            // takes precedence over any abort failure.
            if let Err(abort_err) = store.abort_multipart(key, &upload_id).await {
                warn!(key, upload_id, error = %abort_err, "failed to abort multipart upload");
            } else {
                warn!(key, upload_id, "multipart upload aborted");
            }
            Err(err)
        }
    }
}

async fn run_parts<R>(
    store: &dyn ObjectStore,
    key: &str,
    upload_id: &str,
    reader: &mut R,
    size_hint: Option<u64>,
    progress: Option<&dyn ProgressSink>,
) -> Result<StreamUploadResult, MultipartError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut md5_context = md5::Context::new();
    let mut parts: Vec<PartReceipt> = Vec::new();
    let mut total_bytes: u64 = 0;
    let mut part_number: u32 = 0;

    loop {
        let chunk = read_full_chunk(reader, STORAGE_PART_SIZE).await?;
        if chunk.is_empty() {
            break;
        }

        total_bytes += chunk.len() as u64;
        if total_bytes > MAX_FILE_SIZE_BYTES {
            return Err(MultipartError::TooLarge {
                bytes_seen: total_bytes,
            });
        }

        md5_context.consume(&chunk);
        part_number += 1;
        let receipt = store
            .upload_part(key, upload_id, part_number, chunk)
            .await?;
        parts.push(receipt);

        if let Some(sink) = progress {
            let total_hint = size_hint.unwrap_or(total_bytes).max(total_bytes);
            #[allow(clippy::cast_precision_loss)]
            let percent = if total_hint == 0 {
                100.0
            } else {
                (total_bytes as f64 / total_hint as f64) * 100.0
            };
            sink.emit(UploadProgress {
                bytes_received: total_bytes,
                bytes_total_hint: total_hint,
                percent,
            })
            .await;
        }
    }

    if part_number == 0 {
        return Err(MultipartError::Empty);
    }

    let etag = store.complete_multipart(key, upload_id, &parts).await?;

    Ok(StreamUploadResult {
        storage_key: key.to_string(),
        md5_checksum: format!("{:x}", md5_context.compute()),
        size_bytes: total_bytes,
        etag,
        part_count: part_number,
    })
}

/// Read until `len` bytes are buffered or the stream ends.
async fn read_full_chunk<R>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Send + Unpin,
{
    let mut buffer = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}
