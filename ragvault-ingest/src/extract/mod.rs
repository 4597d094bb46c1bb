//! Text extraction cascade
//!
//! Strategy pattern over a native text layer with an OCR fallback. The
//! native pass is fast and in-process; when it yields fewer than 50
//! characters per page on average, the document is classified as
//! scanned and the configured OCR strategy runs. An OCR failure or an
//! empty OCR result falls back to the native partial rather than
//! failing the worker.

pub mod ocr;

pub use ocr::{ManagedOcrClient, ManagedOcrEngine, OcrJobStatus};

use crate::chunker::normalize_text;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Below this average character density a document counts as scanned.
pub const SCANNED_MIN_CHARS_PER_PAGE: usize = 50;

/// One extracted page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    /// 1-based page number.
    pub page_number: u32,
    pub text: String,
    /// OCR confidence in `[0, 1]`; `1.0` for native text layers.
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("text layer engine failed: {message}")]
    Engine { message: String },

    #[error("OCR failed: {message}")]
    OcrFailed { message: String },

    /// The managed OCR job did not finish within the polling ceiling.
    /// Non-retriable: re-running the whole task hits the same wall.
    #[error("OCR job timed out")]
    OcrTimeout,
}

/// Native text layer seam (the concrete PDF/DOCX parser is an external
/// collaborator).
#[async_trait]
pub trait TextLayerEngine: Send + Sync {
    async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Vec<ExtractedPage>, ExtractError>;

    fn name(&self) -> &'static str;
}

/// OCR strategy seam. `page_hint` is the page count observed by the
/// native pass, used to pick a sync or async job on managed backends.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(
        &self,
        bytes: &[u8],
        storage_key: &str,
        page_hint: usize,
    ) -> Result<Vec<ExtractedPage>, ExtractError>;

    fn name(&self) -> &'static str;
}

/// Built-in text layer for plain-text and markdown uploads. Returns no
/// pages for binary formats, which routes them to the OCR strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8TextLayer;

#[async_trait]
impl TextLayerEngine for Utf8TextLayer {
    async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Vec<ExtractedPage>, ExtractError> {
        if content_type != "text/plain" {
            return Ok(Vec::new());
        }
        Ok(vec![ExtractedPage {
            page_number: 1,
            text: String::from_utf8_lossy(bytes).into_owned(),
            confidence: 1.0,
        }])
    }

    fn name(&self) -> &'static str {
        "utf8_text_layer"
    }
}

/// Full extraction output handed to the worker pipeline.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// All pages concatenated with `\n\n` separators.
    pub full_text: String,
    pub pages: Vec<(u32, String)>,
    /// Byte offset of each page's start in `full_text`.
    pub page_map: BTreeMap<usize, u32>,
    pub strategy_used: String,
    pub used_ocr: bool,
    pub total_chars: usize,
    pub page_count: usize,
    /// Average OCR confidence; `-1.0` when not applicable.
    pub avg_confidence: f32,
    pub elapsed_ms: u64,
}

/// Orchestrates the native-then-OCR cascade. The only place that knows
/// the strategy order; callers see [`ExtractionResult`] only.
pub struct ExtractionCascade {
    text_layer: Arc<dyn TextLayerEngine>,
    ocr: Arc<dyn OcrEngine>,
}

impl ExtractionCascade {
    #[must_use]
    pub fn new(text_layer: Arc<dyn TextLayerEngine>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { text_layer, ocr }
    }

    /// Run the cascade for one document.
    ///
    /// # Errors
    /// Only when the native text layer itself fails; OCR problems fall
    /// back to the native partial result.
    pub async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        storage_key: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        let start = Instant::now();

        let native_pages = self.text_layer.extract(bytes, content_type).await?;
        let native_chars: usize = native_pages.iter().map(|p| p.text.chars().count()).sum();
        let avg_chars = native_chars / native_pages.len().max(1);

        let (pages, strategy, used_ocr) = if avg_chars >= SCANNED_MIN_CHARS_PER_PAGE {
            (native_pages, self.text_layer.name().to_string(), false)
        } else {
            info!(
                avg_chars,
                threshold = SCANNED_MIN_CHARS_PER_PAGE,
                "native text layer sparse, treating document as scanned"
            );
            match self.ocr.extract(bytes, storage_key, native_pages.len()).await {
                Ok(ocr_pages)
                    if ocr_pages.iter().map(|p| p.text.chars().count()).sum::<usize>() > 0 =>
                {
                    (ocr_pages, self.ocr.name().to_string(), true)
                }
                Ok(_) => {
                    warn!("OCR produced no text, keeping native partial result");
                    (native_pages, self.text_layer.name().to_string(), false)
                }
                Err(err) => {
                    warn!(error = %err, "OCR failed, keeping native partial result");
                    (native_pages, self.text_layer.name().to_string(), false)
                }
            }
        };

        Ok(assemble(pages, strategy, used_ocr, start))
    }
}

fn assemble(
    pages: Vec<ExtractedPage>,
    strategy_used: String,
    used_ocr: bool,
    start: Instant,
) -> ExtractionResult {
    let mut ordered = pages;
    ordered.sort_by_key(|p| p.page_number);

    // Page texts are normalized here, before the offsets are recorded,
    // so the map is keyed in the same coordinate space the chunker
    // operates on (its own normalization pass is idempotent over this
    // text). Pages that normalize to nothing get no map entry; there
    // is no text to attribute to them.
    let mut page_map = BTreeMap::new();
    let mut offset = 0usize;
    let mut texts = Vec::with_capacity(ordered.len());
    for page in &ordered {
        let text = normalize_text(&page.text);
        if text.is_empty() {
            continue;
        }
        page_map.insert(offset, page.page_number);
        offset += text.len() + 2;
        texts.push(text);
    }
    let full_text = texts.join("\n\n");

    let avg_confidence = if used_ocr && !ordered.is_empty() {
        ordered.iter().map(|p| p.confidence).sum::<f32>() / ordered.len() as f32
    } else {
        -1.0
    };

    ExtractionResult {
        total_chars: full_text.chars().count(),
        page_count: ordered.len(),
        pages: ordered.into_iter().map(|p| (p.page_number, p.text)).collect(),
        full_text,
        page_map,
        strategy_used,
        used_ocr,
        avg_confidence,
        elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}
