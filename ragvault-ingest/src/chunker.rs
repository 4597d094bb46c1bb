//! Semantic text chunker
//!
//! Heading/paragraph/sentence segmentation targeting 200–2,000
//! characters per chunk. Chunk ids are deterministic
//! (`sha256(tenant:document:index)` truncated to 32 hex chars) so
//! re-processing a document upserts instead of duplicating. The
//! chunker is pure: same input, same chunks, byte for byte.

use regex::Regex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Heading heuristics: Markdown hashes, numbered sections, all-caps
/// runs, and well-known section words.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^(
            \#{1,6}\s+.+
          | [A-Z][A-Z\s]{4,}
          | (?:\d+\.)+\d*\s+[A-Z].{3,}
          | (?:Section|Chapter|Article|Appendix)\s+\S+
        )$",
    )
    .unwrap_or_else(|e| unreachable!("heading regex is static: {e}"))
});

/// Zero-width and non-breaking space code points collapsed to plain
/// spaces during normalization.
static INVISIBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[\u{00a0}\u{200b}\u{200c}\u{200d}\u{feff}]")
        .unwrap_or_else(|e| unreachable!("invisible regex is static: {e}"))
});

static EXCESS_NEWLINES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n{3,}").unwrap_or_else(|e| unreachable!("newline regex is static: {e}"))
});

static PARAGRAPH_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n\s*\n").unwrap_or_else(|e| unreachable!("paragraph regex is static: {e}"))
});

/// Size bounds in characters (roughly 50–500 tokens at 4 chars/token).
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    /// Overlap applied only when hard-splitting an oversized run.
    pub overlap_chars: usize,
    /// Lines shorter than this never count as headings.
    pub min_heading_len: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 200,
            max_chars: 2000,
            overlap_chars: 100,
            min_heading_len: 8,
        }
    }
}

/// One chunk ready for embedding and vector upsert.
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// Deterministic 32-char hex id.
    pub chunk_id: String,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub text: String,
    pub char_count: usize,
    pub token_est: u32,
    /// 1-based page where the chunk starts.
    pub page_number: u32,
    pub source_key: String,
    /// Nearest preceding heading, empty when none.
    pub heading: String,
    /// Full metadata bag for the vector record.
    pub metadata: HashMap<String, Value>,
}

/// Stateless chunker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticChunker {
    config: ChunkerConfig,
}

impl SemanticChunker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_config(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Segment `text` into ordered chunks.
    #[must_use]
    pub fn chunk(
        &self,
        text: &str,
        tenant_id: Uuid,
        document_id: Uuid,
        source_key: &str,
        page_map: Option<&BTreeMap<usize, u32>>,
        extra_meta: Option<&HashMap<String, Value>>,
    ) -> Vec<TextChunk> {
        let text = normalize_text(text);
        if text.trim().is_empty() {
            warn!(document_id = %document_id, "chunker received empty text");
            return Vec::new();
        }

        let sections = self.split_into_sections(&text);
        let pieces = self.sections_to_pieces(&sections);
        let sized = self.enforce_size_limits(pieces);

        let mut chunks = Vec::with_capacity(sized.len());
        for (idx, (chunk_text, heading)) in sized.into_iter().enumerate() {
            let idx = u32::try_from(idx).unwrap_or(u32::MAX);
            let prefix: String = chunk_text.chars().take(40).collect();
            let offset = text.find(&prefix).unwrap_or(0);
            let page_number = lookup_page(offset, page_map);
            let chunk_id = deterministic_chunk_id(tenant_id, document_id, idx);
            let char_count = chunk_text.chars().count();
            let token_est = u32::try_from((char_count / 4).max(1)).unwrap_or(u32::MAX);

            let mut metadata: HashMap<String, Value> = HashMap::from([
                ("tenant_id".to_string(), json!(tenant_id.to_string())),
                ("document_id".to_string(), json!(document_id.to_string())),
                ("chunk_index".to_string(), json!(idx)),
                ("page_number".to_string(), json!(page_number)),
                ("source_key".to_string(), json!(source_key)),
                ("heading".to_string(), json!(heading)),
                ("char_count".to_string(), json!(char_count)),
                ("token_est".to_string(), json!(token_est)),
            ]);
            if let Some(extra) = extra_meta {
                for (k, v) in extra {
                    metadata.insert(k.clone(), v.clone());
                }
            }

            chunks.push(TextChunk {
                chunk_id,
                tenant_id,
                document_id,
                chunk_index: idx,
                char_count,
                token_est,
                page_number,
                source_key: source_key.to_string(),
                heading,
                metadata,
                text: chunk_text,
            });
        }

        debug!(
            document_id = %document_id,
            chunks = chunks.len(),
            "chunking complete"
        );
        chunks
    }

    /// Split into `(block, nearest_heading)` pairs on heading lines.
    fn split_into_sections(&self, text: &str) -> Vec<(String, String)> {
        let mut sections = Vec::new();
        let mut current_heading = String::new();
        let mut current_lines: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            let stripped = line.trim();
            let is_heading = stripped.chars().count() >= self.config.min_heading_len
                && HEADING_RE.is_match(stripped);

            if is_heading {
                let block = current_lines.join("\n").trim().to_string();
                if !block.is_empty() {
                    sections.push((block, current_heading.clone()));
                }
                current_heading = stripped.to_string();
                current_lines.clear();
            } else {
                current_lines.push(line);
            }
        }

        let block = current_lines.join("\n").trim().to_string();
        if !block.is_empty() {
            sections.push((block, current_heading));
        }

        if sections.is_empty() {
            sections.push((text.to_string(), String::new()));
        }
        sections
    }

    /// Paragraph-level pieces; long paragraphs split at sentence
    /// boundaries.
    fn sections_to_pieces(&self, sections: &[(String, String)]) -> Vec<(String, String)> {
        let mut pieces = Vec::new();
        for (section_text, heading) in sections {
            for paragraph in PARAGRAPH_SPLIT_RE.split(section_text) {
                let paragraph = paragraph.trim();
                if paragraph.is_empty() {
                    continue;
                }
                if paragraph.chars().count() <= self.config.max_chars {
                    pieces.push((paragraph.to_string(), heading.clone()));
                } else {
                    pieces.extend(
                        split_sentences(paragraph)
                            .into_iter()
                            .filter(|s| !s.trim().is_empty())
                            .map(|s| (s, heading.clone())),
                    );
                }
            }
        }
        pieces
    }

    /// Merge short pieces with their successors, then hard-split any
    /// piece still over the ceiling.
    fn enforce_size_limits(&self, pieces: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = Vec::new();
        let mut buffer_text = String::new();
        let mut buffer_heading = String::new();

        for (text, heading) in pieces {
            if buffer_text.is_empty() {
                buffer_text = text;
                buffer_heading = heading;
            } else if buffer_text.chars().count() < self.config.min_chars {
                buffer_text.push_str("\n\n");
                buffer_text.push_str(&text);
                if buffer_heading.is_empty() {
                    buffer_heading = heading;
                }
            } else {
                merged.push((buffer_text, buffer_heading));
                buffer_text = text;
                buffer_heading = heading;
            }
        }
        if !buffer_text.is_empty() {
            merged.push((buffer_text, buffer_heading));
        }

        let mut sized = Vec::new();
        for (text, heading) in merged {
            if text.chars().count() <= self.config.max_chars {
                sized.push((text, heading));
            } else {
                sized.extend(self.hard_split(&text, &heading));
            }
        }
        sized
    }

    /// Split an oversized run into overlapping windows, breaking at the
    /// last sentence boundary before the cutoff when one exists past
    /// the minimum size.
    fn hard_split(&self, text: &str, heading: &str) -> Vec<(String, String)> {
        let chars: Vec<char> = text.chars().collect();
        let mut parts = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let mut end = (start + self.config.max_chars).min(chars.len());
            if end < chars.len() {
                if let Some(boundary) = last_sentence_end(&chars, start, end) {
                    if boundary > start + self.config.min_chars {
                        end = boundary;
                    }
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim().to_string();
            if !piece.is_empty() {
                parts.push((piece, heading.to_string()));
            }

            if end >= chars.len() {
                break;
            }
            start = (end.saturating_sub(self.config.overlap_chars)).max(start + 1);
        }
        parts
    }
}

/// NFC-normalize, collapse invisible spaces, cap consecutive newlines
/// at two, and strip trailing whitespace per line.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let text: String = text.nfc().collect();
    let text = INVISIBLE_RE.replace_all(&text, " ");
    let text = EXCESS_NEWLINES_RE.replace_all(&text, "\n\n");
    text.split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Deterministic chunk id: `sha256(tenant:document:index)` truncated to
/// 32 hex characters.
#[must_use]
pub fn deterministic_chunk_id(tenant_id: Uuid, document_id: Uuid, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{tenant_id}:{document_id}:{chunk_index}").as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..32].to_string()
}

/// Split at sentence-final punctuation followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |next| next.is_whitespace()) {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Index one past the last `". "` boundary within `[start, end)`.
fn last_sentence_end(chars: &[char], start: usize, end: usize) -> Option<usize> {
    (start..end.saturating_sub(1))
        .rev()
        .find(|&i| chars[i] == '.' && chars[i + 1] == ' ')
        .map(|i| i + 1)
}

/// Page for a byte offset, from the page map's floor entry.
fn lookup_page(offset: usize, page_map: Option<&BTreeMap<usize, u32>>) -> u32 {
    page_map
        .and_then(|map| map.range(..=offset).next_back().map(|(_, page)| *page))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_all(text: &str) -> Vec<TextChunk> {
        SemanticChunker::new().chunk(
            text,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "tenants/t/documents/d.pdf",
            None,
            None,
        )
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_all("").is_empty());
        assert!(chunk_all("   \n\n  ").is_empty());
    }

    #[test]
    fn chunker_is_deterministic() {
        let tenant = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let text = format!(
            "# Overview\n\n{}\n\n# Details\n\n{}",
            "Sentences about the overview. ".repeat(20),
            "Sentences about the details. ".repeat(20)
        );

        let chunker = SemanticChunker::new();
        let a = chunker.chunk(&text, tenant, doc, "key", None, None);
        let b = chunker.chunk(&text, tenant, doc, "key", None, None);

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn chunk_ids_follow_the_hash_rule() {
        let tenant = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let id = deterministic_chunk_id(tenant, doc, 3);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let mut hasher = Sha256::new();
        hasher.update(format!("{tenant}:{doc}:3").as_bytes());
        assert_eq!(id, hex::encode(hasher.finalize())[..32]);
    }

    #[test]
    fn headings_are_detected_and_attached() {
        let body = "This paragraph sits under the budget heading and is long enough to stand on its own as a chunk because it comfortably exceeds the minimum chunk size limit of two hundred characters when padded with some more explanatory prose about quarterly spending.";
        let text = format!("# Budget Report\n\n{body}");
        let chunks = chunk_all(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "# Budget Report");
    }

    #[test]
    fn short_pieces_merge_with_successors() {
        let filler = "This successor paragraph provides plenty of additional content so that the merged result clears the minimum chunk size threshold without any trouble at all, padded further with words.";
        let text = format!("Tiny lead-in.\n\n{filler}");
        let chunks = chunk_all(&text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("Tiny lead-in."));
        assert!(chunks[0].text.contains(filler));
    }

    #[test]
    fn sentence_runs_split_at_sentence_boundaries() {
        let text = "word word word word word word word word word. ".repeat(120);
        let chunks = chunk_all(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.char_count <= 2000, "chunk too big: {}", chunk.char_count);
            assert!(chunk.text.ends_with('.'), "chunk split mid-sentence");
        }
    }

    #[test]
    fn oversized_single_sentence_hard_splits_with_overlap() {
        // 5,000 chars with no sentence-final punctuation forces the
        // windowed split.
        let token_run = "alpha beta gamma delta epsilon ".repeat(160);
        let chunks = chunk_all(&token_run);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.char_count <= 2000, "chunk too big: {}", chunk.char_count);
        }
        // Overlap: the 100-char tail of chunk N reappears in N+1.
        let first = &chunks[0].text;
        let second = &chunks[1].text;
        let tail: String = first.chars().rev().take(60).collect::<String>();
        let tail: String = tail.chars().rev().collect();
        assert!(second.contains(tail.trim()));
    }

    #[test]
    fn normalization_collapses_invisible_chars_and_newlines() {
        let raw = "a\u{00a0}b\u{200b}c\n\n\n\nnext   \n";
        let normalized = normalize_text(raw);
        assert_eq!(normalized, "a b c\n\nnext");
    }

    #[test]
    fn page_numbers_come_from_the_page_map() {
        let page_one = "Alpha content sentence repeated to provide enough length for a full chunk. ".repeat(4);
        let page_two = "Beta content sentence repeated to provide enough length for a full chunk too. ".repeat(4);
        let text = format!("{}\n\n{}", page_one.trim(), page_two.trim());

        let mut page_map = BTreeMap::new();
        page_map.insert(0usize, 1u32);
        page_map.insert(page_one.trim().len() + 2, 2u32);

        let chunks = SemanticChunker::new().chunk(
            &text,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "key",
            Some(&page_map),
            None,
        );
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks.last().unwrap().page_number, 2);
    }

    #[test]
    fn extra_metadata_propagates_to_every_chunk() {
        let extra: HashMap<String, Value> =
            [("used_ocr".to_string(), json!(true))].into_iter().collect();
        let text = "Content sentence that is repeated to make a sensible chunk for metadata checks. "
            .repeat(4);
        let chunks = SemanticChunker::new().chunk(
            &text,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "key",
            None,
            Some(&extra),
        );
        assert!(chunks.iter().all(|c| c.metadata["used_ocr"] == json!(true)));
    }

    #[test]
    fn boundary_sizes_behave_as_specified() {
        let config = ChunkerConfig::default();
        let chunker = SemanticChunker::new();

        // Exactly MIN chars: kept as its own chunk.
        let exact: String = "a".repeat(config.min_chars);
        let tail = "Successor paragraph with enough text to be its own standalone chunk after the exact minimum one, padded well beyond the minimum chunk size threshold with additional explanatory words to be safe and sufficient.";
        let text = format!("{exact}\n\n{tail}");
        let chunks = chunker.chunk(&text, Uuid::new_v4(), Uuid::new_v4(), "k", None, None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].char_count, config.min_chars);

        // MIN-1 chars: merged with its successor.
        let short: String = "a".repeat(config.min_chars - 1);
        let text = format!("{short}\n\n{tail}");
        let chunks = chunker.chunk(&text, Uuid::new_v4(), Uuid::new_v4(), "k", None, None);
        assert_eq!(chunks.len(), 1);
    }
}
