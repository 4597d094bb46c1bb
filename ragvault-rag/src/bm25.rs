//! In-memory BM25 scoring over a candidate corpus
//!
//! Late-fusion pattern: the index is built per query over the dense
//! retriever's candidate set, which keeps it tenant-scoped by
//! inheritance and avoids a separate search cluster. Okapi BM25 with
//! the usual k1 = 1.5, b = 0.75.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Minimal stopword set for tokenisation.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "it", "as", "be", "was", "are", "that", "this", "which", "have", "has", "had",
    "not", "no", "can", "will", "would", "could", "should", "may", "might", "do", "does", "did",
    "its", "their", "our", "your", "my", "his", "her",
];

/// Lowercase, strip punctuation (keeping hyphens for identifiers like
/// `SN-48291`), drop stopwords. Never returns an empty list.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let tokens: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-')
                .collect::<String>()
        })
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(&token.as_str()))
        .collect();
    if tokens.is_empty() {
        vec!["<empty>".to_string()]
    } else {
        tokens
    }
}

/// One scored corpus entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    /// Index into the corpus the index was built from.
    pub corpus_index: usize,
    pub score: f64,
    /// 1-based rank in the result list.
    pub rank: usize,
}

/// Okapi BM25 index over tokenized documents.
#[derive(Debug)]
pub struct Bm25Index {
    documents: Vec<Vec<String>>,
    doc_frequencies: HashMap<String, usize>,
    avg_doc_len: f64,
}

impl Bm25Index {
    /// Build an index over a corpus of texts.
    ///
    /// # Errors
    /// Returns an error string for an empty corpus; the caller degrades
    /// to dense-only retrieval.
    pub fn build(corpus: &[String]) -> Result<Self, String> {
        if corpus.is_empty() {
            return Err("BM25 index requires a non-empty corpus".to_string());
        }

        let documents: Vec<Vec<String>> = corpus.iter().map(|text| tokenize(text)).collect();
        let mut doc_frequencies: HashMap<String, usize> = HashMap::new();
        for tokens in &documents {
            let mut seen: Vec<&String> = tokens.iter().collect();
            seen.sort();
            seen.dedup();
            for token in seen {
                *doc_frequencies.entry(token.clone()).or_insert(0) += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let avg_doc_len =
            documents.iter().map(Vec::len).sum::<usize>() as f64 / documents.len() as f64;

        Ok(Self {
            documents,
            doc_frequencies,
            avg_doc_len,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Score the query against every document, returning the `top_k`
    /// ranked hits.
    #[must_use]
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Bm25Hit> {
        let query_tokens = tokenize(query);
        #[allow(clippy::cast_precision_loss)]
        let n = self.documents.len() as f64;

        let mut scored: Vec<(usize, f64)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(idx, tokens)| {
                #[allow(clippy::cast_precision_loss)]
                let doc_len = tokens.len() as f64;
                let score: f64 = query_tokens
                    .iter()
                    .map(|term| {
                        let tf = tokens.iter().filter(|t| *t == term).count();
                        if tf == 0 {
                            return 0.0;
                        }
                        #[allow(clippy::cast_precision_loss)]
                        let tf = tf as f64;
                        #[allow(clippy::cast_precision_loss)]
                        let df = *self.doc_frequencies.get(term).unwrap_or(&0) as f64;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        idf * (tf * (K1 + 1.0))
                            / (tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_len))
                    })
                    .sum();
                (idx, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k.min(self.documents.len()))
            .enumerate()
            .map(|(rank, (corpus_index, score))| Bm25Hit {
                corpus_index,
                score,
                rank: rank + 1,
            })
            .collect()
    }
}
