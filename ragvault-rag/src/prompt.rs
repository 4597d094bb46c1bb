//! Versioned prompt loading with A/B routing and context shaping
//!
//! Resolution order: tenant-specific active rows, then global active
//! rows, then the hard-coded default. Among multiple active variants
//! one is picked by weighted random sampling over `ab_weight`. Rows are
//! cached in-process for 60 seconds. The long-context reorder places
//! the most relevant documents at the edges of the context window,
//! where attention is strongest.

use crate::retriever::RetrievedDocument;
use parking_lot::Mutex;
use ragvault_core::traits::clock::Clock;
use ragvault_core::traits::repository::PromptRepository;
use ragvault_core::PromptTemplate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};
use uuid::Uuid;

const CACHE_TTL_SECONDS: i64 = 60;

/// Fallback used when no template row matches.
const DEFAULT_SYSTEM_TEMPLATE: &str = "\
You are a private AI assistant for {tenant_name}.
You answer questions ONLY using the provided context from the company's documents.
If the answer is not in the context, say \"I don't have enough information to answer that.\"
Do not fabricate information. Do not reference information outside the provided context.

Context:
{context}
";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-zA-Z_]+)\}").unwrap_or_else(|e| unreachable!("placeholder regex: {e}"))
});

const KNOWN_PLACEHOLDERS: &[&str] = &["tenant_name", "context", "question"];

/// Loads, caches, selects, and renders system prompt templates.
pub struct PromptManager {
    repo: Arc<dyn PromptRepository>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    prompt_name: String,
    cache: Mutex<HashMap<String, (chrono::DateTime<chrono::Utc>, Vec<PromptTemplate>)>>,
}

impl PromptManager {
    #[must_use]
    pub fn new(repo: Arc<dyn PromptRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            rng: Mutex::new(StdRng::from_entropy()),
            prompt_name: "rag_system".to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic A/B sampling for tests.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    #[must_use]
    pub fn with_prompt_name(mut self, name: impl Into<String>) -> Self {
        self.prompt_name = name.into();
        self
    }

    /// Resolve and render the system prompt for one query.
    pub async fn system_prompt(
        &self,
        tenant_id: Uuid,
        tenant_name: &str,
        context: &str,
        question: &str,
    ) -> String {
        let template = self.load_template(tenant_id).await;
        render_template(&template, tenant_name, context, question)
    }

    async fn load_template(&self, tenant_id: Uuid) -> String {
        let tenant_rows = self.fetch_active(Some(tenant_id)).await;
        if !tenant_rows.is_empty() {
            let chosen = self.select_variant(&tenant_rows);
            debug!(name = %chosen.name, version = chosen.version, "using tenant template");
            return chosen.template_text.clone();
        }

        let global_rows = self.fetch_active(None).await;
        if !global_rows.is_empty() {
            let chosen = self.select_variant(&global_rows);
            debug!(name = %chosen.name, version = chosen.version, "using global template");
            return chosen.template_text.clone();
        }

        debug!(name = %self.prompt_name, "no template rows, using built-in default");
        DEFAULT_SYSTEM_TEMPLATE.to_string()
    }

    async fn fetch_active(&self, tenant_id: Option<Uuid>) -> Vec<PromptTemplate> {
        let key = format!("{tenant_id:?}:{}", self.prompt_name);
        let now = self.clock.now();

        if let Some((fetched_at, rows)) = self.cache.lock().get(&key) {
            if (now - *fetched_at).num_seconds() < CACHE_TTL_SECONDS {
                return rows.clone();
            }
        }

        let rows = match self.repo.active_templates(tenant_id, &self.prompt_name).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "prompt repository unavailable, treating as no rows");
                Vec::new()
            }
        };
        self.cache.lock().insert(key, (now, rows.clone()));
        rows
    }

    /// Weighted random selection proportional to `ab_weight`. A zero
    /// total weight selects the first entry.
    fn select_variant<'a>(&self, variants: &'a [PromptTemplate]) -> &'a PromptTemplate {
        if variants.len() == 1 {
            return &variants[0];
        }
        let total: u32 = variants.iter().map(|v| v.ab_weight).sum();
        if total == 0 {
            return &variants[0];
        }

        let roll = self.rng.lock().gen_range(0..total);
        let mut cumulative = 0u32;
        for variant in variants {
            cumulative += variant.ab_weight;
            if roll < cumulative {
                return variant;
            }
        }
        variants
            .last()
            .unwrap_or_else(|| unreachable!("variants checked non-empty"))
    }

    /// Reorder retrieved documents so the most relevant occupy the
    /// first and last context positions, mitigating middle-position
    /// attention decay. Skipped for two or fewer documents.
    #[must_use]
    pub fn reorder_context(docs: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        if docs.len() <= 2 {
            return docs;
        }
        let mut reversed = docs;
        reversed.reverse();
        let mut reordered: Vec<RetrievedDocument> = Vec::with_capacity(reversed.len());
        for (i, doc) in reversed.into_iter().enumerate() {
            if i % 2 == 1 {
                reordered.push(doc);
            } else {
                reordered.insert(0, doc);
            }
        }
        reordered
    }

    /// Serialize documents into the context block injected into the
    /// prompt, with source, page, and relevance headers for citations.
    #[must_use]
    pub fn format_context(docs: &[RetrievedDocument]) -> String {
        let mut parts = Vec::with_capacity(docs.len());
        for (i, doc) in docs.iter().enumerate() {
            let source = doc
                .metadata
                .get("source_key")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let page = doc
                .metadata
                .get("page_number")
                .and_then(Value::as_u64)
                .map_or_else(|| "?".to_string(), |p| p.to_string());
            let heading = doc.metadata.get("heading").and_then(Value::as_str);

            let mut header = format!("[{}] Source: {source} | Page: {page}", i + 1);
            if let Some(heading) = heading.filter(|h| !h.is_empty()) {
                header.push_str(&format!(" | Section: {heading}"));
            }
            header.push_str(&format!(" | Relevance: {:.3}", doc.relevance()));
            parts.push(format!("{header}\n{}", doc.text));
        }
        parts.join("\n\n---\n\n")
    }
}

/// Substitute the known placeholders. A template containing an unknown
/// placeholder is returned raw, with a warning.
fn render_template(template: &str, tenant_name: &str, context: &str, question: &str) -> String {
    for capture in PLACEHOLDER_RE.captures_iter(template) {
        let name = &capture[1];
        if !KNOWN_PLACEHOLDERS.contains(&name) {
            warn!(placeholder = name, "unknown template placeholder, using raw template");
            return template.to_string();
        }
    }
    template
        .replace("{tenant_name}", tenant_name)
        .replace("{context}", context)
        .replace("{question}", question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragvault_core::traits::clock::SystemClock;
    use ragvault_storage::MemoryPromptRepository;
    use serde_json::json;

    fn template(
        tenant_id: Option<Uuid>,
        version: u32,
        text: &str,
        weight: u32,
        active: bool,
    ) -> PromptTemplate {
        PromptTemplate {
            id: Uuid::new_v4(),
            tenant_id,
            name: "rag_system".to_string(),
            version,
            template_text: text.to_string(),
            is_active: active,
            ab_weight: weight,
            created_at: chrono::Utc::now(),
        }
    }

    fn doc(id: &str, relevance: f64) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            text: format!("text of {id}"),
            metadata: HashMap::from([
                ("vector_score".to_string(), json!(relevance)),
                ("source_key".to_string(), json!("tenants/t/documents/a.pdf")),
                ("page_number".to_string(), json!(2)),
                ("heading".to_string(), json!("# Intro")),
            ]),
        }
    }

    #[tokio::test]
    async fn falls_back_tenant_then_global_then_default() {
        let repo = Arc::new(MemoryPromptRepository::new());
        let manager = PromptManager::new(repo.clone(), Arc::new(SystemClock)).with_rng_seed(7);
        let tenant = Uuid::new_v4();

        // Nothing in the repo: built-in default.
        let prompt = manager.system_prompt(tenant, "Acme", "CTX", "Q").await;
        assert!(prompt.contains("Acme"));
        assert!(prompt.contains("CTX"));

        // Global row takes over once present (cache forces a fresh
        // manager).
        repo.insert(template(None, 1, "global for {tenant_name}: {context}", 100, true))
            .await
            .unwrap();
        let manager = PromptManager::new(repo.clone(), Arc::new(SystemClock)).with_rng_seed(7);
        let prompt = manager.system_prompt(tenant, "Acme", "CTX", "Q").await;
        assert!(prompt.starts_with("global for Acme"));

        // Tenant-specific row wins over global.
        repo.insert(template(
            Some(tenant),
            1,
            "tenant prompt: {context}",
            100,
            true,
        ))
        .await
        .unwrap();
        let manager = PromptManager::new(repo, Arc::new(SystemClock)).with_rng_seed(7);
        let prompt = manager.system_prompt(tenant, "Acme", "CTX", "Q").await;
        assert!(prompt.starts_with("tenant prompt"));
    }

    #[tokio::test]
    async fn inactive_rows_are_ignored() {
        let repo = Arc::new(MemoryPromptRepository::new());
        repo.insert(template(None, 1, "inactive {context}", 100, false))
            .await
            .unwrap();
        let manager = PromptManager::new(repo, Arc::new(SystemClock)).with_rng_seed(1);
        let prompt = manager
            .system_prompt(Uuid::new_v4(), "Acme", "CTX", "Q")
            .await;
        assert!(prompt.contains("private AI assistant"));
    }

    #[tokio::test]
    async fn weighted_sampling_is_deterministic_with_a_seed() {
        let repo = Arc::new(MemoryPromptRepository::new());
        repo.insert(template(None, 1, "variant A {context}", 80, true))
            .await
            .unwrap();
        repo.insert(template(None, 2, "variant B {context}", 20, true))
            .await
            .unwrap();

        let pick = |seed: u64| {
            let repo = repo.clone();
            async move {
                PromptManager::new(repo, Arc::new(SystemClock))
                    .with_rng_seed(seed)
                    .system_prompt(Uuid::new_v4(), "T", "C", "Q")
                    .await
            }
        };

        // Same seed, same pick.
        assert_eq!(pick(42).await, pick(42).await);

        // Across many seeds the heavy variant dominates.
        let mut a_count = 0;
        for seed in 0..50 {
            if pick(seed).await.starts_with("variant A") {
                a_count += 1;
            }
        }
        assert!(a_count > 25, "80/20 split picked A only {a_count}/50 times");
    }

    #[tokio::test]
    async fn zero_total_weight_selects_the_first_variant() {
        let repo = Arc::new(MemoryPromptRepository::new());
        repo.insert(template(None, 1, "first {context}", 0, true))
            .await
            .unwrap();
        repo.insert(template(None, 2, "second {context}", 0, true))
            .await
            .unwrap();
        let manager = PromptManager::new(repo, Arc::new(SystemClock)).with_rng_seed(3);
        let prompt = manager
            .system_prompt(Uuid::new_v4(), "T", "C", "Q")
            .await;
        assert!(prompt.starts_with("first"));
    }

    #[test]
    fn unknown_placeholders_keep_the_raw_template() {
        let rendered = render_template("hello {nonsense}", "T", "C", "Q");
        assert_eq!(rendered, "hello {nonsense}");

        let rendered = render_template("{tenant_name} / {question}", "T", "C", "Q");
        assert_eq!(rendered, "T / Q");
    }

    #[test]
    fn reorder_places_best_documents_at_the_edges() {
        let docs: Vec<RetrievedDocument> =
            (1..=5).map(|i| doc(&format!("rank{i}"), 1.0 / f64::from(i))).collect();
        let reordered = PromptManager::reorder_context(docs);
        let order: Vec<&str> = reordered.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["rank1", "rank3", "rank5", "rank4", "rank2"]);
    }

    #[test]
    fn reorder_skips_small_sets() {
        let docs = vec![doc("a", 1.0), doc("b", 0.5)];
        let reordered = PromptManager::reorder_context(docs);
        assert_eq!(reordered[0].id, "a");
        assert_eq!(reordered[1].id, "b");
    }

    #[test]
    fn context_blocks_carry_citation_headers() {
        let context = PromptManager::format_context(&[doc("a", 0.9)]);
        assert!(context.contains("[1] Source: tenants/t/documents/a.pdf"));
        assert!(context.contains("Page: 2"));
        assert!(context.contains("Section: # Intro"));
        assert!(context.contains("Relevance: 0.900"));
        assert!(context.contains("text of a"));
    }
}
