//! LLM-driven fuzzy query expansion with a cache tier.
//!
//! A raw human query becomes a small list of arXiv-search-friendly
//! variants. The LLM path is best-effort: an unusable or failed
//! completion falls back to a deterministic expansion, and only the
//! compound failure (LLM unusable *and* fallback empty) is an error.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::QueryExpansion;

/// Token cap for expansion completions; variants are short.
const EXPANSION_MAX_TOKENS: u32 = 512;

/// Prompt template for query expansion. `{max_expansions}` and `{query}`
/// are substituted at render time.
const QUERY_EXPANSION_PROMPT: &str = r#"You are a research query assistant helping search arXiv for
academic papers.

Generate {max_expansions} unique search query variations for the following research topic:
"{query}"

Requirements:
1. Include synonyms and related technical terms
2. Include common abbreviations (e.g., "NN" for "neural network")
3. Include related concepts and methodologies
4. Use arXiv search-friendly syntax (all: for full text search)
5. Each query should maximize recall while staying relevant

Output format (JSON array only, no other text):
["query 1", "query 2", "query 3"]

Example for "transformer time series":
["all:transformer time series", "all:attention mechanism forecasting", "all:temporal transformer prediction"]

Now generate {max_expansions} queries for: "{query}"
"#;

/// Kind of LLM work, used by routers to pick a provider/model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Extraction,
    Synthesis,
    Categorization,
    QueryGeneration,
    Embedding,
}

/// Token accounting reported by the router.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed LLM call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// Parameters for one LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub task_type: TaskType,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub force_provider: Option<String>,
}

/// Router over one or more LLM providers. Injected; the crate never
/// constructs a concrete provider itself.
#[async_trait]
pub trait LlmRouter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse, RelayError>;

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, RelayError>;

    /// Health per provider name.
    async fn health_check_all(&self) -> HashMap<String, bool>;
}

/// Expander statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ExpanderStats {
    pub llm_enabled: bool,
    pub max_expansions: usize,
    pub temperature: f64,
    pub provider: String,
    pub model: String,
    pub expansions_generated: u64,
    pub cache_hits: u64,
    pub fallbacks_used: u64,
}

/// Query expander over an injectable [`LlmRouter`].
///
/// Without a router (or with `llm_query_enabled` off) every expansion
/// comes from the deterministic fallback.
pub struct QueryExpander {
    router: Option<Arc<dyn LlmRouter>>,
    cache: Option<Arc<CacheManager>>,
    config: RelayConfig,

    fence_open: Regex,
    fence_close: Regex,
    non_word: Regex,

    expansions_generated: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks_used: AtomicU64,
}

impl QueryExpander {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            router: None,
            cache: None,
            config,
            fence_open: compile(r"^```(?:json)?\s*")?,
            fence_close: compile(r"\s*```$")?,
            non_word: compile(r"[^\w\s]")?,
            expansions_generated: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            fallbacks_used: AtomicU64::new(0),
        })
    }

    /// Attach an LLM router.
    pub fn with_router(mut self, router: Arc<dyn LlmRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Attach a cache manager for the expansion tier.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Expand a raw query into search variants.
    ///
    /// The result always carries at least one expansion; if even the
    /// deterministic fallback produces nothing the call fails with
    /// [`RelayError::QueryProcessing`].
    pub async fn expand_query(&self, raw_query: &str) -> Result<QueryExpansion, RelayError> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get_query_expansion(raw_query).await {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Query expansion cache hit: {}", raw_query);
                return Ok(QueryExpansion::new(raw_query, cached, true));
            }
        }

        let expansions = match (&self.router, self.config.llm_query_enabled) {
            (Some(router), true) => self.expand_with_llm(router, raw_query).await,
            _ => {
                self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                self.fallback_expansions(raw_query)
            }
        };

        if expansions.is_empty() {
            return Err(RelayError::QueryProcessing {
                query: raw_query.to_string(),
                reason: "no usable expansions and the fallback produced none".to_string(),
            });
        }

        if let Some(cache) = &self.cache {
            cache.set_query_expansion(raw_query, &expansions).await;
        }

        self.expansions_generated
            .fetch_add(expansions.len() as u64, Ordering::Relaxed);
        tracing::info!(
            "Generated {} query variations for: {}",
            expansions.len(),
            raw_query
        );
        Ok(QueryExpansion::new(raw_query, expansions, false))
    }

    /// Expand several queries. Per-query failures degrade to the original
    /// query instead of failing the batch.
    pub async fn expand_batch(&self, queries: &[String]) -> HashMap<String, QueryExpansion> {
        let mut results = HashMap::new();
        for query in queries {
            match self.expand_query(query).await {
                Ok(expansion) => {
                    results.insert(query.clone(), expansion);
                }
                Err(e) => {
                    tracing::error!("Failed to expand query '{}': {}", query, e);
                    results.insert(
                        query.clone(),
                        QueryExpansion::new(query.clone(), vec![query.clone()], false),
                    );
                }
            }
        }
        results
    }

    async fn expand_with_llm(&self, router: &Arc<dyn LlmRouter>, raw_query: &str) -> Vec<String> {
        let prompt = QUERY_EXPANSION_PROMPT
            .replace("{max_expansions}", &self.config.max_query_expansions.to_string())
            .replace("{query}", raw_query);

        let request = CompletionRequest {
            prompt,
            task_type: TaskType::QueryGeneration,
            temperature: self.config.llm_temperature,
            max_tokens: EXPANSION_MAX_TOKENS,
            system: None,
            force_provider: Some(self.config.llm_provider.clone()),
        };

        match router.complete(request).await {
            Ok(response) => {
                let parsed = self.parse_expansions(&response.content);
                if parsed.is_empty() {
                    tracing::warn!("LLM returned no usable expansions for: {}", raw_query);
                    self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                    self.fallback_expansions(raw_query)
                } else {
                    parsed
                }
            }
            Err(e) => {
                tracing::error!("LLM expansion failed for '{}': {}", raw_query, e);
                self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                self.fallback_expansions(raw_query)
            }
        }
    }

    /// Parse a JSON array of strings out of free-form LLM output.
    /// Markdown fences are stripped, entries shorter than four characters
    /// are discarded, the list is truncated to the configured maximum.
    fn parse_expansions(&self, response: &str) -> Vec<String> {
        let cleaned = response.trim();
        let cleaned = self.fence_open.replace(cleaned, "");
        let cleaned = self.fence_close.replace(&cleaned, "");
        let cleaned = cleaned.trim();

        match serde_json::from_str::<Vec<String>>(cleaned) {
            Ok(entries) => {
                let mut out = Vec::new();
                for entry in entries {
                    let entry = entry.trim().to_string();
                    if entry.len() > 3 {
                        out.push(entry);
                    }
                }
                out.truncate(self.config.max_query_expansions);
                out
            }
            Err(e) => {
                tracing::warn!("Failed to parse LLM expansions as JSON: {}", e);
                Vec::new()
            }
        }
    }

    /// Deterministic expansion used when the LLM path is unavailable:
    /// full-text, punctuation-stripped full-text, title-only and
    /// abstract-only field searches.
    fn fallback_expansions(&self, query: &str) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let mut variations = vec![format!("all:{}", query)];

        let cleaned = self.non_word.replace_all(query, " ");
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if !cleaned.is_empty() && cleaned != query {
            variations.push(format!("all:{}", cleaned));
        }

        variations.push(format!("ti:{}", query));
        variations.push(format!("abs:{}", query));

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for variation in variations {
            if variation.len() > 3 && seen.insert(variation.clone()) {
                out.push(variation);
            }
        }
        out.truncate(self.config.max_query_expansions);
        out
    }

    /// Healthy when at least one routed provider is.
    pub async fn health_check(&self) -> bool {
        match &self.router {
            Some(router) => router.health_check_all().await.values().any(|ok| *ok),
            None => false,
        }
    }

    pub fn stats(&self) -> ExpanderStats {
        ExpanderStats {
            llm_enabled: self.config.llm_query_enabled && self.router.is_some(),
            max_expansions: self.config.max_query_expansions,
            temperature: self.config.llm_temperature,
            provider: self.config.llm_provider.clone(),
            model: self.config.llm_model.clone(),
            expansions_generated: self.expansions_generated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for QueryExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExpander")
            .field("llm_enabled", &self.config.llm_query_enabled)
            .field("has_router", &self.router.is_some())
            .field("max_expansions", &self.config.max_query_expansions)
            .finish()
    }
}

fn compile(pattern: &str) -> Result<Regex, RelayError> {
    Regex::new(pattern).map_err(|e| RelayError::validation("regex", e.to_string()))
}
