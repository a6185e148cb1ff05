//! Namespaced TTL cache over an injectable backend.
//!
//! Three value classes, each under its own key prefix and TTL:
//!
//! ```text
//! arxiv:api:<hash>       raw API query responses        (1 hour)
//! arxiv:parsed:<id>      parsed PDF content             (48 hours)
//! arxiv:query:<hash>     expanded query lists           (5 minutes)
//! ```
//!
//! The cache is never on the critical path for correctness: backend
//! failures and undecodable values degrade to a miss, writes are
//! best-effort, and any entry can vanish between get and use.

mod backend;

pub use backend::{CacheBackend, InMemoryCacheBackend};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RelayConfig;
use crate::models::{PaperMetadata, ParsedContent};

/// Key prefix for API query responses
const API_PREFIX: &str = "arxiv:api";
/// Key prefix for parsed PDF content
const PARSED_PREFIX: &str = "arxiv:parsed";
/// Key prefix for query expansions
const QUERY_PREFIX: &str = "arxiv:query";

/// Parameters that distinguish one API call from another. Folded into the
/// API cache key so differing pagination or sort never aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKeyParams {
    pub max_results: u32,
    pub start_index: u32,
    pub sort_by: String,
    pub sort_order: String,
}

/// Cached API response envelope.
#[derive(Debug, Serialize, Deserialize)]
struct CachedSearch {
    query: String,
    papers: Vec<PaperMetadata>,
    fetched_at: chrono::DateTime<chrono::Utc>,
}

/// Cache manager handling key derivation, serialization and TTL classes.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    ttl_api: Duration,
    ttl_parsed: Duration,
    ttl_query: Duration,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &RelayConfig) -> Self {
        Self {
            backend,
            enabled: config.cache_enabled,
            ttl_api: Duration::from_secs(config.ttl_api_response_seconds),
            ttl_parsed: Duration::from_secs(config.ttl_parsed_content_seconds),
            ttl_query: Duration::from_secs(config.ttl_query_expansion_seconds),
        }
    }

    /// Whether caching is enabled. When disabled every read is a miss
    /// and writes are dropped.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ==================== Key building ====================

    fn hash_key(prefix: &str, key_data: &str) -> String {
        let digest = format!("{:x}", md5::compute(key_data.as_bytes()));
        format!("{}:{}", prefix, &digest[..16])
    }

    fn api_key(query: &str, params: &SearchKeyParams) -> String {
        // Parameters ordered by name so the key is stable
        let key_data = format!(
            "{}|max_results={}|sort_by={}|sort_order={}|start_index={}",
            query, params.max_results, params.sort_by, params.sort_order, params.start_index
        );
        Self::hash_key(API_PREFIX, &key_data)
    }

    fn parsed_key(paper_id: &str) -> String {
        // Paper ids are already short; no hashing needed
        format!("{}:{}", PARSED_PREFIX, paper_id)
    }

    fn query_key(query: &str) -> String {
        Self::hash_key(QUERY_PREFIX, query)
    }

    // ==================== API response caching ====================

    /// Cached search results for the exact parameter tuple, or `None`.
    pub async fn get_api_response(
        &self,
        query: &str,
        params: &SearchKeyParams,
    ) -> Option<Vec<PaperMetadata>> {
        if !self.enabled {
            return None;
        }
        let key = Self::api_key(query, params);
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("API cache miss: {}", key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read API cache {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<CachedSearch>(&bytes) {
            Ok(cached) => {
                tracing::debug!("API cache hit: {} ({} papers)", key, cached.papers.len());
                Some(cached.papers)
            }
            Err(e) => {
                tracing::warn!("Undecodable API cache entry {}, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Best-effort write of search results.
    pub async fn set_api_response(
        &self,
        query: &str,
        params: &SearchKeyParams,
        papers: &[PaperMetadata],
    ) {
        if !self.enabled {
            return;
        }
        let key = Self::api_key(query, params);
        let cached = CachedSearch {
            query: query.to_string(),
            papers: papers.to_vec(),
            fetched_at: chrono::Utc::now(),
        };
        let bytes = match serde_json::to_vec(&cached) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to serialize API response for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, bytes, Some(self.ttl_api)).await {
            tracing::warn!("Failed to cache API response {}: {}", key, e);
        }
    }

    // ==================== Parsed content caching ====================

    pub async fn get_parsed_content(&self, paper_id: &str) -> Option<ParsedContent> {
        if !self.enabled {
            return None;
        }
        let key = Self::parsed_key(paper_id);
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("Parsed content cache miss: {}", paper_id);
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read parsed content cache for {}: {}", paper_id, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(content) => {
                tracing::debug!("Parsed content cache hit: {}", paper_id);
                Some(content)
            }
            Err(e) => {
                tracing::warn!("Undecodable parsed entry for {}, treating as miss: {}", paper_id, e);
                None
            }
        }
    }

    pub async fn set_parsed_content(&self, paper_id: &str, content: &ParsedContent) {
        if !self.enabled {
            return;
        }
        let key = Self::parsed_key(paper_id);
        let bytes = match serde_json::to_vec(content) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to serialize parsed content for {}: {}", paper_id, e);
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, bytes, Some(self.ttl_parsed)).await {
            tracing::warn!("Failed to cache parsed content for {}: {}", paper_id, e);
        }
    }

    /// Fetch parsed content for several papers at once. Returns only the
    /// hits; never raises.
    pub async fn get_many_parsed(&self, paper_ids: &[String]) -> HashMap<String, ParsedContent> {
        if !self.enabled {
            return HashMap::new();
        }
        let keys: Vec<String> = paper_ids.iter().map(|id| Self::parsed_key(id)).collect();
        let cached = match self.backend.get_many(&keys).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Failed to get many parsed content: {}", e);
                return HashMap::new();
            }
        };

        let mut result = HashMap::new();
        for (key, bytes) in cached {
            let paper_id = match key.rsplit(':').next() {
                Some(id) => id.to_string(),
                None => continue,
            };
            match serde_json::from_slice::<ParsedContent>(&bytes) {
                Ok(content) => {
                    result.insert(paper_id, content);
                }
                Err(_) => continue,
            }
        }
        tracing::debug!("get_many_parsed: {}/{} hits", result.len(), paper_ids.len());
        result
    }

    // ==================== Query expansion caching ====================

    pub async fn get_query_expansion(&self, query: &str) -> Option<Vec<String>> {
        if !self.enabled {
            return None;
        }
        let key = Self::query_key(query);
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("Query expansion cache miss: {}", key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read query expansion cache {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(expansions) => {
                tracing::debug!("Query expansion cache hit: {}", key);
                Some(expansions)
            }
            Err(_) => None,
        }
    }

    pub async fn set_query_expansion(&self, query: &str, expansions: &[String]) {
        if !self.enabled {
            return;
        }
        let key = Self::query_key(query);
        let bytes = match serde_json::to_vec(expansions) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to serialize query expansion for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, bytes, Some(self.ttl_query)).await {
            tracing::warn!("Failed to cache query expansion {}: {}", key, e);
        }
    }

    // ==================== Invalidation ====================

    /// Remove the parsed-content entry for a paper.
    pub async fn invalidate_paper(&self, paper_id: &str) {
        let key = Self::parsed_key(paper_id);
        if let Err(e) = self.backend.delete(&key).await {
            tracing::warn!("Failed to invalidate paper cache for {}: {}", paper_id, e);
        } else {
            tracing::info!("Invalidated cached parsed content for paper: {}", paper_id);
        }
    }

    /// Remove API entries matching a glob under the API namespace.
    pub async fn invalidate_api_cache(&self, pattern: &str) {
        let full_pattern = format!("{}:{}", API_PREFIX, pattern);
        match self.backend.delete_pattern(&full_pattern).await {
            Ok(removed) => tracing::info!("Invalidated {} API cache entries matching: {}", removed, pattern),
            Err(e) => tracing::warn!("Failed to invalidate API cache {}: {}", pattern, e),
        }
    }

    // ==================== Lifecycle ====================

    pub async fn health_check(&self) -> bool {
        self.backend.exists("health_check_key").await.is_ok()
    }

    pub async fn close(&self) {
        if let Err(e) = self.backend.close().await {
            tracing::warn!("Failed to close cache backend: {}", e);
        } else {
            tracing::info!("CacheManager closed");
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("enabled", &self.enabled)
            .field("ttl_api", &self.ttl_api)
            .field("ttl_parsed", &self.ttl_parsed)
            .field("ttl_query", &self.ttl_query)
            .finish()
    }
}
