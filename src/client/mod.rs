//! Rate-limited, cache-backed client for the arXiv ATOM API.

mod atom;

pub use atom::parse_feed;

use reqwest::StatusCode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{CacheManager, SearchKeyParams};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::limiter::{AdaptiveRateLimiter, Limiter, RateLimiter};
use crate::models::{PaperMetadata, PaperSource};

/// Total request timeout in seconds
const HTTP_TIMEOUT_SECS: u64 = 30;
/// Connect timeout in seconds
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Health probe timeout in seconds
const HEALTH_TIMEOUT_SECS: u64 = 10;
/// The upstream rejects requests for more than this many results
const ARXIV_MAX_RESULTS: u32 = 2000;
/// The upstream caps id lists per query; batch accordingly
const ID_BATCH_SIZE: usize = 100;
/// Fallback Retry-After when the 429 carries no usable header
const DEFAULT_RETRY_AFTER_SECS: u64 = 3;

/// Sort field accepted by the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::LastUpdatedDate => "lastUpdatedDate",
            SortBy::SubmittedDate => "submittedDate",
        }
    }
}

/// Sort direction accepted by the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

/// Client statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub request_count: u64,
    pub error_count: u64,
    pub cache_hit_count: u64,
    pub success_rate: f64,
}

/// Client for the arXiv query API.
///
/// Every network call passes through the shared rate limiter; cached
/// responses do not. A 429 from upstream is reported to the limiter so
/// the adaptive variant can back off.
pub struct ArxivClient {
    config: RelayConfig,
    http: reqwest::Client,
    limiter: Arc<Limiter>,
    cache: Option<Arc<CacheManager>>,

    // Diagnostic counters, not authoritative
    request_count: AtomicU64,
    error_count: AtomicU64,
    cache_hit_count: AtomicU64,
}

impl ArxivClient {
    /// Create a client with a fixed-rate limiter from the config.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let rate = config.rate_limit_requests_per_second;
        Self::with_limiter(config, Arc::new(Limiter::Fixed(RateLimiter::new(rate))))
    }

    /// Create a client with an adaptive limiter.
    pub fn adaptive(config: RelayConfig, limiter: AdaptiveRateLimiter) -> Result<Self, RelayError> {
        Self::with_limiter(config, Arc::new(Limiter::Adaptive(limiter)))
    }

    /// Create a client with an explicit limiter handle (shared limiters
    /// serialize concurrent discovery runs).
    pub fn with_limiter(config: RelayConfig, limiter: Arc<Limiter>) -> Result<Self, RelayError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RelayError::Api {
                status: 0,
                body: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            http,
            limiter,
            cache: None,
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            cache_hit_count: AtomicU64::new(0),
        })
    }

    /// Attach a cache manager. Without one every lookup is a miss.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The limiter handle, for sharing with other clients.
    pub fn limiter(&self) -> Arc<Limiter> {
        Arc::clone(&self.limiter)
    }

    /// Execute a search query.
    ///
    /// Consults the cache first; on a miss acquires the rate limiter,
    /// issues the request, parses the feed and writes the result back.
    pub async fn search(
        &self,
        query: &str,
        max_results: Option<u32>,
        start_index: u32,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<Vec<PaperMetadata>, RelayError> {
        let max_results = max_results
            .unwrap_or(self.config.default_results_per_query)
            .min(ARXIV_MAX_RESULTS);

        let key_params = SearchKeyParams {
            max_results,
            start_index,
            sort_by: sort_by.as_str().to_string(),
            sort_order: sort_order.as_str().to_string(),
        };

        if let Some(cache) = &self.cache {
            if let Some(papers) = cache.get_api_response(query, &key_params).await {
                self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(papers);
            }
        }

        self.limiter.acquire().await?;

        let url = self.build_search_url(query, max_results, start_index, sort_by, sort_order)?;
        tracing::debug!("Executing arXiv search: {}", url);

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return Err(map_transport_error(e));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            let retry_after = retry_after_seconds(&response);
            self.limiter.on_rate_limit(retry_after).await;
            return Err(RelayError::RateLimit { retry_after });
        }
        if !status.is_success() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return Err(map_transport_error(e));
            }
        };

        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.limiter.on_success().await;

        let papers = atom::parse_feed(&body, query)?;

        if let Some(cache) = &self.cache {
            cache.set_api_response(query, &key_params, &papers).await;
        }

        tracing::info!("Found {} papers for query: {}", papers.len(), query);
        Ok(papers)
    }

    /// Fetch recent papers for each category, newest first.
    ///
    /// Each result is re-stamped with `source = Category` and the bare
    /// category token as its `source_query`.
    pub async fn fetch_by_categories(
        &self,
        categories: &[String],
        max_per_category: u32,
        days_back: Option<u32>,
    ) -> Result<Vec<PaperMetadata>, RelayError> {
        let mut all_papers = Vec::new();

        for category in categories {
            let mut query = format!("cat:{}", category);
            if let Some(days) = days_back {
                let from = chrono::Utc::now() - chrono::Duration::days(days as i64);
                query = format!(
                    "cat:{} AND submittedDate:[{} TO 99991231]",
                    category,
                    from.format("%Y%m%d")
                );
            }

            let mut papers = self
                .search(
                    &query,
                    Some(max_per_category),
                    0,
                    SortBy::SubmittedDate,
                    SortOrder::Descending,
                )
                .await?;

            for paper in &mut papers {
                paper.source = PaperSource::Category;
                paper.source_query = category.clone();
            }
            all_papers.extend(papers);
        }

        tracing::info!(
            "Fetched {} papers from {} categories",
            all_papers.len(),
            categories.len()
        );
        Ok(all_papers)
    }

    /// Fetch specific papers by id, batching the `OR` query to stay under
    /// the upstream's id-list limit. An empty input makes no HTTP call.
    pub async fn fetch_by_ids(&self, paper_ids: &[String]) -> Result<Vec<PaperMetadata>, RelayError> {
        if paper_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_papers = Vec::new();
        for batch in paper_ids.chunks(ID_BATCH_SIZE) {
            let id_query = batch
                .iter()
                .map(|id| format!("id:{}", id))
                .collect::<Vec<_>>()
                .join(" OR ");

            let papers = self
                .search(
                    &id_query,
                    Some(batch.len() as u32),
                    0,
                    SortBy::Relevance,
                    SortOrder::Descending,
                )
                .await?;
            all_papers.extend(papers);
        }
        Ok(all_papers)
    }

    /// Probe the upstream with a minimal category query.
    pub async fn health_check(&self) -> bool {
        let url = match self.build_health_url() {
            Ok(url) => url,
            Err(_) => return false,
        };

        match self
            .http
            .get(url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::warn!("arXiv health check failed: {}", e);
                false
            }
        }
    }

    pub fn stats(&self) -> ClientStats {
        let requests = self.request_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);
        ClientStats {
            request_count: requests,
            error_count: errors,
            cache_hit_count: self.cache_hit_count.load(Ordering::Relaxed),
            success_rate: if requests > 0 {
                (requests.saturating_sub(errors)) as f64 / requests as f64
            } else {
                0.0
            },
        }
    }

    fn build_search_url(
        &self,
        query: &str,
        max_results: u32,
        start_index: u32,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.config.base_url)?;
        url.query_pairs_mut()
            .append_pair("search_query", query)
            .append_pair("start", &start_index.to_string())
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", sort_by.as_str())
            .append_pair("sortOrder", sort_order.as_str());
        Ok(url)
    }

    fn build_health_url(&self) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.config.base_url)?;
        url.query_pairs_mut()
            .append_pair("search_query", "cat:cs.LG")
            .append_pair("max_results", "1");
        Ok(url)
    }
}

impl std::fmt::Debug for ArxivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArxivClient")
            .field("base_url", &self.config.base_url)
            .field("requests", &self.request_count.load(Ordering::Relaxed))
            .field("errors", &self.error_count.load(Ordering::Relaxed))
            .field("cache_hits", &self.cache_hit_count.load(Ordering::Relaxed))
            .finish()
    }
}

fn map_transport_error(err: reqwest::Error) -> RelayError {
    if err.is_timeout() {
        RelayError::Timeout {
            timeout_seconds: HTTP_TIMEOUT_SECS,
        }
    } else {
        RelayError::Api {
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            body: format!("transport error: {}", err),
        }
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::limiter::AdaptiveConfig;
    use mockito::Matcher;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <entry>
    <id>http://arxiv.org/abs/2401.12345v1</id>
    <title>Test Paper</title>
    <summary>Test abstract</summary>
    <published>2024-01-15T10:00:00Z</published>
    <author><name>Test Author</name></author>
    <category term="cs.LG"/>
    <link rel="alternate" type="text/html" href="http://arxiv.org/abs/2401.12345v1"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.12345v1" rel="related"/>
  </entry>
</feed>"#;

    fn test_config(server: &mockito::ServerGuard) -> RelayConfig {
        RelayConfig {
            base_url: format!("{}/api/query", server.url()),
            // Fast bucket so tests never sleep between calls
            rate_limit_requests_per_second: 1000.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_search_parses_feed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::UrlEncoded(
                "search_query".into(),
                "all:test".into(),
            ))
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        let papers = client
            .search("all:test", Some(10), 0, SortBy::Relevance, SortOrder::Descending)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].paper_id, "2401.12345");
        assert_eq!(papers[0].source_query, "all:test");
        assert_eq!(client.stats().request_count, 1);
    }

    #[tokio::test]
    async fn test_max_results_clamped_in_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "all:test".into()),
                Matcher::UrlEncoded("max_results".into(), "2000".into()),
            ]))
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        client
            .search("all:test", Some(9999), 0, SortBy::Relevance, SortOrder::Descending)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_search_served_from_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(FEED)
            .expect(1)
            .create_async()
            .await;

        let config = test_config(&server);
        let cache = Arc::new(CacheManager::new(InMemoryCacheBackend::shared(), &config));
        let client = ArxivClient::new(config).unwrap().with_cache(cache);

        for _ in 0..2 {
            let papers = client
                .search("all:test", Some(10), 0, SortBy::Relevance, SortOrder::Descending)
                .await
                .unwrap();
            assert_eq!(papers.len(), 1);
        }

        mock.assert_async().await;
        assert_eq!(client.stats().cache_hit_count, 1);
    }

    #[tokio::test]
    async fn test_429_surfaces_rate_limit_and_backs_off() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "7")
            .with_body("slow down")
            .expect(3)
            .create_async()
            .await;

        let config = test_config(&server);
        let limiter = AdaptiveRateLimiter::new(AdaptiveConfig {
            base_rate: 1000.0,
            min_rate: 0.1,
            max_rate: 1000.0,
            backoff_factor: 0.8,
            recovery_factor: 1.1,
        });
        let client = ArxivClient::adaptive(config, limiter).unwrap();

        for _ in 0..3 {
            let err = client
                .search("all:test", Some(1), 0, SortBy::Relevance, SortOrder::Descending)
                .await
                .unwrap_err();
            match err {
                RelayError::RateLimit { retry_after } => assert_eq!(retry_after, 7),
                other => panic!("expected rate limit error, got {:?}", other),
            }
        }

        // After three 429s the adaptive rate dropped by 0.8^1..3 steps
        let rate = match client.limiter.as_ref() {
            Limiter::Adaptive(limiter) => limiter.current_rate().await,
            _ => unreachable!(),
        };
        assert!(rate <= 1000.0 * 0.8 * 0.8 * 0.8 + 1e-6, "rate: {}", rate);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        let err = client
            .search("all:test", Some(1), 0, SortBy::Relevance, SortOrder::Descending)
            .await
            .unwrap_err();

        match err {
            RelayError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected API error, got {:?}", other),
        }
        assert_eq!(client.stats().error_count, 1);
    }

    #[tokio::test]
    async fn test_fetch_by_categories_overwrites_source() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "cat:cs.LG".into()),
                Matcher::UrlEncoded("sortBy".into(), "submittedDate".into()),
                Matcher::UrlEncoded("sortOrder".into(), "descending".into()),
            ]))
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        let papers = client
            .fetch_by_categories(&["cs.LG".to_string()], 10, None)
            .await
            .unwrap();

        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].source, PaperSource::Category);
        assert_eq!(papers[0].source_query, "cs.LG");
    }

    #[tokio::test]
    async fn test_fetch_by_ids_empty_makes_no_call() {
        let server = mockito::Server::new_async().await;
        let client = ArxivClient::new(test_config(&server)).unwrap();

        let papers = client.fetch_by_ids(&[]).await.unwrap();
        assert!(papers.is_empty());
        assert_eq!(client.stats().request_count, 0);
    }

    #[tokio::test]
    async fn test_fetch_by_ids_builds_or_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::UrlEncoded(
                "search_query".into(),
                "id:2401.1 OR id:2401.2".into(),
            ))
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        client
            .fetch_by_ids(&["2401.1".to_string(), "2401.2".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_check() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "cat:cs.LG".into()),
                Matcher::UrlEncoded("max_results".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn test_health_check_false_on_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = ArxivClient::new(test_config(&server)).unwrap();
        assert!(!client.health_check().await);
    }
}
