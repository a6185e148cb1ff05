//! Top-level orchestration of discovery and parse-request handling.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::{ArxivClient, ClientStats, SortBy, SortOrder};
use crate::cache::CacheManager;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::expander::{ExpanderStats, QueryExpander};
use crate::extractor::PdfExtractor;
use crate::models::{
    DiscoveryError, DiscoveryRunResult, PaperMetadata, PaperSource, ParseRequestMessage,
};
use crate::publisher::{MessagePublisher, PublisherStats};
use crate::utils::dedup_papers;

/// How many of the most recent failures a run result retains.
const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconfigured,
    Initialized,
    Closed,
}

/// Aggregate statistics for the coordinator and its components.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub papers_discovered: u64,
    pub papers_published: u64,
    pub queries_processed: u64,
    pub errors_count: usize,
    pub initialized: bool,
    pub client: Option<ClientStats>,
    pub expander: Option<ExpanderStats>,
    pub publisher: PublisherStats,
}

/// Binds the expander, API client, cache, publisher and extractor into
/// one control plane.
///
/// The publisher is the only collaborator without a sensible default and
/// is required at construction. Everything else attaches through `with_*`
/// setters; what is still missing when [`initialize`](Self::initialize)
/// runs is built with defaults (client, expander) or left absent as a
/// sentinel (cache: every lookup misses; extractor: parse requests are
/// rejected).
pub struct Coordinator {
    config: RelayConfig,
    publisher: MessagePublisher,
    client: Option<Arc<ArxivClient>>,
    expander: Option<QueryExpander>,
    cache: Option<Arc<CacheManager>>,
    extractor: Option<Arc<dyn PdfExtractor>>,
    state: State,

    // Strictly monotonic counters
    papers_discovered: AtomicU64,
    papers_published: AtomicU64,
    queries_processed: AtomicU64,
    error_log: Mutex<Vec<DiscoveryError>>,
}

impl Coordinator {
    pub fn new(config: RelayConfig, publisher: MessagePublisher) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            config,
            publisher,
            client: None,
            expander: None,
            cache: None,
            extractor: None,
            state: State::Unconfigured,
            papers_discovered: AtomicU64::new(0),
            papers_published: AtomicU64::new(0),
            queries_processed: AtomicU64::new(0),
            error_log: Mutex::new(Vec::new()),
        })
    }

    pub fn with_client(mut self, client: Arc<ArxivClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Build any missing components and move to the initialised state.
    /// Idempotent.
    pub fn initialize(&mut self) -> Result<(), RelayError> {
        match self.state {
            State::Initialized => return Ok(()),
            State::Closed => {
                return Err(RelayError::validation("coordinator", "already closed"))
            }
            State::Unconfigured => {}
        }

        if self.client.is_none() {
            let mut client = ArxivClient::new(self.config.clone())?;
            if let Some(cache) = &self.cache {
                client = client.with_cache(Arc::clone(cache));
            }
            self.client = Some(Arc::new(client));
        }

        if self.expander.is_none() {
            let mut expander = QueryExpander::new(self.config.clone())?;
            if let Some(cache) = &self.cache {
                expander = expander.with_cache(Arc::clone(cache));
            }
            self.expander = Some(expander);
        }

        self.state = State::Initialized;
        tracing::info!("Coordinator initialized");
        Ok(())
    }

    /// Run paper discovery for a set of raw queries and optional
    /// categories.
    ///
    /// Never fails: per-query and category-sweep errors are captured into
    /// the result's error list instead.
    pub async fn run_discovery(
        &self,
        queries: &[String],
        categories: Option<&[String]>,
    ) -> DiscoveryRunResult {
        let run_correlation_id = Uuid::new_v4().to_string();
        let started = tokio::time::Instant::now();
        let queries_processed_before = self.queries_processed.load(Ordering::Relaxed);
        let mut errors = Vec::new();

        tracing::info!(
            "Starting discovery run {} with {} queries",
            run_correlation_id,
            queries.len()
        );

        let mut all_papers = Vec::new();

        if self.state != State::Initialized {
            errors.push(DiscoveryError::new(
                "run_discovery",
                "coordinator is not initialized",
            ));
        } else {
            for query in queries {
                match self.process_query(query).await {
                    Ok(papers) => all_papers.extend(papers),
                    Err(e) => {
                        tracing::error!("Failed to process query '{}': {}", query, e);
                        errors.push(DiscoveryError::new(query.clone(), e));
                    }
                }
            }

            if let Some(categories) = categories {
                if !categories.is_empty() {
                    match self.fetch_categories(categories).await {
                        Ok(papers) => all_papers.extend(papers),
                        Err(e) => {
                            tracing::error!("Failed to fetch categories: {}", e);
                            errors.push(DiscoveryError::new(categories.join(","), e));
                        }
                    }
                }
            }
        }

        let unique_papers = dedup_papers(all_papers);

        let published = if unique_papers.is_empty() {
            0
        } else {
            self.publisher
                .publish_discovered(&unique_papers, Some(&run_correlation_id))
                .await
        };

        self.papers_discovered
            .fetch_add(unique_papers.len() as u64, Ordering::Relaxed);
        self.papers_published
            .fetch_add(published as u64, Ordering::Relaxed);

        let queries_processed = self
            .queries_processed
            .load(Ordering::Relaxed)
            .saturating_sub(queries_processed_before) as usize;

        {
            let mut log = self.error_log.lock().await;
            log.extend(errors.iter().cloned());
        }
        // The result carries only the most recent failures
        if errors.len() > MAX_REPORTED_ERRORS {
            errors = errors.split_off(errors.len() - MAX_REPORTED_ERRORS);
        }

        let duration = started.elapsed().as_secs_f64();
        tracing::info!(
            "Discovery run {} completed in {:.2}s: {} papers found, {} published",
            run_correlation_id,
            duration,
            unique_papers.len(),
            published
        );

        DiscoveryRunResult {
            correlation_id: run_correlation_id,
            papers_discovered: unique_papers.len(),
            papers_published: published,
            queries_processed,
            categories_fetched: categories.map(|c| c.len()).unwrap_or(0),
            duration_seconds: duration,
            errors,
        }
    }

    /// Expand one raw query and search every variant, stamping results
    /// with the raw query as their origin.
    async fn process_query(&self, query: &str) -> Result<Vec<PaperMetadata>, RelayError> {
        let expander = self.expander.as_ref().ok_or_else(not_initialized)?;
        let client = self.client.as_ref().ok_or_else(not_initialized)?;

        let expansion = expander.expand_query(query).await?;
        self.queries_processed.fetch_add(1, Ordering::Relaxed);

        let mut all_papers = Vec::new();
        for expanded in &expansion.expanded_queries {
            let mut papers = client
                .search(
                    expanded,
                    Some(self.config.default_results_per_query),
                    0,
                    SortBy::Relevance,
                    SortOrder::Descending,
                )
                .await?;

            for paper in &mut papers {
                paper.source = PaperSource::Query;
                paper.source_query = query.to_string();
            }
            tracing::debug!(
                "Found {} papers for expanded query: {}",
                papers.len(),
                expanded
            );
            all_papers.extend(papers);
        }

        Ok(all_papers)
    }

    async fn fetch_categories(&self, categories: &[String]) -> Result<Vec<PaperMetadata>, RelayError> {
        let client = self.client.as_ref().ok_or_else(not_initialized)?;
        client
            .fetch_by_categories(categories, self.config.default_results_per_query, None)
            .await
    }

    /// Handle an on-demand parse request: extract the PDF, fetch
    /// canonical metadata and publish the Extracted message with the
    /// (discovery, parse) correlation chain.
    ///
    /// Requires an installed extractor; beyond that, failures are logged
    /// and recorded, not raised.
    pub async fn handle_parse_request(
        &self,
        request: &ParseRequestMessage,
    ) -> Result<(), RelayError> {
        if self.state != State::Initialized {
            return Err(RelayError::validation("coordinator", "not initialized"));
        }
        let extractor = self.extractor.as_ref().ok_or_else(|| {
            RelayError::validation("extractor", "no extractor configured")
        })?;

        let outcome = self.run_parse_request(extractor, request).await;
        if let Err(e) = outcome {
            tracing::error!(
                "Failed to handle parse request for {}: {}",
                request.paper_id,
                e
            );
            let mut log = self.error_log.lock().await;
            log.push(DiscoveryError::new(request.paper_id.clone(), e));
        }
        Ok(())
    }

    async fn run_parse_request(
        &self,
        extractor: &Arc<dyn PdfExtractor>,
        request: &ParseRequestMessage,
    ) -> Result<(), RelayError> {
        let client = self.client.as_ref().ok_or_else(not_initialized)?;

        let content = extractor
            .extract(&request.pdf_url, &request.paper_id)
            .await?;

        let papers = client.fetch_by_ids(&[request.paper_id.clone()]).await?;
        let paper = match papers.into_iter().next() {
            Some(paper) => paper,
            None => {
                return Err(RelayError::Api {
                    status: 0,
                    body: format!("paper not found: {}", request.paper_id),
                })
            }
        };

        self.publisher
            .publish_extracted(
                &paper,
                &content,
                &request.original_correlation_id,
                &request.correlation_id,
            )
            .await?;

        tracing::info!("Processed parse request for {}", request.paper_id);
        Ok(())
    }

    /// Health of every installed component.
    pub async fn health_check(&self) -> std::collections::HashMap<String, bool> {
        let mut health = std::collections::HashMap::new();

        if let Some(cache) = &self.cache {
            health.insert("cache".to_string(), cache.health_check().await);
        }
        if let Some(expander) = &self.expander {
            health.insert("expander".to_string(), expander.health_check().await);
        }
        if let Some(client) = &self.client {
            health.insert("api_client".to_string(), client.health_check().await);
        }
        health.insert("publisher".to_string(), self.publisher.health_check().await);
        if let Some(extractor) = &self.extractor {
            health.insert("extractor".to_string(), extractor.health_check().await);
        }

        health
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            papers_discovered: self.papers_discovered.load(Ordering::Relaxed),
            papers_published: self.papers_published.load(Ordering::Relaxed),
            queries_processed: self.queries_processed.load(Ordering::Relaxed),
            errors_count: self.error_log.lock().await.len(),
            initialized: self.state == State::Initialized,
            client: self.client.as_ref().map(|c| c.stats()),
            expander: self.expander.as_ref().map(|e| e.stats()),
            publisher: self.publisher.stats(),
        }
    }

    /// Dispose of owned resources. Idempotent.
    pub async fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }

        if let Some(cache) = &self.cache {
            cache.close().await;
        }
        self.publisher.close().await;

        self.state = State::Closed;
        tracing::info!("Coordinator closed");
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state)
            .field(
                "discovered",
                &self.papers_discovered.load(Ordering::Relaxed),
            )
            .field("published", &self.papers_published.load(Ordering::Relaxed))
            .finish()
    }
}

fn not_initialized() -> RelayError {
    RelayError::validation("coordinator", "not initialized")
}
