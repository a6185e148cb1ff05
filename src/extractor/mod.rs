//! PDF extraction contract surface.
//!
//! The extractor itself (layout analysis, tables, equations) is an
//! external collaborator behind [`PdfExtractor`]. [`CachingExtractor`]
//! is the wrapper the coordinator installs around it: a parsed-content
//! cache tier, a parse timeout and extraction metadata stamping.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::CacheManager;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::ParsedContent;

/// Opaque URL -> ParsedContent function.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    /// Fetch and parse one PDF.
    async fn extract(&self, pdf_url: &str, paper_id: &str) -> Result<ParsedContent, RelayError>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Extractor statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractorStats {
    pub processed_count: u64,
    pub error_count: u64,
    pub cache_hit_count: u64,
    pub success_rate: f64,
}

/// Cache-backed, timeout-guarded wrapper around an inner extractor.
pub struct CachingExtractor {
    inner: Arc<dyn PdfExtractor>,
    cache: Option<Arc<CacheManager>>,
    parse_timeout: Duration,

    processed_count: AtomicU64,
    error_count: AtomicU64,
    cache_hit_count: AtomicU64,
}

impl CachingExtractor {
    pub fn new(inner: Arc<dyn PdfExtractor>, config: &RelayConfig) -> Self {
        Self {
            inner,
            cache: None,
            parse_timeout: Duration::from_secs(config.pdf_parse_timeout),
            processed_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            cache_hit_count: AtomicU64::new(0),
        }
    }

    /// Attach a cache manager for the parsed-content tier.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn stats(&self) -> ExtractorStats {
        let processed = self.processed_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);
        ExtractorStats {
            processed_count: processed,
            error_count: errors,
            cache_hit_count: self.cache_hit_count.load(Ordering::Relaxed),
            success_rate: if processed + errors > 0 {
                processed as f64 / (processed + errors) as f64
            } else {
                0.0
            },
        }
    }
}

#[async_trait]
impl PdfExtractor for CachingExtractor {
    async fn extract(&self, pdf_url: &str, paper_id: &str) -> Result<ParsedContent, RelayError> {
        if let Some(cache) = &self.cache {
            if let Some(content) = cache.get_parsed_content(paper_id).await {
                tracing::info!("Parsed content cache hit: {}", paper_id);
                self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(content);
            }
        }

        tracing::info!("Extracting PDF for {}: {}", paper_id, pdf_url);
        let started = Instant::now();

        let result = tokio::time::timeout(self.parse_timeout, self.inner.extract(pdf_url, paper_id))
            .await;

        let mut content = match result {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            Err(_) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::PdfParse {
                    paper_id: paper_id.to_string(),
                    reason: format!(
                        "extraction timed out after {}s",
                        self.parse_timeout.as_secs()
                    ),
                });
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        content
            .metadata
            .insert("processing_time_seconds".to_string(), elapsed.into());
        content.metadata.insert(
            "processed_at".to_string(),
            chrono::Utc::now().to_rfc3339().into(),
        );
        content
            .metadata
            .insert("pdf_url".to_string(), pdf_url.into());

        if let Some(cache) = &self.cache {
            cache.set_parsed_content(paper_id, &content).await;
        }

        self.processed_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Extracted {} in {:.2}s", paper_id, elapsed);
        Ok(content)
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

impl std::fmt::Debug for CachingExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingExtractor")
            .field("processed", &self.processed_count.load(Ordering::Relaxed))
            .field("errors", &self.error_count.load(Ordering::Relaxed))
            .field("cache_hits", &self.cache_hit_count.load(Ordering::Relaxed))
            .finish()
    }
}
