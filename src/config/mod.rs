//! Configuration for the relay pipeline.
//!
//! Every component takes its configuration as an explicit value; there is
//! no process-wide config singleton. Construct a [`RelayConfig`], adjust
//! what you need, and hand clones to the components you build.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::RelayError;

/// Configuration for the discovery/extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// arXiv API endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default category set for sweeps
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Routing key for discovered papers (metadata only)
    #[serde(default = "default_discovered_queue")]
    pub discovered_queue: String,

    /// Routing key for parse requests from the intelligence layer
    #[serde(default = "default_parse_request_queue")]
    pub parse_request_queue: String,

    /// Routing key for fully extracted papers
    #[serde(default = "default_extracted_queue")]
    pub extracted_queue: String,

    /// Bucket refill rate for the arXiv API (the published limit is one
    /// request per three seconds)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_requests_per_second: f64,

    /// Upper bound on parallel category fetches
    #[serde(default = "default_max_concurrent_categories")]
    pub max_concurrent_categories: usize,

    /// Hard cap on results per query (the upstream rejects more than 2000)
    #[serde(default = "default_max_results")]
    pub max_results_per_query: u32,

    /// Results fetched per query when the caller does not say
    #[serde(default = "default_results_per_query")]
    pub default_results_per_query: u32,

    /// Timeout for PDF download in seconds
    #[serde(default = "default_pdf_download_timeout")]
    pub pdf_download_timeout: u64,

    /// Timeout for PDF parsing in seconds
    #[serde(default = "default_pdf_parse_timeout")]
    pub pdf_parse_timeout: u64,

    /// Max PDF size to process (MB)
    #[serde(default = "default_max_pdf_size_mb")]
    pub max_pdf_size_mb: u64,

    /// Skip PDFs larger than this size (MB)
    #[serde(default = "default_skip_larger_than_mb")]
    pub skip_papers_larger_than_mb: u64,

    /// Enable caching
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Cache backend selector: "redis", "disk" or "memory"
    #[serde(default = "default_cache_backend")]
    pub cache_backend: String,

    /// Redis connection URL (used when `cache_backend` is "redis")
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Directory for disk cache (used when `cache_backend` is "disk")
    #[serde(default)]
    pub disk_cache_dir: Option<PathBuf>,

    /// TTL for API response cache (default: 1 hour)
    #[serde(default = "default_ttl_api")]
    pub ttl_api_response_seconds: u64,

    /// TTL for parsed content cache (default: 48 hours)
    #[serde(default = "default_ttl_parsed")]
    pub ttl_parsed_content_seconds: u64,

    /// TTL for query expansion cache (default: 5 minutes)
    #[serde(default = "default_ttl_query")]
    pub ttl_query_expansion_seconds: u64,

    /// Enable LLM-based query expansion
    #[serde(default = "default_true")]
    pub llm_query_enabled: bool,

    /// Preferred LLM provider for query expansion
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,

    /// LLM model for query expansion
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// LLM temperature for query generation
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f64,

    /// Maximum number of query variations to generate
    #[serde(default = "default_max_query_expansions")]
    pub max_query_expansions: usize,

    /// Papers per sub-batch when publishing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum retries for publish failures
    #[serde(default = "default_publish_max_retries")]
    pub publish_max_retries: u32,

    /// Base delay for publish retries in seconds
    #[serde(default = "default_publish_retry_delay")]
    pub publish_retry_delay_seconds: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            categories: default_categories(),
            discovered_queue: default_discovered_queue(),
            parse_request_queue: default_parse_request_queue(),
            extracted_queue: default_extracted_queue(),
            rate_limit_requests_per_second: default_rate_limit(),
            max_concurrent_categories: default_max_concurrent_categories(),
            max_results_per_query: default_max_results(),
            default_results_per_query: default_results_per_query(),
            pdf_download_timeout: default_pdf_download_timeout(),
            pdf_parse_timeout: default_pdf_parse_timeout(),
            max_pdf_size_mb: default_max_pdf_size_mb(),
            skip_papers_larger_than_mb: default_skip_larger_than_mb(),
            cache_enabled: true,
            cache_backend: default_cache_backend(),
            redis_url: default_redis_url(),
            disk_cache_dir: None,
            ttl_api_response_seconds: default_ttl_api(),
            ttl_parsed_content_seconds: default_ttl_parsed(),
            ttl_query_expansion_seconds: default_ttl_query(),
            llm_query_enabled: true,
            llm_provider: default_llm_provider(),
            llm_model: default_llm_model(),
            llm_temperature: default_llm_temperature(),
            max_query_expansions: default_max_query_expansions(),
            batch_size: default_batch_size(),
            publish_max_retries: default_publish_max_retries(),
            publish_retry_delay_seconds: default_publish_retry_delay(),
        }
    }
}

impl RelayConfig {
    /// Validate the configuration. Called eagerly by component
    /// constructors; an invalid config never makes it into the pipeline.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.rate_limit_requests_per_second <= 0.0 {
            return Err(RelayError::validation(
                "rate_limit_requests_per_second",
                "must be positive",
            ));
        }
        if self.max_query_expansions == 0 {
            return Err(RelayError::validation(
                "max_query_expansions",
                "must be at least 1",
            ));
        }
        if self.batch_size == 0 {
            return Err(RelayError::validation("batch_size", "must be at least 1"));
        }
        if self.max_results_per_query == 0 {
            return Err(RelayError::validation(
                "max_results_per_query",
                "must be at least 1",
            ));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(RelayError::validation(
                "llm_temperature",
                "must be within [0.0, 2.0]",
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}

fn default_categories() -> Vec<String> {
    [
        // Machine learning
        "cs.LG", "cs.AI", "cs.CL", "cs.CV", "stat.ML",
        // Quantitative finance
        "q-fin.TR", "q-fin.CP", "q-fin.PM", "q-fin.ST",
        // Mathematics
        "math.ST", "math.PR", "math.OC",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_discovered_queue() -> String {
    "arxiv.discovered".to_string()
}

fn default_parse_request_queue() -> String {
    "arxiv.parse_request".to_string()
}

fn default_extracted_queue() -> String {
    "content.extracted".to_string()
}

fn default_rate_limit() -> f64 {
    0.33 // 1 request per 3 seconds
}

fn default_max_concurrent_categories() -> usize {
    3
}

fn default_max_results() -> u32 {
    200
}

fn default_results_per_query() -> u32 {
    50
}

fn default_pdf_download_timeout() -> u64 {
    60
}

fn default_pdf_parse_timeout() -> u64 {
    120
}

fn default_max_pdf_size_mb() -> u64 {
    50
}

fn default_skip_larger_than_mb() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_ttl_api() -> u64 {
    3600 // 1 hour
}

fn default_ttl_parsed() -> u64 {
    172_800 // 48 hours
}

fn default_ttl_query() -> u64 {
    300 // 5 minutes
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}

fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_llm_temperature() -> f64 {
    0.3
}

fn default_max_query_expansions() -> usize {
    5
}

fn default_batch_size() -> usize {
    10
}

fn default_publish_max_retries() -> u32 {
    5
}

fn default_publish_retry_delay() -> f64 {
    1.0
}
