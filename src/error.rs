//! Error types shared across the pipeline.

/// Errors that can occur anywhere in the relay pipeline.
///
/// Per-item loops (queries in a discovery run, papers in a publish batch,
/// entries in a feed) absorb these and keep going; single-item operations
/// return them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Upstream returned 429
    #[error("rate limited by upstream, retry after {retry_after}s")]
    RateLimit { retry_after: u64 },

    /// HTTP request timed out
    #[error("request timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    /// Upstream returned an unusable response
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// Malformed feed document
    #[error("parse error: {0}")]
    Parse(String),

    /// PDF could not be downloaded
    #[error("failed to download PDF {pdf_url}: {reason}")]
    PdfDownload { pdf_url: String, reason: String },

    /// PDF could not be parsed
    #[error("failed to parse PDF for {paper_id}: {reason}")]
    PdfParse { paper_id: String, reason: String },

    /// PDF exceeds the configured size limit
    #[error("PDF for {paper_id} is {size_mb} MB, limit is {max_mb} MB")]
    PdfSize {
        paper_id: String,
        size_mb: u64,
        max_mb: u64,
    },

    /// Cache backend failure. Callers treat this as a miss; it never
    /// crosses a component boundary.
    #[error("cache error: {0}")]
    Cache(String),

    /// Broker rejected or dropped a message
    #[error("failed to publish to {routing_key}: {reason}")]
    Publish {
        routing_key: String,
        reason: String,
    },

    /// LLM provider call failed
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// Query expansion failed even after the deterministic fallback
    #[error("failed to expand query '{query}': {reason}")]
    QueryProcessing { query: String, reason: String },

    /// Invalid configuration or request shape, raised eagerly
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
}

impl RelayError {
    /// Validation helper used at request boundaries.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::validation("url", err.to_string())
    }
}
