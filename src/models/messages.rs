//! Wire-level message shapes for the three-phase pipeline.
//!
//! - `arxiv.discovered`: metadata only (Phase 1, Discovery)
//! - `arxiv.parse_request`: hand-off from the intelligence layer (Phase 2)
//! - `content.extracted`: full content (Phase 3, Extraction)
//!
//! Every message carries an RFC 3339 `created_at` and a correlation id.
//! A Discovered message carries a fresh id D; the downstream ParseRequest
//! carries its own id P plus `original_correlation_id = D`; the Extracted
//! message carries `correlation_id = P` and both chain ids, so (D, P)
//! identifies the end-to-end flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::paper::{FigureData, PaperMetadata, ParsedContent, TableData};

/// A discovered paper, metadata only. Consumed by the intelligence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredMessage {
    /// Unique id tracing this message through the pipeline
    pub correlation_id: String,
    /// Timestamp when discovered
    pub created_at: DateTime<Utc>,

    pub paper_id: String,
    pub version: String,

    pub title: String,
    pub r#abstract: String,
    pub authors: Vec<String>,

    pub categories: Vec<String>,
    pub subcategories: Vec<String>,

    pub arxiv_url: String,
    pub pdf_url: String,

    pub submitted_date: String,
    pub updated_date: Option<String>,
    pub doi: Option<String>,
    pub journal_ref: Option<String>,
    pub comments: Option<String>,

    /// Original query or category that surfaced this paper
    pub source_query: String,
}

impl DiscoveredMessage {
    /// Build a Discovered message from paper metadata.
    pub fn from_paper(paper: &PaperMetadata, correlation_id: String) -> Self {
        Self {
            correlation_id,
            created_at: Utc::now(),
            paper_id: paper.paper_id.clone(),
            version: paper.version.clone(),
            title: paper.title.clone(),
            r#abstract: paper.r#abstract.clone(),
            authors: paper.authors.clone(),
            categories: paper.categories.clone(),
            subcategories: paper.subcategories.clone(),
            arxiv_url: paper.arxiv_url.clone(),
            pdf_url: paper.pdf_url.clone(),
            submitted_date: paper.submitted_date.clone(),
            updated_date: paper.updated_date.clone(),
            doi: paper.doi.clone(),
            journal_ref: paper.journal_ref.clone(),
            comments: paper.comments.clone(),
            source_query: paper.source_query.clone(),
        }
    }
}

/// Request to parse one paper, posted by the intelligence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRequestMessage {
    /// Correlation id for this request
    pub correlation_id: String,
    /// Correlation id of the originating Discovered message
    pub original_correlation_id: String,
    pub created_at: DateTime<Utc>,

    pub paper_id: String,
    pub pdf_url: String,

    /// Parse priority (1 = highest, 10 = lowest)
    pub priority: u8,

    /// Relevance score assigned upstream, in [0, 1]
    pub relevance_score: Option<f64>,
    /// Free-text notes from the intelligence layer
    pub intelligence_notes: Option<String>,
}

/// Fully extracted paper content, the terminal message of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMessage {
    /// Equal to `parse_correlation_id`
    pub correlation_id: String,
    /// Correlation id of the original Discovered message
    pub discovery_correlation_id: String,
    /// Correlation id of the ParseRequest that triggered extraction
    pub parse_correlation_id: String,
    pub created_at: DateTime<Utc>,

    pub paper_id: String,
    pub version: String,
    pub title: String,
    pub arxiv_url: String,
    pub pdf_url: String,

    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub subcategories: Vec<String>,
    pub submitted_date: String,
    pub doi: Option<String>,

    pub text_content: String,
    pub tables: Vec<TableData>,
    pub equations: Vec<String>,
    pub figure_captions: Vec<FigureData>,
    pub extraction_metadata: HashMap<String, serde_json::Value>,
}

impl ExtractedMessage {
    /// Combine canonical metadata with extracted content under the full
    /// correlation chain.
    pub fn from_parts(
        paper: &PaperMetadata,
        content: &ParsedContent,
        discovery_correlation_id: String,
        parse_correlation_id: String,
    ) -> Self {
        Self {
            correlation_id: parse_correlation_id.clone(),
            discovery_correlation_id,
            parse_correlation_id,
            created_at: Utc::now(),
            paper_id: paper.paper_id.clone(),
            version: paper.version.clone(),
            title: paper.title.clone(),
            arxiv_url: paper.arxiv_url.clone(),
            pdf_url: paper.pdf_url.clone(),
            authors: paper.authors.clone(),
            categories: paper.categories.clone(),
            subcategories: paper.subcategories.clone(),
            submitted_date: paper.submitted_date.clone(),
            doi: paper.doi.clone(),
            text_content: content.text_content.clone(),
            tables: content.tables.clone(),
            equations: content.equations.clone(),
            figure_captions: content.figure_captions.clone(),
            extraction_metadata: content.metadata.clone(),
        }
    }
}

/// One captured failure from a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryError {
    /// The query, category list or paper id the failure belongs to
    pub context: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryError {
    pub fn new(context: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            context: context.into(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of a single `run_discovery` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRunResult {
    /// Run-wide correlation id stamped on every Discovered message
    pub correlation_id: String,
    pub papers_discovered: usize,
    pub papers_published: usize,
    pub queries_processed: usize,
    pub categories_fetched: usize,
    pub duration_seconds: f64,
    /// Most recent failures (at most 10)
    pub errors: Vec<DiscoveryError>,
}
