//! Paper metadata and extracted-content models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a paper was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSource {
    /// Surfaced by an expanded search query
    Query,
    /// Surfaced by a category sweep
    Category,
}

/// Metadata for a single arXiv paper.
///
/// Built by the API client from an ATOM entry and never mutated afterwards,
/// except for `source`, `source_query` and `relevance_score`, each of which
/// is set exactly once at a known point in the pipeline.
///
/// Equality and hashing go by `paper_id` alone: two records with the same
/// id are the same paper for deduplication purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMetadata {
    /// Canonical arXiv ID without version suffix (e.g. "2401.12345")
    pub paper_id: String,

    /// Version string ("v1", "v2", ...)
    #[serde(default = "default_version")]
    pub version: String,

    /// Paper title, whitespace-collapsed
    pub title: String,

    /// Paper abstract, whitespace-collapsed
    #[serde(default)]
    pub r#abstract: String,

    /// Author names in upstream order
    #[serde(default)]
    pub authors: Vec<String>,

    /// Full category tokens (e.g. ["cs.LG", "stat.ML"])
    #[serde(default)]
    pub categories: Vec<String>,

    /// Categories plus their top-level prefixes, first-appearance order
    #[serde(default)]
    pub subcategories: Vec<String>,

    /// Original submission date (YYYY-MM-DD)
    #[serde(default)]
    pub submitted_date: String,

    /// Last update date (YYYY-MM-DD)
    #[serde(default)]
    pub updated_date: Option<String>,

    /// DOI if available
    #[serde(default)]
    pub doi: Option<String>,

    /// Journal reference
    #[serde(default)]
    pub journal_ref: Option<String>,

    /// Author comments
    #[serde(default)]
    pub comments: Option<String>,

    /// Direct URL to the PDF
    #[serde(default)]
    pub pdf_url: String,

    /// URL to the arXiv abstract page
    #[serde(default)]
    pub arxiv_url: String,

    /// How the paper was discovered
    #[serde(default = "default_source")]
    pub source: PaperSource,

    /// The original (un-expanded) query or category that surfaced it
    #[serde(default)]
    pub source_query: String,

    /// Relevance score assigned by the intelligence layer, in [0, 1].
    /// Populated only on the extracted-message path.
    #[serde(default)]
    pub relevance_score: Option<f64>,
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_source() -> PaperSource {
    PaperSource::Query
}

impl PaperMetadata {
    /// Create a paper with required fields; everything else defaults.
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            version: default_version(),
            title: title.into(),
            r#abstract: String::new(),
            authors: Vec::new(),
            categories: Vec::new(),
            subcategories: Vec::new(),
            submitted_date: String::new(),
            updated_date: None,
            doi: None,
            journal_ref: None,
            comments: None,
            pdf_url: String::new(),
            arxiv_url: String::new(),
            source: PaperSource::Query,
            source_query: String::new(),
            relevance_score: None,
        }
    }
}

impl PartialEq for PaperMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.paper_id == other.paper_id
    }
}

impl Eq for PaperMetadata {}

impl std::hash::Hash for PaperMetadata {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.paper_id.hash(state);
    }
}

/// A table extracted from a PDF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    /// Table caption if available
    #[serde(default)]
    pub caption: Option<String>,

    /// Column headers
    #[serde(default)]
    pub headers: Vec<String>,

    /// Data rows (each row is a list of cell values)
    #[serde(default)]
    pub rows: Vec<Vec<String>>,

    /// Number of data rows
    #[serde(default)]
    pub row_count: usize,

    /// Number of columns
    #[serde(default)]
    pub col_count: usize,

    /// Page number where the table appears
    #[serde(default)]
    pub page_number: u32,
}

/// A figure caption extracted from a PDF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FigureData {
    /// Figure identifier (e.g. "fig_1")
    #[serde(default)]
    pub figure_id: String,

    /// Figure caption
    #[serde(default)]
    pub caption: String,

    /// Page number where the figure appears
    #[serde(default)]
    pub page: u32,

    /// Alternative text if available
    #[serde(default)]
    pub alt_text: Option<String>,
}

/// Content extracted from a paper's PDF.
///
/// This is the single normalized schema at the extractor boundary; any
/// layout-specific dispatch lives inside the extractor implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedContent {
    /// arXiv ID this content belongs to
    pub paper_id: String,

    /// Full text extracted from the PDF
    #[serde(default)]
    pub text_content: String,

    /// Extracted tables
    #[serde(default)]
    pub tables: Vec<TableData>,

    /// LaTeX equations, de-duplicated, first-occurrence order
    #[serde(default)]
    pub equations: Vec<String>,

    /// Figure captions
    #[serde(default)]
    pub figure_captions: Vec<FigureData>,

    /// Extraction metadata (processing time, processed-at, source url, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ParsedContent {
    /// Empty content for a paper id.
    pub fn new(paper_id: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            text_content: String::new(),
            tables: Vec::new(),
            equations: Vec::new(),
            figure_captions: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Result of expanding a raw query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExpansion {
    /// The raw query as supplied by the caller
    pub original_query: String,

    /// Expanded query strings; never empty after construction
    pub expanded_queries: Vec<String>,

    /// When the expansion was generated
    pub generated_at: DateTime<Utc>,

    /// Whether this expansion came from the cache
    pub cache_hit: bool,
}

impl QueryExpansion {
    /// Build an expansion result. An empty `expanded_queries` falls back
    /// to the original query so the non-empty invariant always holds.
    pub fn new(original_query: impl Into<String>, expanded_queries: Vec<String>, cache_hit: bool) -> Self {
        let original_query = original_query.into();
        let expanded_queries = if expanded_queries.is_empty() {
            vec![original_query.clone()]
        } else {
            expanded_queries
        };
        Self {
            original_query,
            expanded_queries,
            generated_at: Utc::now(),
            cache_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_by_id() {
        let mut a = PaperMetadata::new("2401.12345", "A title");
        let mut b = PaperMetadata::new("2401.12345", "A completely different title");
        a.version = "v1".to_string();
        b.version = "v3".to_string();
        assert_eq!(a, b);

        let c = PaperMetadata::new("2401.99999", "A title");
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_by_id() {
        let a = PaperMetadata::new("2401.12345", "one");
        let b = PaperMetadata::new("2401.12345", "two");
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let mut paper = PaperMetadata::new("2401.12345", "Attention Is All You Need");
        paper.version = "v2".to_string();
        paper.r#abstract = "We propose a new architecture.".to_string();
        paper.authors = vec!["A. Vaswani".to_string(), "N. Shazeer".to_string()];
        paper.categories = vec!["cs.LG".to_string(), "stat.ML".to_string()];
        paper.subcategories = vec![
            "cs.LG".to_string(),
            "stat.ML".to_string(),
            "cs".to_string(),
            "stat".to_string(),
        ];
        paper.submitted_date = "2024-01-20".to_string();
        paper.updated_date = Some("2024-02-01".to_string());
        paper.doi = Some("10.1234/example".to_string());
        paper.journal_ref = Some("NeurIPS 2017".to_string());
        paper.comments = Some("15 pages".to_string());
        paper.pdf_url = "https://arxiv.org/pdf/2401.12345v2".to_string();
        paper.arxiv_url = "https://arxiv.org/abs/2401.12345v2".to_string();
        paper.source = PaperSource::Category;
        paper.source_query = "cs.LG".to_string();
        paper.relevance_score = Some(0.9);

        let json = serde_json::to_string(&paper).unwrap();
        let back: PaperMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(back.paper_id, paper.paper_id);
        assert_eq!(back.version, paper.version);
        assert_eq!(back.title, paper.title);
        assert_eq!(back.r#abstract, paper.r#abstract);
        assert_eq!(back.authors, paper.authors);
        assert_eq!(back.categories, paper.categories);
        assert_eq!(back.subcategories, paper.subcategories);
        assert_eq!(back.submitted_date, paper.submitted_date);
        assert_eq!(back.updated_date, paper.updated_date);
        assert_eq!(back.doi, paper.doi);
        assert_eq!(back.journal_ref, paper.journal_ref);
        assert_eq!(back.comments, paper.comments);
        assert_eq!(back.pdf_url, paper.pdf_url);
        assert_eq!(back.arxiv_url, paper.arxiv_url);
        assert_eq!(back.source, paper.source);
        assert_eq!(back.source_query, paper.source_query);
        assert_eq!(back.relevance_score, paper.relevance_score);
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let json = serde_json::to_string(&PaperSource::Category).unwrap();
        assert_eq!(json, "\"category\"");
    }

    #[test]
    fn test_expansion_never_empty() {
        let expansion = QueryExpansion::new("neural network", vec![], false);
        assert_eq!(expansion.expanded_queries, vec!["neural network"]);

        let expansion =
            QueryExpansion::new("neural network", vec!["all:neural network".to_string()], true);
        assert_eq!(expansion.expanded_queries.len(), 1);
        assert!(expansion.cache_hit);
    }
}
