//! # arxiv-relay
//!
//! Rate-limited arXiv discovery and on-demand extraction pipeline.
//!
//! Papers flow through three queues: `arxiv.discovered` (metadata only),
//! `arxiv.parse_request` (the intelligence layer's hand-off) and
//! `content.extracted` (full content). A correlation-id chain ties the
//! three phases of each paper's journey together.
//!
//! ## Architecture
//!
//! - [`models`]: paper metadata, extracted content and wire messages
//! - [`limiter`]: token-bucket rate limiting, optionally adaptive
//! - [`cache`]: namespaced TTL cache over an injectable backend
//! - [`client`]: rate-limited, cache-backed arXiv ATOM client
//! - [`expander`]: LLM-driven query expansion with deterministic fallback
//! - [`publisher`]: message emission over an injectable transport
//! - [`extractor`]: the opaque PDF extraction contract and its caching wrapper
//! - [`coordinator`]: the control plane binding it all together
//! - [`config`]: the explicit configuration value handed to each component
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use arxiv_relay::{
//!     CacheManager, Coordinator, InMemoryCacheBackend, MessagePublisher, RelayConfig,
//! };
//! # use arxiv_relay::publisher::MessageTransport;
//! # async fn demo(transport: Arc<dyn MessageTransport>) -> Result<(), arxiv_relay::RelayError> {
//! let config = RelayConfig::default();
//! let cache = Arc::new(CacheManager::new(InMemoryCacheBackend::shared(), &config));
//! let publisher = MessagePublisher::new(transport, config.clone())?;
//!
//! let mut coordinator = Coordinator::new(config, publisher)?.with_cache(cache);
//! coordinator.initialize()?;
//!
//! let result = coordinator
//!     .run_discovery(&["transformer time series".to_string()], None)
//!     .await;
//! println!("discovered {} papers", result.papers_discovered);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod expander;
pub mod extractor;
pub mod limiter;
pub mod models;
pub mod publisher;
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheManager, InMemoryCacheBackend};
pub use client::{ArxivClient, SortBy, SortOrder};
pub use config::RelayConfig;
pub use coordinator::Coordinator;
pub use error::RelayError;
pub use expander::{LlmRouter, QueryExpander};
pub use extractor::{CachingExtractor, PdfExtractor};
pub use models::{PaperMetadata, ParsedContent};
pub use publisher::{MessagePublisher, MessageTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
