//! Core data structures: paper metadata, extracted content and the wire
//! messages of the three-phase pipeline.

mod messages;
mod paper;

pub use messages::{
    DiscoveredMessage, DiscoveryError, DiscoveryRunResult, ExtractedMessage, ParseRequestMessage,
};
pub use paper::{FigureData, PaperMetadata, PaperSource, ParsedContent, QueryExpansion, TableData};
