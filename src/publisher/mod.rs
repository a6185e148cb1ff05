//! Message emission to the three pipeline queues.
//!
//! The transport contract is minimal: accept a structured message and a
//! routing key, return once the broker has accepted the frame, raise on
//! failure. Delivery is at-least-once; consumers deduplicate by
//! correlation id.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models::{
    DiscoveredMessage, ExtractedMessage, PaperMetadata, ParseRequestMessage, ParsedContent,
};

/// Pause between publish sub-batches to avoid flooding the broker.
const BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Broker-facing transport. Injected; typically backed by a pooled AMQP
/// channel, but tests use an in-memory recorder.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Deliver one message to a routing key.
    async fn publish(&self, message: serde_json::Value, routing_key: &str)
        -> Result<(), RelayError>;

    async fn health_check(&self) -> bool;

    async fn close(&self) -> Result<(), RelayError>;
}

/// Publisher statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherStats {
    pub published_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub discovered_queue: String,
    pub parse_request_queue: String,
    pub extracted_queue: String,
}

/// Emits Discovered, ParseRequest and Extracted messages.
pub struct MessagePublisher {
    transport: Arc<dyn MessageTransport>,
    config: RelayConfig,

    // Diagnostic counters, not authoritative
    published_count: AtomicU64,
    error_count: AtomicU64,
}

impl MessagePublisher {
    pub fn new(transport: Arc<dyn MessageTransport>, config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        tracing::info!(
            "MessagePublisher ready, queues: {}, {}, {}",
            config.discovered_queue,
            config.parse_request_queue,
            config.extracted_queue
        );
        Ok(Self {
            transport,
            config,
            published_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        })
    }

    /// Publish one Discovered message per paper.
    ///
    /// With `correlation_id` supplied (a run id), every message shares it;
    /// otherwise each message gets a fresh UUID. Per-paper failures are
    /// counted but do not abort the batch. Returns the number of
    /// successful emissions.
    pub async fn publish_discovered(
        &self,
        papers: &[PaperMetadata],
        correlation_id: Option<&str>,
    ) -> usize {
        let mut published = 0;

        for paper in papers {
            let id = correlation_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let message = DiscoveredMessage::from_paper(paper, id);

            match self.emit(&message, &self.config.discovered_queue).await {
                Ok(()) => {
                    published += 1;
                    tracing::debug!("Published discovered paper: {}", paper.paper_id);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to publish discovered paper {}: {}",
                        paper.paper_id,
                        e
                    );
                }
            }
        }

        tracing::info!(
            "Published {}/{} papers to {}",
            published,
            papers.len(),
            self.config.discovered_queue
        );
        published
    }

    /// Publish papers in fixed-size sub-batches with a short pause in
    /// between. Sub-batch failures do not abort the whole.
    pub async fn publish_batch_discovered(
        &self,
        papers: &[PaperMetadata],
        correlation_id: Option<&str>,
    ) -> usize {
        let batch_size = self.config.batch_size;
        let mut total_published = 0;

        for (index, batch) in papers.chunks(batch_size).enumerate() {
            total_published += self.publish_discovered(batch, correlation_id).await;

            if (index + 1) * batch_size < papers.len() {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        total_published
    }

    /// Publish a single ParseRequest.
    ///
    /// `priority` must lie in [1, 10] and `relevance_score` in [0, 1];
    /// out-of-range values are rejected before anything reaches the wire.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_parse_request(
        &self,
        paper_id: &str,
        pdf_url: &str,
        correlation_id: &str,
        original_correlation_id: &str,
        priority: u8,
        relevance_score: Option<f64>,
        intelligence_notes: Option<String>,
    ) -> Result<(), RelayError> {
        if !(1..=10).contains(&priority) {
            return Err(RelayError::validation(
                "priority",
                format!("{} is outside [1, 10]", priority),
            ));
        }
        if let Some(score) = relevance_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(RelayError::validation(
                    "relevance_score",
                    format!("{} is outside [0, 1]", score),
                ));
            }
        }

        let message = ParseRequestMessage {
            correlation_id: correlation_id.to_string(),
            original_correlation_id: original_correlation_id.to_string(),
            created_at: chrono::Utc::now(),
            paper_id: paper_id.to_string(),
            pdf_url: pdf_url.to_string(),
            priority,
            relevance_score,
            intelligence_notes,
        };

        self.emit(&message, &self.config.parse_request_queue)
            .await
            .map(|()| {
                tracing::info!("Published parse request for {} (priority: {})", paper_id, priority);
            })
    }

    /// Publish one Extracted message carrying the full correlation chain.
    pub async fn publish_extracted(
        &self,
        paper: &PaperMetadata,
        content: &ParsedContent,
        discovery_correlation_id: &str,
        parse_correlation_id: &str,
    ) -> Result<(), RelayError> {
        let message = ExtractedMessage::from_parts(
            paper,
            content,
            discovery_correlation_id.to_string(),
            parse_correlation_id.to_string(),
        );

        self.emit(&message, &self.config.extracted_queue)
            .await
            .map(|()| {
                tracing::info!("Published extracted paper: {}", paper.paper_id);
            })
    }

    /// Serialize and deliver one message, retrying transient transport
    /// failures with a growing delay.
    async fn emit<T: Serialize>(&self, message: &T, routing_key: &str) -> Result<(), RelayError> {
        let value = serde_json::to_value(message).map_err(|e| {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            RelayError::Publish {
                routing_key: routing_key.to_string(),
                reason: format!("unserializable message: {}", e),
            }
        })?;

        let max_attempts = self.config.publish_max_retries.max(1);
        let mut delay = Duration::from_secs_f64(self.config.publish_retry_delay_seconds);

        for attempt in 1..=max_attempts {
            match self.transport.publish(value.clone(), routing_key).await {
                Ok(()) => {
                    self.published_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        "Publish to {} failed on attempt {}, retrying: {}",
                        routing_key,
                        attempt,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    return Err(RelayError::Publish {
                        routing_key: routing_key.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.error_count.fetch_add(1, Ordering::Relaxed);
        Err(RelayError::Publish {
            routing_key: routing_key.to_string(),
            reason: "retries exhausted".to_string(),
        })
    }

    pub async fn health_check(&self) -> bool {
        self.transport.health_check().await
    }

    pub async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::warn!("Failed to close transport: {}", e);
        }
        tracing::info!("MessagePublisher closed");
    }

    pub fn stats(&self) -> PublisherStats {
        let published = self.published_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);
        PublisherStats {
            published_count: published,
            error_count: errors,
            success_rate: if published + errors > 0 {
                published as f64 / (published + errors) as f64
            } else {
                0.0
            },
            discovered_queue: self.config.discovered_queue.clone(),
            parse_request_queue: self.config.parse_request_queue.clone(),
            extracted_queue: self.config.extracted_queue.clone(),
        }
    }
}

impl std::fmt::Debug for MessagePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePublisher")
            .field("published", &self.published_count.load(Ordering::Relaxed))
            .field("errors", &self.error_count.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Transport that records every frame, optionally failing on a
    /// predicate over the paper id.
    #[derive(Default)]
    struct RecordingTransport {
        frames: Mutex<Vec<(serde_json::Value, String)>>,
        fail_paper_ids: Vec<String>,
        fail_everything: bool,
    }

    impl RecordingTransport {
        fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        async fn frames(&self) -> Vec<(serde_json::Value, String)> {
            self.frames.lock().await.clone()
        }
    }

    #[async_trait]
    impl MessageTransport for RecordingTransport {
        async fn publish(
            &self,
            message: serde_json::Value,
            routing_key: &str,
        ) -> Result<(), RelayError> {
            let paper_id = message["paper_id"].as_str().unwrap_or_default();
            if self.fail_everything || self.fail_paper_ids.iter().any(|id| id == paper_id) {
                return Err(RelayError::Publish {
                    routing_key: routing_key.to_string(),
                    reason: "broker unavailable".to_string(),
                });
            }
            self.frames
                .lock()
                .await
                .push((message, routing_key.to_string()));
            Ok(())
        }

        async fn health_check(&self) -> bool {
            !self.fail_everything
        }

        async fn close(&self) -> Result<(), RelayError> {
            Ok(())
        }
    }

    fn fast_config() -> RelayConfig {
        RelayConfig {
            publish_max_retries: 1,
            publish_retry_delay_seconds: 0.001,
            ..Default::default()
        }
    }

    fn papers(ids: &[&str]) -> Vec<PaperMetadata> {
        ids.iter()
            .map(|id| PaperMetadata::new(*id, format!("Paper {}", id)))
            .collect()
    }

    #[tokio::test]
    async fn test_publish_discovered_counts_and_routes() {
        let transport = RecordingTransport::shared();
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        let count = publisher
            .publish_discovered(&papers(&["2401.1", "2401.2"]), Some("run-id"))
            .await;

        assert_eq!(count, 2);
        let frames = transport.frames().await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|(_, key)| key == "arxiv.discovered"));
        assert!(frames
            .iter()
            .all(|(msg, _)| msg["correlation_id"] == "run-id"));
    }

    #[tokio::test]
    async fn test_publish_discovered_fresh_ids_when_unsupplied() {
        let transport = RecordingTransport::shared();
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        publisher
            .publish_discovered(&papers(&["2401.1", "2401.2"]), None)
            .await;

        let frames = transport.frames().await;
        let id_a = frames[0].0["correlation_id"].as_str().unwrap();
        let id_b = frames[1].0["correlation_id"].as_str().unwrap();
        // Fresh UUIDs, never the paper id
        assert_ne!(id_a, id_b);
        assert_ne!(id_a, "2401.1");
        assert!(Uuid::parse_str(id_a).is_ok());
    }

    #[tokio::test]
    async fn test_per_paper_failure_does_not_abort_batch() {
        let transport = Arc::new(RecordingTransport {
            fail_paper_ids: vec!["2401.2".to_string()],
            ..Default::default()
        });
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        let count = publisher
            .publish_discovered(&papers(&["2401.1", "2401.2", "2401.3"]), None)
            .await;

        assert_eq!(count, 2);
        let stats = publisher.stats();
        assert_eq!(stats.published_count, 2);
        assert_eq!(stats.error_count, 1);
    }

    #[tokio::test]
    async fn test_parse_request_validation_bounds() {
        let publisher =
            MessagePublisher::new(RecordingTransport::shared() as _, fast_config()).unwrap();

        let err = publisher
            .publish_parse_request("2401.1", "http://x/p.pdf", "c", "d", 0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation { .. }));

        let err = publisher
            .publish_parse_request("2401.1", "http://x/p.pdf", "c", "d", 11, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation { .. }));

        let err = publisher
            .publish_parse_request("2401.1", "http://x/p.pdf", "c", "d", 5, Some(1.5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_parse_request_wire_shape() {
        let transport = RecordingTransport::shared();
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        publisher
            .publish_parse_request(
                "2401.1",
                "http://arxiv.org/pdf/2401.1",
                "uuid-parse",
                "uuid-discovery",
                3,
                Some(0.9),
                Some("looks relevant".to_string()),
            )
            .await
            .unwrap();

        let frames = transport.frames().await;
        assert_eq!(frames.len(), 1);
        let (msg, key) = &frames[0];
        assert_eq!(key, "arxiv.parse_request");
        assert_eq!(msg["correlation_id"], "uuid-parse");
        assert_eq!(msg["original_correlation_id"], "uuid-discovery");
        assert_eq!(msg["priority"], 3);
        assert_eq!(msg["relevance_score"], 0.9);
        assert_eq!(msg["intelligence_notes"], "looks relevant");
    }

    #[tokio::test]
    async fn test_extracted_carries_full_chain() {
        let transport = RecordingTransport::shared();
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        let paper = PaperMetadata::new("2401.1", "A Paper");
        let content = ParsedContent::new("2401.1");

        publisher
            .publish_extracted(&paper, &content, "uuid-d", "uuid-p")
            .await
            .unwrap();

        let frames = transport.frames().await;
        let (msg, key) = &frames[0];
        assert_eq!(key, "content.extracted");
        assert_eq!(msg["correlation_id"], "uuid-p");
        assert_eq!(msg["discovery_correlation_id"], "uuid-d");
        assert_eq!(msg["parse_correlation_id"], "uuid-p");
    }

    #[tokio::test]
    async fn test_extracted_failure_raises() {
        let transport = Arc::new(RecordingTransport {
            fail_everything: true,
            ..Default::default()
        });
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        let err = publisher
            .publish_extracted(
                &PaperMetadata::new("2401.1", "t"),
                &ParsedContent::new("2401.1"),
                "d",
                "p",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Publish { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_publishing_pauses_between_batches() {
        let transport = RecordingTransport::shared();
        let publisher =
            MessagePublisher::new(Arc::clone(&transport) as _, fast_config()).unwrap();

        let many: Vec<PaperMetadata> = (0..25)
            .map(|i| PaperMetadata::new(format!("2401.{i}"), "t"))
            .collect();

        let start = tokio::time::Instant::now();
        let count = publisher.publish_batch_discovered(&many, Some("run")).await;

        assert_eq!(count, 25);
        // Two inter-batch pauses for 25 papers in batches of 10
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(transport.frames().await.len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_retries_before_failing() {
        struct FlakyTransport {
            attempts: AtomicU64,
        }

        #[async_trait]
        impl MessageTransport for FlakyTransport {
            async fn publish(
                &self,
                _message: serde_json::Value,
                routing_key: &str,
            ) -> Result<(), RelayError> {
                if self.attempts.fetch_add(1, Ordering::Relaxed) < 2 {
                    Err(RelayError::Publish {
                        routing_key: routing_key.to_string(),
                        reason: "transient".to_string(),
                    })
                } else {
                    Ok(())
                }
            }

            async fn health_check(&self) -> bool {
                true
            }

            async fn close(&self) -> Result<(), RelayError> {
                Ok(())
            }
        }

        let transport = Arc::new(FlakyTransport {
            attempts: AtomicU64::new(0),
        });
        let config = RelayConfig {
            publish_max_retries: 3,
            publish_retry_delay_seconds: 0.01,
            ..Default::default()
        };
        let publisher = MessagePublisher::new(Arc::clone(&transport) as _, config).unwrap();

        let count = publisher
            .publish_discovered(&papers(&["2401.1"]), None)
            .await;

        assert_eq!(count, 1);
        assert_eq!(transport.attempts.load(Ordering::Relaxed), 3);
    }
}
