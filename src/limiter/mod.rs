//! Token-bucket admission gate for the arXiv API.
//!
//! arXiv asks for at most one request every three seconds, so the default
//! refill rate is 0.33 tokens/second with a capacity of one (no burst).
//! [`AdaptiveRateLimiter`] wraps the bucket and adjusts the rate in
//! response to 429s and success streaks.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::error::RelayError;

/// Default refill rate: 1 request per 3 seconds.
pub const DEFAULT_RATE: f64 = 0.33;

/// Default bucket capacity: no burst.
pub const DEFAULT_CAPACITY: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    /// Advance tokens for the elapsed time, clamped to capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = self.capacity.min(self.tokens + elapsed * self.rate);
        self.last_update = now;
    }
}

/// Snapshot of limiter state.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub rate: f64,
    pub capacity: f64,
    pub available_tokens: f64,
    pub wait_seconds: f64,
}

/// Token-bucket rate limiter.
///
/// `acquire` blocks the calling task only; it never rejects under normal
/// operation. All bucket mutation happens under a single mutex, which is
/// released before sleeping.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with the given refill rate (tokens per second).
    pub fn new(rate: f64) -> Self {
        Self::with_capacity(rate, DEFAULT_CAPACITY)
    }

    /// Create a limiter with an explicit bucket capacity.
    pub fn with_capacity(rate: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(Bucket {
                rate,
                capacity,
                tokens: capacity,
                last_update: Instant::now(),
            }),
        }
    }

    /// Acquire permission to make a request, sleeping until a token is
    /// available.
    ///
    /// Failing to find a token after the computed sleep indicates the
    /// bucket accounting is broken and surfaces as an error.
    pub async fn acquire(&self) -> Result<(), RelayError> {
        let wait = {
            let mut bucket = self.state.lock().await;
            bucket.refill();
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                tracing::debug!("Rate limiter: acquired token, {:.2} remaining", bucket.tokens);
                return Ok(());
            }
            Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
        };

        tracing::debug!("Rate limiter: waiting {:.2}s for token", wait.as_secs_f64());
        sleep(wait).await;

        let mut bucket = self.state.lock().await;
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            tracing::debug!("Rate limiter: acquired after wait, {:.2} remaining", bucket.tokens);
            return Ok(());
        }

        Err(RelayError::RateLimit {
            retry_after: wait.as_secs() + 1,
        })
    }

    /// Try to acquire a token without sleeping.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().await;
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Advisory delay until the next request would be admitted.
    pub async fn get_delay(&self) -> Duration {
        let mut bucket = self.state.lock().await;
        bucket.refill();
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
        }
    }

    /// Refill the bucket to capacity.
    pub async fn reset(&self) {
        let mut bucket = self.state.lock().await;
        bucket.tokens = bucket.capacity;
        bucket.last_update = Instant::now();
        tracing::info!("Rate limiter reset");
    }

    /// Current token count.
    pub async fn available_tokens(&self) -> f64 {
        let mut bucket = self.state.lock().await;
        bucket.refill();
        bucket.tokens
    }

    /// Change the refill rate. Used by the adaptive wrapper.
    pub async fn set_rate(&self, rate: f64) {
        let mut bucket = self.state.lock().await;
        bucket.refill();
        bucket.rate = rate;
    }

    /// Current refill rate.
    pub async fn rate(&self) -> f64 {
        self.state.lock().await.rate
    }

    /// Snapshot of the limiter state.
    pub async fn stats(&self) -> RateLimiterStats {
        let mut bucket = self.state.lock().await;
        bucket.refill();
        let wait_seconds = if bucket.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - bucket.tokens) / bucket.rate
        };
        RateLimiterStats {
            rate: bucket.rate,
            capacity: bucket.capacity,
            available_tokens: bucket.tokens,
            wait_seconds,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE)
    }
}

/// Tuning for [`AdaptiveRateLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    /// Starting rate
    pub base_rate: f64,
    /// Floor the rate never drops below
    pub min_rate: f64,
    /// Ceiling the rate never exceeds
    pub max_rate: f64,
    /// Multiplier applied per consecutive 429 (< 1)
    pub backoff_factor: f64,
    /// Multiplier applied after three consecutive successes (> 1)
    pub recovery_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_rate: DEFAULT_RATE,
            min_rate: 0.1, // 1 req / 10 s
            max_rate: 0.5, // 1 req / 2 s
            backoff_factor: 0.8,
            recovery_factor: 1.1,
        }
    }
}

#[derive(Debug)]
struct AdaptiveState {
    current_rate: f64,
    consecutive_429s: u32,
    consecutive_successes: u32,
}

/// Snapshot of adaptive limiter state.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveStats {
    #[serde(flatten)]
    pub bucket: RateLimiterStats,
    pub current_rate: f64,
    pub consecutive_429s: u32,
    pub consecutive_successes: u32,
}

/// Rate limiter that adapts to server pushback.
///
/// On 429 the rate shrinks by `backoff_factor ^ consecutive_429s`; after
/// three consecutive successes it grows by `recovery_factor`. Either event
/// resets the opposite streak. The rate stays within
/// `[min_rate, max_rate]`.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    config: AdaptiveConfig,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.base_rate),
            state: Mutex::new(AdaptiveState {
                current_rate: config.base_rate,
                consecutive_429s: 0,
                consecutive_successes: 0,
            }),
            config,
        }
    }

    /// Acquire permission at the current adaptive rate.
    pub async fn acquire(&self) -> Result<(), RelayError> {
        self.limiter.acquire().await
    }

    /// Record a successful upstream response.
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_429s = 0;
        state.consecutive_successes += 1;

        if state.consecutive_successes >= 3 {
            let new_rate = self
                .config
                .max_rate
                .min(state.current_rate * self.config.recovery_factor);
            if new_rate != state.current_rate {
                state.current_rate = new_rate;
                self.limiter.set_rate(new_rate).await;
                tracing::info!("Rate limiter: increased rate to {:.3}/s", new_rate);
            }
            state.consecutive_successes = 0;
        }
    }

    /// Record a 429 from upstream.
    pub async fn on_rate_limit(&self, retry_after: u64) {
        let mut state = self.state.lock().await;
        state.consecutive_successes = 0;
        state.consecutive_429s += 1;

        let new_rate = self.config.min_rate.max(
            state.current_rate
                * self
                    .config
                    .backoff_factor
                    .powi(state.consecutive_429s as i32),
        );
        if new_rate != state.current_rate {
            state.current_rate = new_rate;
            self.limiter.set_rate(new_rate).await;
            tracing::warn!(
                "Rate limiter: decreased rate to {:.3}/s ({} consecutive 429s, retry after {}s)",
                new_rate,
                state.consecutive_429s,
                retry_after
            );
        }
    }

    /// The rate currently in effect.
    pub async fn current_rate(&self) -> f64 {
        self.state.lock().await.current_rate
    }

    pub async fn stats(&self) -> AdaptiveStats {
        let bucket = self.limiter.stats().await;
        let state = self.state.lock().await;
        AdaptiveStats {
            bucket,
            current_rate: state.current_rate,
            consecutive_429s: state.consecutive_429s,
            consecutive_successes: state.consecutive_successes,
        }
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}

/// The limiter handle held by the API client: either a fixed-rate bucket
/// or the adaptive variant.
#[derive(Debug)]
pub enum Limiter {
    Fixed(RateLimiter),
    Adaptive(AdaptiveRateLimiter),
}

impl Limiter {
    pub async fn acquire(&self) -> Result<(), RelayError> {
        match self {
            Limiter::Fixed(limiter) => limiter.acquire().await,
            Limiter::Adaptive(limiter) => limiter.acquire().await,
        }
    }

    /// Forwarded to the adaptive variant; a no-op for the fixed bucket.
    pub async fn on_success(&self) {
        if let Limiter::Adaptive(limiter) = self {
            limiter.on_success().await;
        }
    }

    /// Forwarded to the adaptive variant; a no-op for the fixed bucket.
    pub async fn on_rate_limit(&self, retry_after: u64) {
        if let Limiter::Adaptive(limiter) = self {
            limiter.on_rate_limit(retry_after).await;
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        match self {
            Limiter::Fixed(limiter) => limiter.stats().await,
            Limiter::Adaptive(limiter) => limiter.stats().await.bucket,
        }
    }
}
