//! Injectable byte-oriented cache backend.
//!
//! The pipeline never talks to a concrete store directly; anything that
//! implements [`CacheBackend`] can be plugged in. [`InMemoryCacheBackend`]
//! ships with the crate for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::RelayError;

/// Byte-oriented cache store with TTL support.
///
/// Implementations are responsible for their own concurrency; the cache
/// manager treats every operation as fallible and degrades to a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RelayError>;

    /// Store a value, optionally bounded by a TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), RelayError>;

    /// Remove a single key.
    async fn delete(&self, key: &str) -> Result<(), RelayError>;

    /// Whether a live entry exists for the key.
    async fn exists(&self, key: &str) -> Result<bool, RelayError>;

    /// Fetch several keys at once; only hits appear in the result.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, RelayError>;

    /// Remove every key matching a glob pattern (`*` wildcard).
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, RelayError>;

    /// Release any held resources.
    async fn close(&self) -> Result<(), RelayError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// In-process cache backend with per-entry TTLs.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for injection sites that take an
    /// `Arc<dyn CacheBackend>`.
    pub fn shared() -> Arc<dyn CacheBackend> {
        Arc::new(Self::new())
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Match a key against a glob pattern where `*` matches any run of
/// characters. Patterns in this crate are prefix-shaped
/// (`arxiv:api:*`), but segments between wildcards are honored too.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut remainder = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RelayError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), RelayError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RelayError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, RelayError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, RelayError> {
        let mut entries = self.entries.lock().await;
        let mut result = HashMap::new();
        for key in keys {
            match entries.get(key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(key);
                }
                Some(entry) => {
                    result.insert(key.clone(), entry.value.clone());
                }
                None => {}
            }
        }
        Ok(result)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, RelayError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - entries.len()) as u64)
    }

    async fn close(&self) -> Result<(), RelayError> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        Ok(())
    }
}
