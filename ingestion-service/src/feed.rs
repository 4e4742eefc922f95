//! Remote feed collaborator interface. The HTTP wrapper lives outside this
//! crate; implementations hand back already-structured field/value records
//! which go straight to the reconciliation engine.

use async_trait::async_trait;
use core_types::cache::TtlCache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type FeedRecord = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Network-ish trouble; the whole job may be re-attempted.
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    /// The feed answered but refused or returned garbage; not retryable.
    #[error("feed rejected request: {0}")]
    Rejected(String),
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Unavailable(_))
    }
}

#[async_trait]
pub trait SecurityFeed: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FeedRecord>, FeedError>;
}

const TOKEN_KEY: &str = "feed_token";

/// Explicit token reuse for feed implementations: one long-lived cache
/// owned here and injected, instead of ambient process-wide state.
pub struct FeedAuth {
    cache: Arc<TtlCache<&'static str, String>>,
    ttl: Duration,
}

impl FeedAuth {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(TtlCache::new()),
            ttl,
        }
    }

    /// Returns the cached token, or mints a fresh one and caches it for the
    /// configured TTL.
    pub async fn token_with<F, Fut>(&self, mint: F) -> Result<String, FeedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, FeedError>>,
    {
        if let Some(token) = self.cache.get(&TOKEN_KEY) {
            return Ok(token);
        }
        let token = mint().await?;
        self.cache.put_with_ttl(TOKEN_KEY, token.clone(), self.ttl);
        Ok(token)
    }
}
