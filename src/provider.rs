// ABOUTME: External provider interfaces - web search and page fetch.
// ABOUTME: Includes the shared retry-with-backoff helper for transient failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;

/// A ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Extracted page content from a fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub title: String,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

/// Search backend consumed by the orchestrator.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Return up to `max_results` ranked hits for a query. An empty result
    /// list is a valid outcome, not an error.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchHit>, ProviderError>;
}

/// Fetch backend consumed by the orchestrator. No caching is assumed.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Fetch a URL and return extracted text plus metadata.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ProviderError>;
}

/// Maximum attempts for a transient-failing provider call.
pub const RETRY_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Run a provider operation, retrying transient failures with exponential
/// backoff. Permanent failures return immediately.
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < RETRY_ATTEMPTS => {
                let delay = match &err {
                    ProviderError::RateLimited { retry_after_ms: Some(ms) } => {
                        Duration::from_millis(*ms)
                    }
                    _ => RETRY_BASE_DELAY * 2u32.pow(attempt - 1),
                };
                debug!(label, attempt, ?delay, error = %err, "retrying provider call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
