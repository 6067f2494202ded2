//! Embedding providers
//!
//! Text goes in, a fixed-length `f32` vector comes out. `f32` is the only
//! width used for embeddings anywhere in the crate: provider JSON numbers are
//! narrowed to `f32` when the response is deserialized, and that is the sole
//! width conversion. pgvector stores `real` components, so the datastore
//! round trip is lossless.

pub mod ollama;
pub mod openai;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{EmbeddingConfig, ProviderKind};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Failed to parse embedding response: {0}")]
    Parse(String),

    #[error("Embedding provider returned no embedding")]
    NoEmbedding,

    #[error("Embedding provider returned an empty vector")]
    Empty,

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid embedding provider configuration: {0}")]
    Config(String),

    #[error("Embedding model '{model}' is not available. Available models: {available:?}")]
    ModelUnavailable {
        model: String,
        available: Vec<String>,
    },
}

/// A single embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    #[inline]
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[inline]
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Reject vectors that cannot be stored in a `vector(expected)` column.
    #[inline]
    pub fn check_dimension(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.0.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if self.0.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.0.len(),
            });
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Embedding {
    #[inline]
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl From<Embedding> for pgvector::Vector {
    #[inline]
    fn from(embedding: Embedding) -> Self {
        Self::from(embedding.0)
    }
}

impl From<pgvector::Vector> for Embedding {
    #[inline]
    fn from(vector: pgvector::Vector) -> Self {
        Self(vector.to_vec())
    }
}

/// Converts text into embedding vectors of a fixed dimension
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Dimension every returned vector is expected to have
    fn dimension(&self) -> usize;

    /// Embed one piece of text. Dimension checks are the caller's job.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Verify the provider is reachable and serves the configured model
    async fn health_check(&self) -> Result<(), EmbeddingError>;
}

/// Build the provider selected in configuration
#[inline]
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(config)?),
        ProviderKind::Ollama => Arc::new(OllamaClient::new(config)?),
    };
    debug!(
        "Using {} embeddings with model {} ({} dimensions)",
        provider.name(),
        provider.model(),
        provider.dimension()
    );
    Ok(provider)
}

/// Retry schedule for provider HTTP calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[inline]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: DEFAULT_BACKOFF,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt.saturating_sub(1))
    }
}

/// Send a request, retrying server errors and transport failures.
///
/// Client errors (4xx) are returned immediately. The future is cancel-safe:
/// dropping it drops the in-flight request.
pub(crate) async fn send_with_retry<F, Fut>(
    policy: RetryPolicy,
    endpoint: &str,
    mut request_fn: F,
) -> Result<String, EmbeddingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<reqwest::Response>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{}", attempt, policy.attempts);

        match request_fn().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| EmbeddingError::Request(e.to_string()))?;

                if status.is_success() {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(body);
                }

                let error = EmbeddingError::Provider {
                    status: status.as_u16(),
                    message: body.trim().to_string(),
                };

                if status.is_server_error() {
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, policy.attempts
                    );
                    last_error = Some(error);
                } else {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(error);
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                warn!(
                    "Transport error: {}, attempt {}/{}",
                    e, attempt, policy.attempts
                );
                last_error = Some(EmbeddingError::Request(e.to_string()));
            }
            Err(e) => {
                warn!("Non-retryable error: {}", e);
                return Err(EmbeddingError::Request(e.to_string()));
            }
        }

        if attempt < policy.attempts {
            let delay = policy.delay_for(attempt);
            debug!("Waiting {:?} before retry", delay);
            tokio::time::sleep(delay).await;
        }
    }

    error!("All retry attempts failed for request to {}", endpoint);

    Err(last_error
        .unwrap_or_else(|| EmbeddingError::Request("Request failed after retries".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_checks() {
        let embedding = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert!(embedding.check_dimension(3).is_ok());
        assert!(matches!(
            embedding.check_dimension(4),
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(matches!(
            Embedding::new(Vec::new()).check_dimension(3),
            Err(EmbeddingError::Empty)
        ));
    }

    #[test]
    fn pgvector_conversion_keeps_values() {
        let embedding = Embedding::new(vec![0.25, -1.5, 3.0]);
        let vector = pgvector::Vector::from(embedding.clone());
        assert_eq!(vector.as_slice(), embedding.as_slice());
        assert_eq!(Embedding::from(vector), embedding);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            attempts: 4,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::new(0).attempts, 1);
    }
}
