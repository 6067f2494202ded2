
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Embedding, EmbeddingError, EmbeddingProvider, RetryPolicy, send_with_retry};
use crate::config::EmbeddingConfig;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let base_url = config
            .base_url()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EmbeddingError::Config("OpenAI API key is not set".to_string()))?;

        Ok(Self {
            base_url: with_trailing_slash(base_url),
            api_key,
            model: config.model().to_string(),
            dimension: config.dimension() as usize,
            client: build_http_client(Duration::from_secs(config.timeout_secs))?,
            retry: RetryPolicy::new(config.retry_attempts),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, EmbeddingError> {
        self.client = build_http_client(timeout)?;
        Ok(self)
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Only the `text-embedding-3` family accepts a `dimensions` parameter
    fn supports_dimensions(&self) -> bool {
        self.model.starts_with("text-embedding-3")
    }

    fn endpoint(&self, path: &str) -> Result<Url, EmbeddingError> {
        self.base_url
            .join(path)
            .map_err(|e| EmbeddingError::Config(format!("Failed to build URL for {path}: {e}")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        debug!("Generating embedding for text (length: {})", text.len());

        let url = self.endpoint("embeddings")?;
        let request = EmbedRequest {
            model: &self.model,
            input: [text],
            encoding_format: "float",
            dimensions: self.supports_dimensions().then_some(self.dimension),
        };

        let response_text = send_with_retry(self.retry, url.as_str(), || {
            self.client
                .post(url.clone())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
        })
        .await?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| Embedding::new(data.embedding))
            .ok_or(EmbeddingError::NoEmbedding)?;

        debug!(
            "Generated embedding with {} dimensions",
            embedding.dimension()
        );
        Ok(embedding)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = self.endpoint(&format!("models/{}", self.model))?;
        debug!("Checking OpenAI model availability at {}", url);

        send_with_retry(self.retry, url.as_str(), || {
            self.client
                .get(url.clone())
                .bearer_auth(&self.api_key)
                .send()
        })
        .await?;

        info!(
            "Health check passed for OpenAI at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }
}

pub(super) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::Config(format!("Failed to build HTTP client: {e}")))
}

/// `Url::join` drops the last path segment unless the base ends in `/`
pub(super) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
