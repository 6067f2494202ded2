#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::openai::{build_http_client, with_trailing_slash};
use super::{Embedding, EmbeddingError, EmbeddingProvider, RetryPolicy, send_with_retry};
use crate::config::EmbeddingConfig;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let base_url = config
            .base_url()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        Ok(Self {
            base_url: with_trailing_slash(base_url),
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

    /// List all models the server has pulled
    #[inline]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, EmbeddingError> {
        let url = self.endpoint("api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text =
            send_with_retry(self.retry, url.as_str(), || self.client.get(url.clone()).send())
                .await?;

        let models_response: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    fn endpoint(&self, path: &str) -> Result<Url, EmbeddingError> {
        self.base_url
            .join(path)
            .map_err(|e| EmbeddingError::Config(format!("Failed to build URL for {path}: {e}")))
    }

    /// `nomic-embed-text` and `nomic-embed-text:latest` name the same model
    fn matches_model(&self, name: &str) -> bool {
        let strip = |n: &str| n.strip_suffix(":latest").unwrap_or(n).to_string();
        strip(name) == strip(&self.model)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        debug!("Generating embedding for text (length: {})", text.len());

        let url = self.endpoint("api/embed")?;
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response_text = send_with_retry(self.retry, url.as_str(), || {
            self.client.post(url.clone()).json(&request).send()
        })
        .await?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        let embedding = response
            .embeddings
            .into_iter()
            .next()
            .map(Embedding::new)
            .ok_or(EmbeddingError::NoEmbedding)?;

        debug!(
            "Generated embedding with {} dimensions",
            embedding.dimension()
        );
        Ok(embedding)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().await?;

        if models.iter().any(|m| self.matches_model(&m.name)) {
            info!(
                "Health check passed for Ollama server at {} with model {}",
                self.base_url, self.model
            );
            Ok(())
        } else {
            let available: Vec<String> = models.into_iter().map(|m| m.name).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            Err(EmbeddingError::ModelUnavailable {
                model: self.model.clone(),
                available,
            })
        }
    }
}
