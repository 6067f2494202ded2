//! Semantic document store
//!
//! Documents are free text plus an opaque JSON object of metadata. Each one is
//! embedded once when it is added; searches embed the query and rank stored
//! documents by vector distance.


use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{DocumentBackend, NewDocument, PostgresBackend, RawDocumentRow};
use crate::embeddings::{build_provider, Embedding, EmbeddingError, EmbeddingProvider};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to document store: {0}")]
    Connection(String),

    #[error("Document store capability missing: {0}")]
    Capability(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to serialize metadata: {0}")]
    Serialization(String),

    #[error("Failed to persist document: {0}")]
    Persistence(String),

    #[error("Document store is closed")]
    Closed,
}

/// A stored row that could not be turned into a [`Document`]. These are
/// logged and skipped during search.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("row {id}: {reason}")]
    Row { id: i64, reason: String },

    #[error("unreadable column {0}")]
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: i64,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub document: Document,
    /// Distance under the configured metric; smaller is closer
    pub distance: f64,
}

/// Embedding provider plus a document backend of the same dimension
pub struct DocumentStore {
    provider: Arc<dyn EmbeddingProvider>,
    backend: Arc<dyn DocumentBackend>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("dimension", &self.backend.dimension())
            .field("metric", &self.backend.metric())
            .finish()
    }
}

impl DocumentStore {
    /// Build the configured provider, connect to PostgreSQL and bootstrap the
    /// schema. Safe to run repeatedly against the same database.
    #[inline]
    pub async fn initialize(config: &Config) -> Result<Self, StoreError> {
        config
            .database
            .validate()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        config
            .embedding
            .validate()
            .map_err(|e| StoreError::Capability(e.to_string()))?;

        let provider = build_provider(&config.embedding)?;
        let backend = PostgresBackend::connect(&config.database, provider.dimension()).await?;
        let backend: Arc<dyn DocumentBackend> = Arc::new(backend);

        match Self::new(provider, Arc::clone(&backend)) {
            Ok(store) => {
                info!("Document store initialized");
                Ok(store)
            }
            Err(e) => {
                backend.close().await;
                Err(e)
            }
        }
    }

    /// Assemble a store from explicit parts. Provider and backend must agree
    /// on the dimension.
    #[inline]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        backend: Arc<dyn DocumentBackend>,
    ) -> Result<Self, StoreError> {
        if provider.dimension() != backend.dimension() {
            return Err(StoreError::Capability(format!(
                "Provider {} produces {} dimensions but the store holds {}",
                provider.name(),
                provider.dimension(),
                backend.dimension()
            )));
        }
        Ok(Self { provider, backend })
    }

    #[inline]
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embed `content` and store it with `metadata`, which must serialize to a
    /// JSON object. Nothing is written unless every step succeeds.
    pub async fn add<M>(&self, content: &str, metadata: &M) -> Result<(), StoreError>
    where
        M: Serialize + ?Sized,
    {
        self.ensure_open()?;

        let embedding = self.embed(content).await?;

        let metadata = match serde_json::to_value(metadata) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(other) => {
                return Err(StoreError::Serialization(format!(
                    "metadata must be a JSON object, got {}",
                    json_kind(&other)
                )));
            }
            Err(e) => return Err(StoreError::Serialization(e.to_string())),
        };

        let id = self
            .backend
            .insert(NewDocument {
                content: content.to_string(),
                metadata,
                embedding,
            })
            .await?;

        debug!("Stored document {}", id);
        Ok(())
    }

    /// Up to `limit` documents nearest to `query`, closest first
    pub async fn search(
        &self,
        query: &str,
        limit: NonZeroU32,
    ) -> Result<Vec<SearchResult>, StoreError> {
        self.ensure_open()?;

        let embedding = self.embed(query).await?;
        let rows = self.backend.nearest(&embedding, limit).await?;

        let dimension = self.dimension();
        let results: Vec<SearchResult> = rows
            .into_iter()
            .filter_map(|row| match into_search_result(row, dimension) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Skipping search result: {}", e);
                    None
                }
            })
            .collect();

        debug!("Search returned {} documents", results.len());
        Ok(results)
    }

    #[inline]
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        self.backend.count().await
    }

    /// Release the backend. Later calls, including another `close`, are no-ops
    /// for the backend and every operation returns [`StoreError::Closed`].
    #[inline]
    pub async fn close(&self) {
        self.backend.close().await;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }

    async fn embed(&self, text: &str) -> Result<Embedding, StoreError> {
        let embedding = self.provider.embed(text).await?;
        embedding.check_dimension(self.dimension())?;
        Ok(embedding)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.backend.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn into_search_result(row: RawDocumentRow, dimension: usize) -> Result<SearchResult, DecodeError> {
    let RawDocumentRow {
        id,
        content,
        metadata,
        embedding,
        distance,
    } = row;

    let metadata = match metadata {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(DecodeError::Row {
                id,
                reason: format!("metadata is {}, not an object", json_kind(&other)),
            });
        }
    };

    if embedding.len() != dimension {
        return Err(DecodeError::Row {
            id,
            reason: format!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                dimension
            ),
        });
    }

    Ok(SearchResult {
        document: Document {
            id,
            content,
            metadata,
            embedding: Embedding::new(embedding),
        },
        distance,
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
