#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::{DistanceMetric, DocumentBackend, NewDocument, RawDocumentRow};
use crate::embeddings::Embedding;
use crate::store::StoreError;

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    content: String,
    metadata: serde_json::Value,
    embedding: Vec<f32>,
}

/// Process-local backend with the same ranking rules as the PostgreSQL one.
/// Nothing survives the process; meant for tests and local experiments.
#[derive(Debug)]
pub struct MemoryBackend {
    dimension: usize,
    metric: DistanceMetric,
    rows: RwLock<Vec<StoredRow>>,
    next_id: AtomicI64,
    closed: AtomicBool,
}

impl MemoryBackend {
    #[inline]
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Store a row without any validation, the way a foreign writer or a
    /// damaged table might. Returns the generated id.
    #[inline]
    pub async fn insert_unchecked(
        &self,
        content: &str,
        metadata: serde_json::Value,
        embedding: Vec<f32>,
    ) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.write().await.push(StoredRow {
            id,
            content: content.to_string(),
            metadata,
            embedding,
        });
        id
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn insert(&self, document: NewDocument) -> Result<i64, StoreError> {
        self.ensure_open()?;

        // Same rule the vector(D) column enforces
        if document.embedding.dimension() != self.dimension {
            return Err(StoreError::Persistence(format!(
                "expected {} dimensions, not {}",
                self.dimension,
                document.embedding.dimension()
            )));
        }

        let mut rows = self.rows.write().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        rows.push(StoredRow {
            id,
            content: document.content,
            metadata: serde_json::Value::Object(document.metadata),
            embedding: document.embedding.into_inner(),
        });
        Ok(id)
    }

    async fn nearest(
        &self,
        query: &Embedding,
        limit: NonZeroU32,
    ) -> Result<Vec<RawDocumentRow>, StoreError> {
        self.ensure_open()?;

        let rows = self.rows.read().await;
        let mut ranked: Vec<RawDocumentRow> = rows
            .iter()
            .map(|row| RawDocumentRow {
                id: row.id,
                content: row.content.clone(),
                metadata: row.metadata.clone(),
                embedding: row.embedding.clone(),
                distance: self.metric.distance(&row.embedding, query.as_slice()),
            })
            .collect();
        drop(rows);

        // NaN (cosine against a zero vector) sorts last; ties keep insertion order
        ranked.sort_by(|a, b| match (a.distance.is_nan(), b.distance.is_nan()) {
            (false, false) => a.distance.total_cmp(&b.distance),
            (a_nan, b_nan) => a_nan.cmp(&b_nan),
        });
        ranked.truncate(limit.get() as usize);

        debug!("Ranked {} in-memory rows", ranked.len());
        Ok(ranked)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.rows.read().await.len() as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
