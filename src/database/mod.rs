// Database module
// Document backends: PostgreSQL + pgvector for real deployments, in-memory for tests

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

use crate::embeddings::Embedding;
use crate::store::StoreError;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

/// Distance used for ranking. Insert-time indexing and search-time ordering
/// always use the same metric.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance, pgvector `<->`
    #[default]
    L2,
    /// `1 - cosine similarity`, pgvector `<=>`
    Cosine,
}

impl DistanceMetric {
    /// pgvector operator for this metric
    #[inline]
    pub fn operator(self) -> &'static str {
        match self {
            Self::L2 => "<->",
            Self::Cosine => "<=>",
        }
    }

    /// pgvector operator class for an HNSW index on this metric
    #[inline]
    pub fn index_ops(self) -> &'static str {
        match self {
            Self::L2 => "vector_l2_ops",
            Self::Cosine => "vector_cosine_ops",
        }
    }

    /// Same formula pgvector applies, accumulated in f64.
    ///
    /// Cosine distance with a zero-length vector is NaN, as in pgvector.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
            Self::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (f64::from(*x), f64::from(*y));
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
            }
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2 => write!(f, "l2"),
            Self::Cosine => write!(f, "cosine"),
        }
    }
}

/// A row about to be inserted. The embedding is already dimension-checked.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub embedding: Embedding,
}

/// A search row as the backend read it, before dimension validation
#[derive(Debug, Clone)]
pub struct RawDocumentRow {
    pub id: i64,
    pub content: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
    pub distance: f64,
}

/// Persistence seam for the document store
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Dimension of the stored embedding column
    fn dimension(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    /// Insert one document atomically and return its generated id
    async fn insert(&self, document: NewDocument) -> Result<i64, StoreError>;

    /// Up to `limit` rows ordered nearest first.
    ///
    /// Rows the backend cannot decode are logged and skipped.
    async fn nearest(
        &self,
        query: &Embedding,
        limit: NonZeroU32,
    ) -> Result<Vec<RawDocumentRow>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Release backend resources. Safe to call more than once.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
