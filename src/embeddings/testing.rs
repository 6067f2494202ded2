//! Deterministic providers for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Embedding, EmbeddingError, EmbeddingProvider};

const ANIMAL_WORDS: &[&str] = &[
    "cat", "cats", "feline", "felines", "animal", "animals", "mammal", "mammals", "dog", "dogs",
];
const FINANCE_WORDS: &[&str] = &[
    "stock", "stocks", "market", "markets", "finance", "financial", "fluctuate", "price",
    "prices",
];

/// Three axes: animal words, finance words, everything else (plus one so the
/// vector is never zero). Normalized to unit length.
#[derive(Debug, Default)]
pub(crate) struct KeywordEmbedder {
    calls: AtomicUsize,
}

pub(crate) const KEYWORD_DIMENSION: usize = 3;

impl KeywordEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector(text: &str) -> Vec<f32> {
        let mut axes = [0.0_f32, 0.0, 1.0];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            if ANIMAL_WORDS.contains(&word.as_str()) {
                axes[0] += 1.0;
            } else if FINANCE_WORDS.contains(&word.as_str()) {
                axes[1] += 1.0;
            } else {
                axes[2] += 1.0;
            }
        }
        let norm = axes.iter().map(|v| v * v).sum::<f32>().sqrt();
        axes.iter().map(|v| v / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    fn model(&self) -> &str {
        "keyword-axes"
    }

    fn dimension(&self) -> usize {
        KEYWORD_DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Embedding::new(Self::vector(text)))
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

/// What a [`BrokenProvider`] hands back
#[derive(Debug, Clone, Copy)]
pub(crate) enum Breakage {
    /// Response carried no vectors at all
    NoVectors,
    /// One vector with zero components
    EmptyVector,
    /// A vector one component short
    ShortVector,
    /// HTTP 500 from the provider
    ServerError,
}

/// Claims `dimension` but never produces a usable vector
#[derive(Debug)]
pub(crate) struct BrokenProvider {
    pub(crate) dimension: usize,
    pub(crate) breakage: Breakage,
}

#[async_trait]
impl EmbeddingProvider for BrokenProvider {
    fn name(&self) -> &str {
        "broken"
    }

    fn model(&self) -> &str {
        "broken"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Embedding, EmbeddingError> {
        match self.breakage {
            Breakage::NoVectors => Err(EmbeddingError::NoEmbedding),
            Breakage::EmptyVector => Ok(Embedding::new(Vec::new())),
            Breakage::ShortVector => Ok(Embedding::new(vec![0.5; self.dimension - 1])),
            Breakage::ServerError => Err(EmbeddingError::Provider {
                status: 500,
                message: "internal error".to_string(),
            }),
        }
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Err(EmbeddingError::Request("unreachable".to_string()))
    }
}
