#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! PostgreSQL + pgvector integration tests
//!
//! Set TEST_DATABASE_URL to a database where the `vector` extension can be
//! created, then run with `--ignored`. Each test works in its own table and
//! drops it afterwards.

use agentic_chat_mcp::config::DatabaseConfig;
use agentic_chat_mcp::database::PostgresBackend;
use agentic_chat_mcp::embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use agentic_chat_mcp::store::{DocumentStore, StoreError};
use async_trait::async_trait;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Letter-frequency embedder over three buckets, deterministic and offline
struct BucketEmbedder;

#[async_trait]
impl EmbeddingProvider for BucketEmbedder {
    fn name(&self) -> &str {
        "bucket"
    }

    fn model(&self) -> &str {
        "bucket-v1"
    }

    fn dimension(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut buckets = [0.0_f32; 3];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            let index = match c.to_ascii_lowercase() {
                'a'..='h' => 0,
                'i'..='q' => 1,
                _ => 2,
            };
            buckets[index] += 1.0;
        }
        Ok(Embedding::new(buckets.to_vec()))
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

fn database_config() -> DatabaseConfig {
    static NEXT_TABLE: AtomicU32 = AtomicU32::new(0);

    DatabaseConfig {
        url: Some(std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set")),
        table_name: format!(
            "acm_test_{}_{}",
            std::process::id(),
            NEXT_TABLE.fetch_add(1, Ordering::Relaxed)
        ),
        max_connections: 2,
        ..DatabaseConfig::default()
    }
}

async fn drop_table(backend: &PostgresBackend) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", backend.table_name()))
        .execute(backend.pool())
        .await
        .expect("drop test table");
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn bootstrap_is_idempotent() {
    let config = database_config();

    let first = PostgresBackend::connect(&config, 3)
        .await
        .expect("first bootstrap");
    let second = PostgresBackend::connect(&config, 3)
        .await
        .expect("second bootstrap against the same table");

    let store = DocumentStore::new(Arc::new(BucketEmbedder), Arc::new(second.clone()))
        .expect("dimensions agree");
    assert_eq!(store.count().await.expect("count"), 0);

    drop_table(&first).await;
    store.close().await;
    first.pool().close().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn documents_round_trip_through_postgres() {
    let config = database_config();
    let backend = PostgresBackend::connect(&config, 3)
        .await
        .expect("bootstrap");
    let store = DocumentStore::new(Arc::new(BucketEmbedder), Arc::new(backend.clone()))
        .expect("dimensions agree");

    store
        .add("abcabc", &json!({"kind": "early letters", "tags": ["a", "b"]}))
        .await
        .expect("add first");
    store
        .add("xyzxyz", &json!({"kind": "late letters"}))
        .await
        .expect("add second");
    store
        .add("mnopmnop", &json!({}))
        .await
        .expect("add third");
    assert_eq!(store.count().await.expect("count"), 3);

    let results = store
        .search("abc", NonZeroU32::new(2).expect("non-zero"))
        .await
        .expect("search");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document.content, "abcabc");
    assert_eq!(results[0].document.metadata["kind"], "early letters");
    assert_eq!(results[0].document.metadata["tags"], json!(["a", "b"]));
    assert_eq!(results[0].document.embedding.dimension(), 3);
    assert!(results[0].distance <= results[1].distance);

    drop_table(&backend).await;
    store.close().await;
    assert!(matches!(store.count().await, Err(StoreError::Closed)));
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn existing_table_with_other_dimension_is_refused() {
    let config = database_config();
    let backend = PostgresBackend::connect(&config, 3)
        .await
        .expect("bootstrap");

    let mismatch = PostgresBackend::connect(&config, 4).await;
    assert!(
        matches!(mismatch, Err(StoreError::Capability(_))),
        "{mismatch:?}"
    );

    drop_table(&backend).await;
    backend.pool().close().await;
}
