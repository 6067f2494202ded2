
use async_trait::async_trait;
use futures::TryStreamExt;
use pgvector::Vector;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DistanceMetric, DocumentBackend, NewDocument, RawDocumentRow};
use crate::config::settings::{is_plain_identifier, redact_url};
use crate::config::DatabaseConfig;
use crate::embeddings::Embedding;
use crate::store::{DecodeError, StoreError};

/// Advisory lock key serializing concurrent schema bootstraps
const SCHEMA_LOCK_KEY: i64 = 0x6167_6e74_6d63_70;

/// pgvector refuses HNSW indexes above this dimension
const MAX_INDEXED_DIMENSION: usize = 2000;

/// PostgreSQL + pgvector document table
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    table_name: String,
    dimension: usize,
    metric: DistanceMetric,
}

impl PostgresBackend {
    /// Connect and make sure the extension, table and index exist.
    ///
    /// The pool is closed again if anything after the connection fails.
    #[inline]
    pub async fn connect(config: &DatabaseConfig, dimension: usize) -> Result<Self, StoreError> {
        if !is_plain_identifier(&config.table_name) {
            return Err(StoreError::Connection(format!(
                "Invalid table name: {}",
                config.table_name
            )));
        }

        let url = config
            .url()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let options: PgConnectOptions = url.parse().map_err(|e| {
            StoreError::Connection(format!("Invalid database URL {}: {}", redact_url(url), e))
        })?;

        debug!("Connecting to PostgreSQL at {}", redact_url(url));

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to database: {}", e)))?;

        let backend = Self {
            pool,
            table_name: config.table_name.clone(),
            dimension,
            metric: config.distance_metric,
        };

        if let Err(e) = backend.bootstrap(config.create_index).await {
            backend.pool.close().await;
            return Err(e);
        }

        info!(
            "Document table '{}' ready ({} dimensions, {} distance)",
            backend.table_name, backend.dimension, backend.metric
        );
        Ok(backend)
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Idempotent schema setup, serialized across processes by an advisory lock
    async fn bootstrap(&self, create_index: bool) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to start transaction: {}", e)))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to take schema lock: {}", e)))?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::Capability(format!("Failed to enable pgvector extension: {}", e))
            })?;

        let create_table = create_table_sql(&self.table_name, self.dimension);
        sqlx::query(&create_table)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::Capability(format!(
                    "Failed to create table {}: {}",
                    self.table_name, e
                ))
            })?;

        let column: Option<(String, i32)> = sqlx::query_as(
            r#"
            SELECT format_type(a.atttypid, a.atttypmod), a.atttypmod
            FROM pg_attribute a
            WHERE a.attrelid = to_regclass($1)
              AND a.attname = 'embedding'
              AND NOT a.attisdropped
            "#,
        )
        .bind(&self.table_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Capability(format!("Failed to inspect table schema: {}", e)))?;

        check_embedding_column(column, self.dimension)?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Capability(format!("Failed to commit schema: {}", e)))?;

        if create_index {
            self.create_vector_index().await;
        }

        debug!("Schema bootstrap completed for table {}", self.table_name);
        Ok(())
    }

    /// HNSW index on the embedding column, with the operator class of the
    /// configured metric. Queries still work without it, so failures are
    /// only logged.
    async fn create_vector_index(&self) {
        if self.dimension > MAX_INDEXED_DIMENSION {
            warn!(
                "Skipping HNSW index: {} dimensions exceeds the {} pgvector supports",
                self.dimension, MAX_INDEXED_DIMENSION
            );
            return;
        }

        let sql = create_index_sql(&self.table_name, self.metric);
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => debug!("Vector index ready on {}", self.table_name),
            Err(e) => warn!(
                "Failed to create vector index on {}: {}",
                self.table_name, e
            ),
        }
    }
}

#[async_trait]
impl DocumentBackend for PostgresBackend {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn insert(&self, document: NewDocument) -> Result<i64, StoreError> {
        let NewDocument {
            content,
            metadata,
            embedding,
        } = document;

        // Dropping the transaction before commit rolls it back
        let mut tx = self.pool.begin().await.map_err(persistence_error)?;

        let sql = format!(
            "INSERT INTO {} (content, metadata, embedding) VALUES ($1, $2, $3) RETURNING id",
            self.table_name
        );
        let id: i64 = sqlx::query_scalar(&sql)
            .bind(content)
            .bind(Json(metadata))
            .bind(Vector::from(embedding))
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence_error)?;

        tx.commit().await.map_err(persistence_error)?;

        Ok(id)
    }

    async fn nearest(
        &self,
        query: &Embedding,
        limit: NonZeroU32,
    ) -> Result<Vec<RawDocumentRow>, StoreError> {
        let sql = nearest_sql(&self.table_name, self.metric);

        let mut rows = sqlx::query(&sql)
            .bind(Vector::from(query.clone()))
            .bind(i64::from(limit.get()))
            .fetch(&self.pool);

        let mut results = Vec::new();
        while let Some(row) = rows.try_next().await.map_err(persistence_error)? {
            match decode_row(&row) {
                Ok(decoded) => results.push(decoded),
                Err(e) => warn!("Skipping search result: {}", e),
            }
        }

        debug!("Read {} rows from {}", results.len(), self.table_name);
        Ok(results)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table_name);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(persistence_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            info!("Closing database connection pool");
            self.pool.close().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn create_table_sql(table_name: &str, dimension: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table_name} (
            id BIGSERIAL PRIMARY KEY,
            content TEXT NOT NULL,
            metadata JSONB NOT NULL,
            embedding vector({dimension}) NOT NULL
        )"
    )
}

fn create_index_sql(table_name: &str, metric: DistanceMetric) -> String {
    let ops = metric.index_ops();
    format!(
        "CREATE INDEX IF NOT EXISTS {table_name}_embedding_{metric}_idx \
         ON {table_name} USING hnsw (embedding {ops})"
    )
}

fn nearest_sql(table_name: &str, metric: DistanceMetric) -> String {
    let op = metric.operator();
    format!(
        "SELECT id, content, metadata, embedding, embedding {op} $1 AS distance \
         FROM {table_name} ORDER BY embedding {op} $1 LIMIT $2"
    )
}

/// An existing table must already hold vectors of the configured dimension;
/// it is never altered.
fn check_embedding_column(column: Option<(String, i32)>, dimension: usize) -> Result<(), StoreError> {
    let (type_name, typmod) = column.ok_or_else(|| {
        StoreError::Capability("Table has no embedding column".to_string())
    })?;

    if !type_name.starts_with("vector") {
        return Err(StoreError::Capability(format!(
            "Embedding column has type {}, expected vector({})",
            type_name, dimension
        )));
    }

    if usize::try_from(typmod).ok() != Some(dimension) {
        return Err(StoreError::Capability(format!(
            "Embedding column is {}, configured dimension is {}",
            type_name, dimension
        )));
    }

    Ok(())
}

fn decode_row(row: &PgRow) -> Result<RawDocumentRow, DecodeError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| DecodeError::Column(format!("id: {}", e)))?;
    let column_error = |column: &str, e: sqlx::Error| DecodeError::Row {
        id,
        reason: format!("{}: {}", column, e),
    };

    let content: String = row
        .try_get("content")
        .map_err(|e| column_error("content", e))?;
    let metadata: serde_json::Value = row
        .try_get("metadata")
        .map_err(|e| column_error("metadata", e))?;
    let embedding: Vector = row
        .try_get("embedding")
        .map_err(|e| column_error("embedding", e))?;
    let distance: f64 = row
        .try_get("distance")
        .map_err(|e| column_error("distance", e))?;

    Ok(RawDocumentRow {
        id,
        content,
        metadata,
        embedding: embedding.to_vec(),
        distance,
    })
}

fn persistence_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolClosed => StoreError::Closed,
        other => StoreError::Persistence(other.to_string()),
    }
}
