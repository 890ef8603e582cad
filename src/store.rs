//! SQLite-backed chunk store with cosine similarity search.
//!
//! Chunks are persisted together with their embedding vectors (little-endian
//! f32 BLOBs) and metadata. Search embeds the query with the configured
//! embedding model and ranks every stored chunk by cosine similarity —
//! collection sizes here are small enough that a brute-force scan is the
//! simplest correct index.
//!
//! The schema is created on connect, so opening the store is idempotent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::llm::EmbeddingModel;
use crate::models::{Chunk, ScoredChunk};

/// Capability interface the orchestrator retrieves through.
///
/// Results come back ordered by descending relevance; callers must not
/// re-sort them.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;
}

/// Persistent chunk + embedding store.
pub struct ChunkStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingModel>,
}

impl ChunkStore {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub async fn connect(path: &Path, embedder: Arc<dyn EmbeddingModel>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                page INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                hash TEXT NOT NULL,
                model TEXT NOT NULL,
                embedding BLOB NOT NULL,
                ingested_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
            .execute(&pool)
            .await?;

        Ok(Self { pool, embedder })
    }

    /// Number of stored chunks.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Map of stored chunk id → content hash, used for dedup by id and
    /// staleness detection during ingestion.
    pub async fn existing_hashes(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT id, hash FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("hash")))
            .collect())
    }

    /// Insert or refresh chunks with their embedding vectors.
    pub async fn upsert_chunks(&self, chunks: &[(Chunk, Vec<f32>)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let model = self.embedder.model_name().to_string();

        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source, page, chunk_index, content, hash, model, embedding, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    hash = excluded.hash,
                    model = excluded.model,
                    embedding = excluded.embedding,
                    ingested_at = excluded.ingested_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source)
            .bind(chunk.page)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.hash)
            .bind(&model)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Embed chunk contents with the configured model and upsert them.
    pub async fn embed_and_upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.embedder.embed(&chunk.content).await?;
            rows.push((chunk.clone(), vector));
        }
        self.upsert_chunks(&rows).await
    }

    /// Delete every stored chunk. Used by the rebuild flow.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SimilaritySearch for ChunkStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed(query).await?;

        let rows = sqlx::query(
            "SELECT id, source, page, chunk_index, content, hash, embedding FROM chunks",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                ScoredChunk {
                    chunk: Chunk {
                        id: row.get("id"),
                        source: row.get("source"),
                        page: row.get("page"),
                        chunk_index: row.get("chunk_index"),
                        content: row.get("content"),
                        hash: row.get("hash"),
                    },
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed-test-embedder"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }
    }

    fn chunk(id: &str, content: &str) -> Chunk {
        let parts: Vec<&str> = id.split(':').collect();
        Chunk {
            id: id.to_string(),
            source: parts[0].to_string(),
            page: parts[1].parse().unwrap(),
            chunk_index: parts[2].parse().unwrap(),
            content: content.to_string(),
            hash: format!("hash-{}", content.len()),
        }
    }

    async fn open_store(dir: &TempDir, query_vector: Vec<f32>) -> ChunkStore {
        let path = dir.path().join("test.sqlite");
        ChunkStore::connect(
            &path,
            Arc::new(FixedEmbedder {
                vector: query_vector,
            }),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_bounds() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, vec![1.0, 0.0]).await;

        let rows = vec![
            (chunk("lei.pdf:0:0", "primeiro"), vec![1.0, 0.0]),
            (chunk("lei.pdf:0:1", "segundo"), vec![0.0, 1.0]),
        ];

        store.upsert_chunks(&rows).await.unwrap();
        store.upsert_chunks(&rows).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let hashes = store.existing_hashes().await.unwrap();
        assert!(hashes.contains_key("lei.pdf:0:0"));
        assert!(hashes.contains_key("lei.pdf:0:1"));
    }

    #[tokio::test]
    async fn upsert_refreshes_content_in_place() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, vec![1.0, 0.0]).await;

        store
            .upsert_chunks(&[(chunk("lei.pdf:0:0", "velho"), vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert_chunks(&[(chunk("lei.pdf:0:0", "novo conteúdo"), vec![0.5, 0.5])])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.similarity_search("q", 1).await.unwrap();
        assert_eq!(hits[0].chunk.content, "novo conteúdo");
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_truncates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, vec![1.0, 0.0]).await;

        store
            .upsert_chunks(&[
                (chunk("lei.pdf:0:0", "ortogonal"), vec![0.0, 1.0]),
                (chunk("lei.pdf:0:1", "exato"), vec![1.0, 0.0]),
                (chunk("lei.pdf:1:0", "próximo"), vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let hits = store.similarity_search("consulta", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.content, "exato");
        assert_eq!(hits[1].chunk.content, "próximo");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, vec![1.0]).await;

        store
            .upsert_chunks(&[(chunk("lei.pdf:0:0", "algo"), vec![1.0])])
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
