//! Persisted semantic index: embedding vectors over a named collection.
//!
//! Vectors live in SQLite next to their chunks, so the collection
//! survives restarts and indexing/querying can run as separate
//! processes. Staleness is tracked per chunk by content hash —
//! re-indexing an identical chunk set is a no-op.
//!
//! Similarity search embeds the query with the same provider used at
//! index time and ranks by cosine similarity computed in process.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding::{self, EmbeddingProvider};
use crate::models::Chunk;

/// Handle on one named collection of embedded chunks.
pub struct SemanticIndex {
    pool: SqlitePool,
    collection: String,
}

/// Outcome of an embedding pass.
#[derive(Debug, Default)]
pub struct EmbedStats {
    pub total: usize,
    pub embedded: u64,
    pub failed: u64,
}

struct PendingChunk {
    chunk_id: String,
    content: String,
    hash: String,
}

impl SemanticIndex {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed the query and return the `k` most similar chunks with
    /// their cosine similarity scores, descending. Ties break on chunk
    /// id so output is deterministic.
    pub async fn search(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Chunk, f64)>> {
        let query_vec = provider.embed_query(query).await?;

        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.embedding, c.content, c.metadata_json
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.collection = ?
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(Chunk, f64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = embedding::blob_to_vec(&blob);
                let similarity = embedding::cosine_similarity(&query_vec, &vector) as f64;
                let metadata_json: String = row.get("metadata_json");
                let chunk = Chunk {
                    id: row.get("chunk_id"),
                    content: row.get("content"),
                    metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                };
                (chunk, similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.id.cmp(&b.0.id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Embed chunks that have no vector yet or whose content changed
    /// since their vector was computed.
    pub async fn embed_pending(
        &self,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
        limit: Option<usize>,
    ) -> Result<EmbedStats> {
        let pending = self.find_pending(provider.model_name(), limit).await?;
        let mut stats = EmbedStats {
            total: pending.len(),
            ..Default::default()
        };

        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();

            match provider.embed(&texts).await {
                Ok(vectors) => {
                    for (item, vector) in batch.iter().zip(vectors.iter()) {
                        let blob = embedding::vec_to_blob(vector);
                        self.upsert_embedding(
                            &item.chunk_id,
                            provider.model_name(),
                            provider.dims(),
                            &item.hash,
                            &blob,
                        )
                        .await?;
                        stats.embedded += 1;
                    }
                }
                Err(e) => {
                    eprintln!("Warning: embedding batch failed: {}", e);
                    stats.failed += batch.len() as u64;
                }
            }
        }

        Ok(stats)
    }

    /// Delete every vector in the collection and regenerate from
    /// scratch. Useful when switching embedding models or dims.
    pub async fn rebuild(
        &self,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<EmbedStats> {
        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE collection = ?)",
        )
        .bind(&self.collection)
        .execute(&self.pool)
        .await?;

        self.embed_pending(provider, batch_size, None).await
    }

    /// Count of chunks needing (re)embedding for the given model.
    pub async fn pending_count(&self, model: &str) -> Result<usize> {
        Ok(self.find_pending(model, None).await?.len())
    }

    async fn find_pending(&self, model: &str, limit: Option<usize>) -> Result<Vec<PendingChunk>> {
        let limit_val = limit.unwrap_or(usize::MAX) as i64;

        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.content, c.hash
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
            WHERE c.collection = ? AND (e.chunk_id IS NULL OR e.hash != c.hash)
            ORDER BY c.document_id, c.chunk_index
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(&self.collection)
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                chunk_id: row.get("chunk_id"),
                content: row.get("content"),
                hash: row.get("hash"),
            })
            .collect())
    }

    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        model: &str,
        dims: usize,
        hash: &str,
        blob: &[u8],
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                created_at = excluded.created_at
            "#,
        )
        .bind(chunk_id)
        .bind(model)
        .bind(dims as i64)
        .bind(hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, collection, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                collection = excluded.collection,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(&self.collection)
        .bind(blob)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
