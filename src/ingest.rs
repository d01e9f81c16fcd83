//! Ingestion pipeline orchestration and chunk storage.
//!
//! Coordinates the offline batch flow: parse → chunk → store → embed.
//! All document and chunk writes for a run happen inside one
//! transaction, so a failed build never leaves a partially persisted
//! index. Embedding backfill runs after commit and is non-fatal —
//! `embed pending` resumes it.
//!
//! This module also owns [`load_chunks`], the single canonical chunk
//! sequence both the semantic and lexical indexes are built from.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::chunker;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::{Chunk, ParsedDocument};
use crate::parse;
use crate::semantic::SemanticIndex;

pub async fn run_ingest(config: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let mut documents = parse::scan_documents(config)?;
    if let Some(lim) = limit {
        documents.truncate(lim);
    }

    if dry_run {
        let estimated: usize = documents
            .iter()
            .map(|d| chunker::split_documents(std::slice::from_ref(d), &config.chunking).len())
            .sum();
        println!("ingest (dry-run)");
        println!("  documents found: {}", documents.len());
        println!("  estimated chunks: {}", estimated);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let collection = config.store.collection.as_str();

    let mut docs_upserted = 0u64;
    let mut docs_unchanged = 0u64;
    let mut chunks_written = 0u64;

    let mut tx = pool.begin().await?;

    // Batch semantics: documents that disappeared from the corpus are
    // dropped from the collection
    let sources: Vec<String> = documents.iter().map(document_source).collect();
    remove_missing_documents(&mut tx, collection, &sources).await?;

    for document in &documents {
        let source = document_source(document);
        let dedup_hash = compute_dedup_hash(document);

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT dedup_hash FROM documents WHERE collection = ? AND source = ?",
        )
        .bind(collection)
        .bind(&source)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.as_deref() == Some(dedup_hash.as_str()) {
            docs_unchanged += 1;
            continue;
        }

        let doc_id = upsert_document(&mut tx, collection, &source, document, &dedup_hash).await?;
        let chunks =
            chunker::split_documents(std::slice::from_ref(document), &config.chunking);
        replace_chunks(&mut tx, collection, &doc_id, &chunks).await?;

        docs_upserted += 1;
        chunks_written += chunks.len() as u64;
    }

    tx.commit().await?;

    println!("ingest");
    println!("  documents parsed: {}", documents.len());
    println!("  upserted: {} (unchanged: {})", docs_upserted, docs_unchanged);
    println!("  chunks written: {}", chunks_written);

    // Embedding backfill, resumable via `embed pending`
    if config.embedding.is_enabled() {
        match embed_after_ingest(config, &pool).await {
            Ok((embedded, failed)) => {
                println!("  embeddings written: {}", embedded);
                println!("  embeddings pending: {}", failed);
            }
            Err(e) => {
                eprintln!("Warning: embedding backfill failed: {}", e);
            }
        }
    }

    println!("ok");
    pool.close().await;
    Ok(())
}

async fn embed_after_ingest(config: &Config, pool: &SqlitePool) -> Result<(u64, u64)> {
    let provider = embedding::create_provider(&config.embedding)?;
    let index = SemanticIndex::new(pool.clone(), config.store.collection.clone());
    let stats = index
        .embed_pending(provider.as_ref(), config.embedding.batch_size, None)
        .await?;
    Ok((stats.embedded, stats.failed))
}

fn document_source(document: &ParsedDocument) -> String {
    document
        .metadata
        .get("source")
        .cloned()
        .unwrap_or_default()
}

fn compute_dedup_hash(document: &ParsedDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.text.as_bytes());
    for (key, value) in &document.metadata {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

async fn remove_missing_documents(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    collection: &str,
    sources: &[String],
) -> Result<()> {
    let rows = sqlx::query("SELECT id, source FROM documents WHERE collection = ?")
        .bind(collection)
        .fetch_all(&mut **tx)
        .await?;

    for row in rows {
        let source: String = row.get("source");
        if sources.iter().any(|s| s == &source) {
            continue;
        }
        let doc_id: String = row.get("id");
        delete_document_chunks(tx, &doc_id).await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(&doc_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn upsert_document(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    collection: &str,
    source: &str,
    document: &ParsedDocument,
    dedup_hash: &str,
) -> Result<String> {
    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE collection = ? AND source = ?")
            .bind(collection)
            .bind(source)
            .fetch_optional(&mut **tx)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let metadata_json =
        serde_json::to_string(&document.metadata).unwrap_or_else(|_| "{}".to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, collection, source, text, metadata_json, dedup_hash, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(collection, source) DO UPDATE SET
            text = excluded.text,
            metadata_json = excluded.metadata_json,
            dedup_hash = excluded.dedup_hash,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(&doc_id)
    .bind(collection)
    .bind(source)
    .bind(&document.text)
    .bind(&metadata_json)
    .bind(dedup_hash)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(doc_id)
}

async fn delete_document_chunks(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_id: &str,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn replace_chunks(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    collection: &str,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<()> {
    delete_document_chunks(tx, document_id).await?;

    for (index, chunk) in chunks.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, collection, document_id, chunk_index, content, metadata_json, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(collection)
        .bind(document_id)
        .bind(index as i64)
        .bind(&chunk.content)
        .bind(chunk.metadata_json())
        .bind(chunk.content_hash())
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Load the canonical chunk sequence for a collection.
///
/// Ordered by (document source, chunk index) so every caller — the
/// lexical index builder, the stats command, tests — observes the same
/// sequence the semantic store was built from.
pub async fn load_chunks(pool: &SqlitePool, collection: &str) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.content, c.metadata_json
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE c.collection = ?
        ORDER BY d.source ASC, c.chunk_index ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;

    let chunks = rows
        .iter()
        .map(|row| {
            let metadata_json: String = row.get("metadata_json");
            Chunk {
                id: row.get("id"),
                content: row.get("content"),
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            }
        })
        .collect();

    Ok(chunks)
}
