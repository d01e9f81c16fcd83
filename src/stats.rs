//! Store statistics overview.
//!
//! Quick summary of what's indexed: document counts, chunk counts, and
//! embedding coverage per collection. Used by `docqa stats` to confirm
//! that ingest and embedding runs did what they should.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct SourceStats {
    source: String,
    chunk_count: i64,
    embedded_count: i64,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let collection = &config.store.collection;

    let total_docs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&pool)
            .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
        .bind(collection)
        .fetch_one(&pool)
        .await?;

    let total_embedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE collection = ?")
            .bind(collection)
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.store.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docqa — Store Stats");
    println!("===================");
    println!();
    println!("  Store:       {}", config.store.path.display());
    println!("  Collection:  {}", collection);
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );

    let source_rows = sqlx::query(
        r#"
        SELECT
            d.source,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT cv.chunk_id) AS embedded_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        WHERE d.collection = ?
        GROUP BY d.source
        ORDER BY d.source ASC
        "#,
    )
    .bind(collection)
    .fetch_all(&pool)
    .await?;

    let source_stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<32} {:>8} {:>10}", "SOURCE", "CHUNKS", "EMBEDDED");
        println!("  {}", "-".repeat(52));
        for s in &source_stats {
            println!(
                "  {:<32} {:>8} {:>10}",
                s.source, s.chunk_count, s.embedded_count
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
