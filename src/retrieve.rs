//! Hybrid retrieval: fuse semantic and lexical search into one
//! deduplicated, weighted-ranked passage list.
//!
//! Semantic search runs once per expanded query (concurrently — the
//! index is read-only at query time), lexical search runs once on the
//! original query since BM25 lives on exact term overlap that
//! paraphrasing would dilute. Each channel's scores are min-max
//! normalized to [0, 1] before the weighted merge, and a chunk never
//! appears twice in the output.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};

use crate::config::{Config, ExpansionConfig, RetrievalConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::expand::QueryExpander;
use crate::ingest;
use crate::lexical::LexicalIndex;
use crate::llm::{self, ChatModel};
use crate::models::{Chunk, RetrievedPassage, Retriever};
use crate::semantic::SemanticIndex;

pub struct HybridRetriever<'a> {
    semantic: &'a SemanticIndex,
    provider: &'a dyn EmbeddingProvider,
    chat: &'a dyn ChatModel,
    lexical: &'a LexicalIndex,
    chunks: &'a [Chunk],
    retrieval: &'a RetrievalConfig,
    expansion: &'a ExpansionConfig,
}

impl<'a> HybridRetriever<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        semantic: &'a SemanticIndex,
        provider: &'a dyn EmbeddingProvider,
        chat: &'a dyn ChatModel,
        lexical: &'a LexicalIndex,
        chunks: &'a [Chunk],
        retrieval: &'a RetrievalConfig,
        expansion: &'a ExpansionConfig,
    ) -> Self {
        Self {
            semantic,
            provider,
            chat,
            lexical,
            chunks,
            retrieval,
            expansion,
        }
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>> {
        // Expansion is best effort; on model failure this degrades to
        // the original query alone
        let expander = QueryExpander::new(self.chat, self.expansion.count);
        let queries = expander.expand(query).await;

        // One semantic lookup per expansion, all in flight together
        let searches = queries
            .iter()
            .map(|q| self.semantic.search(self.provider, q, self.retrieval.semantic_k));
        let per_query = futures::future::try_join_all(searches).await?;

        // Union across expansions, keeping the best score per chunk
        let mut best: HashMap<String, (Chunk, f64)> = HashMap::new();
        for results in per_query {
            for (chunk, score) in results {
                match best.entry(chunk.id.clone()) {
                    Entry::Occupied(mut seen) => {
                        if score > seen.get().1 {
                            seen.get_mut().1 = score;
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert((chunk, score));
                    }
                }
            }
        }
        let mut semantic_candidates: Vec<(Chunk, f64)> = best.into_values().collect();
        semantic_candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.id.cmp(&b.0.id))
        });

        // Lexical search on the original query only
        let lexical_candidates: Vec<(Chunk, f64)> = self
            .lexical
            .search(query, self.retrieval.lexical_k)
            .into_iter()
            .map(|(ordinal, score)| (self.chunks[ordinal].clone(), score))
            .collect();

        Ok(fuse(
            semantic_candidates,
            lexical_candidates,
            self.retrieval.semantic_weight,
            self.retrieval.lexical_weight,
            self.retrieval.final_limit,
        ))
    }
}

/// Min-max normalize raw scores to [0, 1]. A single candidate, or a
/// list where every score is equal, normalizes to 1.0.
fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Weighted merge of the two candidate lists. Output is sorted by
/// combined score descending (ties by chunk id) and contains each
/// chunk identity at most once.
fn fuse(
    semantic: Vec<(Chunk, f64)>,
    lexical: Vec<(Chunk, f64)>,
    semantic_weight: f64,
    lexical_weight: f64,
    limit: usize,
) -> Vec<RetrievedPassage> {
    let semantic_norm = normalize_scores(
        &semantic.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
    );
    let lexical_norm = normalize_scores(
        &lexical.iter().map(|(_, s)| *s).collect::<Vec<_>>(),
    );

    let mut semantic_map: HashMap<String, f64> = HashMap::new();
    for ((chunk, _), norm) in semantic.iter().zip(semantic_norm.iter()) {
        semantic_map.insert(chunk.id.clone(), *norm);
    }
    let mut lexical_map: HashMap<String, f64> = HashMap::new();
    for ((chunk, _), norm) in lexical.iter().zip(lexical_norm.iter()) {
        lexical_map.insert(chunk.id.clone(), *norm);
    }

    // BTreeMap keyed by chunk id: dedup and a stable iteration order
    let mut candidates: BTreeMap<String, Chunk> = BTreeMap::new();
    for (chunk, _) in semantic.into_iter().chain(lexical.into_iter()) {
        candidates.entry(chunk.id.clone()).or_insert(chunk);
    }

    let mut passages: Vec<RetrievedPassage> = candidates
        .into_values()
        .map(|chunk| {
            let s = semantic_map.get(chunk.id.as_str()).copied().unwrap_or(0.0);
            let l = lexical_map.get(chunk.id.as_str()).copied().unwrap_or(0.0);
            let semantic_part = semantic_weight * s;
            let lexical_part = lexical_weight * l;
            let retriever = if lexical_part > semantic_part {
                Retriever::Lexical
            } else {
                Retriever::Semantic
            };
            RetrievedPassage {
                chunk,
                score: semantic_part + lexical_part,
                retriever,
            }
        })
        .collect();

    passages.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    passages.truncate(limit);
    passages
}

/// Run the `search` CLI command.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    match mode {
        "lexical" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use lexical, semantic, or hybrid.",
            mode
        ),
    }

    if (mode == "semantic" || mode == "hybrid") && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode
        );
    }

    let pool = db::connect(config).await?;
    let chunks = ingest::load_chunks(&pool, &config.store.collection).await?;
    if chunks.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let final_limit = limit.unwrap_or(config.retrieval.final_limit);

    let passages: Vec<RetrievedPassage> = match mode {
        "lexical" => {
            let index = LexicalIndex::build(&chunks);
            index
                .search(query, final_limit)
                .into_iter()
                .map(|(ordinal, score)| RetrievedPassage {
                    chunk: chunks[ordinal].clone(),
                    score,
                    retriever: Retriever::Lexical,
                })
                .collect()
        }
        "semantic" => {
            let provider = embedding::create_provider(&config.embedding)?;
            let index = SemanticIndex::new(pool.clone(), config.store.collection.clone());
            index
                .search(provider.as_ref(), query, final_limit)
                .await?
                .into_iter()
                .map(|(chunk, score)| RetrievedPassage {
                    chunk,
                    score,
                    retriever: Retriever::Semantic,
                })
                .collect()
        }
        _ => {
            let provider = embedding::create_provider(&config.embedding)?;
            let chat = llm::create_chat_model(&config.llm)?;
            let semantic = SemanticIndex::new(pool.clone(), config.store.collection.clone());
            let lexical = LexicalIndex::build(&chunks);
            let retriever = HybridRetriever::new(
                &semantic,
                provider.as_ref(),
                chat.as_ref(),
                &lexical,
                &chunks,
                &config.retrieval,
                &config.expansion,
            );
            let mut passages = retriever.retrieve(query).await?;
            passages.truncate(final_limit);
            passages
        }
    };

    if passages.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, passage) in passages.iter().enumerate() {
        let source = passage.chunk.source().unwrap_or("(unknown)");
        let heading = passage
            .chunk
            .header_path()
            .unwrap_or_else(|| "(no heading)".to_string());
        let excerpt: String = passage.chunk.content.chars().take(240).collect();

        println!(
            "{}. [{:.2}] {} / {} ({})",
            i + 1,
            passage.score,
            source,
            heading,
            passage.retriever
        );
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", passage.chunk.id);
        println!();
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::chunk_id;
    use anyhow::bail;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::BTreeMap as Meta;
    use std::hash::{Hash, Hasher};

    fn chunk(source: &str, index: i64, content: &str) -> Chunk {
        let mut metadata = Meta::new();
        metadata.insert("source".to_string(), source.to_string());
        Chunk::new(source, index, content.to_string(), metadata)
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let result = normalize_scores(&[5.0]);
        assert!((result[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let result = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((result[0] - 1.0).abs() < 1e-9);
        assert!((result[1] - 0.5).abs() < 1e-9);
        assert!((result[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        for score in normalize_scores(&[3.0, 3.0, 3.0]) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_normalize_always_in_unit_interval() {
        for score in normalize_scores(&[-5.0, 100.0, 42.0]) {
            assert!((0.0..=1.0).contains(&score), "out of range: {}", score);
        }
    }

    #[test]
    fn test_fuse_deduplicates() {
        let shared = chunk("a.md", 0, "shared passage");
        let semantic = vec![(shared.clone(), 0.9), (chunk("a.md", 1, "sem only"), 0.5)];
        let lexical = vec![(shared.clone(), 4.2), (chunk("a.md", 2, "lex only"), 2.0)];

        let fused = fuse(semantic, lexical, 0.5, 0.5, 10);
        assert_eq!(fused.len(), 3);
        let ids: std::collections::HashSet<&str> =
            fused.iter().map(|p| p.chunk.id.as_str()).collect();
        assert_eq!(ids.len(), fused.len(), "duplicate chunk in fused output");
    }

    #[test]
    fn test_fuse_shared_chunk_ranks_first() {
        let shared = chunk("a.md", 0, "shared passage");
        let semantic = vec![(shared.clone(), 0.9), (chunk("a.md", 1, "sem only"), 0.7)];
        let lexical = vec![(shared.clone(), 4.2), (chunk("a.md", 2, "lex only"), 3.0)];

        let fused = fuse(semantic, lexical, 0.5, 0.5, 10);
        assert_eq!(fused[0].chunk.id, shared.id);
    }

    #[test]
    fn test_fuse_zero_semantic_weight_keeps_lexical_order() {
        let semantic = vec![
            (chunk("a.md", 0, "one"), 0.99),
            (chunk("a.md", 1, "two"), 0.98),
        ];
        let lexical = vec![
            (chunk("a.md", 2, "three"), 10.0),
            (chunk("a.md", 3, "four"), 5.0),
            (chunk("a.md", 4, "five"), 1.0),
        ];

        let fused = fuse(semantic, lexical, 0.0, 1.0, 10);
        assert_eq!(fused[0].chunk.content, "three");
        assert_eq!(fused[0].retriever, Retriever::Lexical);
        assert_eq!(fused[1].chunk.content, "four");
    }

    #[test]
    fn test_fuse_zero_lexical_weight_keeps_semantic_order() {
        let semantic = vec![
            (chunk("a.md", 0, "one"), 0.9),
            (chunk("a.md", 1, "two"), 0.4),
        ];
        let lexical = vec![(chunk("a.md", 2, "three"), 10.0)];

        let fused = fuse(semantic, lexical, 1.0, 0.0, 10);
        assert_eq!(fused[0].chunk.content, "one");
        assert_eq!(fused[0].retriever, Retriever::Semantic);
    }

    #[test]
    fn test_fuse_respects_limit() {
        let semantic: Vec<(Chunk, f64)> = (0..6)
            .map(|i| (chunk("a.md", i, &format!("s{}", i)), 1.0 - i as f64 * 0.1))
            .collect();
        let fused = fuse(semantic, Vec::new(), 0.5, 0.5, 3);
        assert_eq!(fused.len(), 3);
    }

    // ============ End-to-end retrieval over an in-memory store ============

    /// Deterministic embedding stub: token counts hashed into a small
    /// fixed number of buckets. Shared tokens between query and chunk
    /// raise cosine similarity.
    struct BagOfWordsProvider;

    #[async_trait]
    impl EmbeddingProvider for BagOfWordsProvider {
        fn model_name(&self) -> &str {
            "bag-of-words"
        }
        fn dims(&self) -> usize {
            16
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0f32; 16];
                    for token in text.to_lowercase().split_whitespace() {
                        let mut hasher = DefaultHasher::new();
                        token.hash(&mut hasher);
                        vector[(hasher.finish() % 16) as usize] += 1.0;
                    }
                    vector
                })
                .collect())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl crate::llm::ChatModel for FailingModel {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn complete(&self, _messages: &[crate::llm::ChatMessage]) -> Result<String> {
            bail!("model unavailable")
        }
    }

    async fn seed_store(pool: &sqlx::SqlitePool, chunks: &[Chunk]) {
        migrate::run_migrations(pool).await.unwrap();
        sqlx::query(
            "INSERT INTO documents (id, collection, source, text, metadata_json, dedup_hash, ingested_at) \
             VALUES ('doc-1', 'main', 'test.md', '', '{}', 'hash', 0)",
        )
        .execute(pool)
        .await
        .unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chunks (id, collection, document_id, chunk_index, content, metadata_json, hash) \
                 VALUES (?, 'main', 'doc-1', ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(i as i64)
            .bind(&chunk.content)
            .bind(chunk.metadata_json())
            .bind(chunk.content_hash())
            .execute(pool)
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_retrieve_degrades_gracefully_when_expansion_fails() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let chunks = vec![
            chunk("test.md", 0, "Tuition is 50000 INR per semester"),
            chunk("test.md", 1, "The hostel allocates rooms by lottery"),
            chunk("test.md", 2, "Library opens at nine in the morning"),
        ];
        seed_store(&pool, &chunks).await;

        let provider = BagOfWordsProvider;
        let semantic = SemanticIndex::new(pool.clone(), "main");
        let stats = semantic.embed_pending(&provider, 64, None).await.unwrap();
        assert_eq!(stats.embedded, 3);

        let loaded = ingest::load_chunks(&pool, "main").await.unwrap();
        let lexical = LexicalIndex::build(&loaded);
        let chat = FailingModel;
        let retrieval = RetrievalConfig::default();
        let expansion = ExpansionConfig::default();

        let retriever = HybridRetriever::new(
            &semantic, &provider, &chat, &lexical, &loaded, &retrieval, &expansion,
        );

        // Expansion fails; retrieval must still answer from both indexes
        let passages = retriever.retrieve("tuition semester fees").await.unwrap();
        assert!(!passages.is_empty());
        let expected_id = chunk_id("test.md", 0, "Tuition is 50000 INR per semester");
        assert!(passages.iter().any(|p| p.chunk.id == expected_id));

        let ids: std::collections::HashSet<&str> =
            passages.iter().map(|p| p.chunk.id.as_str()).collect();
        assert_eq!(ids.len(), passages.len());
    }

    #[tokio::test]
    async fn test_semantic_index_idempotent_reindex() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let chunks = vec![
            chunk("test.md", 0, "Scholarships cover half the tuition"),
            chunk("test.md", 1, "Examinations run for two weeks"),
        ];
        seed_store(&pool, &chunks).await;

        let provider = BagOfWordsProvider;
        let semantic = SemanticIndex::new(pool.clone(), "main");

        let first = semantic.embed_pending(&provider, 64, None).await.unwrap();
        assert_eq!(first.embedded, 2);

        // Second pass sees nothing stale
        let second = semantic.embed_pending(&provider, 64, None).await.unwrap();
        assert_eq!(second.total, 0);

        let results_a = semantic.search(&provider, "tuition", 2).await.unwrap();
        let results_b = semantic.search(&provider, "tuition", 2).await.unwrap();
        let ids_a: Vec<&str> = results_a.iter().map(|(c, _)| c.id.as_str()).collect();
        let ids_b: Vec<&str> = results_b.iter().map(|(c, _)| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
