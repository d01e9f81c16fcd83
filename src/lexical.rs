//! In-memory BM25 lexical index over the canonical chunk sequence.
//!
//! Term statistics are rebuilt wholesale from the chunk sequence on
//! every process start — the index owns its postings exclusively and is
//! never updated incrementally. Results are chunk ordinals into the
//! sequence the index was built from, so the caller must hold the same
//! sequence (both indexes are built from one canonical load).

use std::collections::HashMap;

use crate::models::Chunk;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Term-frequency index with BM25 scoring.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    /// term → [(chunk ordinal, term frequency)]
    postings: HashMap<String, Vec<(usize, u32)>>,
    /// token count per chunk ordinal
    chunk_lengths: Vec<usize>,
    avg_length: f64,
}

impl LexicalIndex {
    /// Build the index from the canonical chunk sequence.
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut chunk_lengths = Vec::with_capacity(chunks.len());
        let mut total_tokens = 0usize;

        for (ordinal, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize(&chunk.content);
            chunk_lengths.push(tokens.len());
            total_tokens += tokens.len();

            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *term_freqs.entry(token).or_insert(0) += 1;
            }
            for (term, freq) in term_freqs {
                postings.entry(term).or_default().push((ordinal, freq));
            }
        }

        let indexed = chunk_lengths.iter().filter(|l| **l > 0).count();
        let avg_length = if indexed > 0 {
            total_tokens as f64 / indexed as f64
        } else {
            0.0
        };

        Self {
            postings,
            chunk_lengths,
            avg_length,
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_lengths.is_empty()
    }

    /// Score the query against the index and return the top `k` chunk
    /// ordinals with BM25 scores, descending, ties broken by ordinal.
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        if self.is_empty() {
            return Vec::new();
        }
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let doc_count = self.chunk_lengths.len() as f64;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for token in &query_tokens {
            if let Some(postings) = self.postings.get(token) {
                let n = postings.len() as f64;
                let idf = ((doc_count - n + 0.5) / (n + 0.5) + 1.0).ln();

                for &(ordinal, tf) in postings {
                    let tf = tf as f64;
                    let length = self.chunk_lengths[ordinal] as f64;
                    let norm = 1.0 - BM25_B + BM25_B * (length / self.avg_length);
                    let tf_component = (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm);
                    *scores.entry(ordinal).or_insert(0.0) += idf * tf_component;
                }
            }
        }

        let mut results: Vec<(usize, f64)> = scores.into_iter().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results.truncate(k);
        results
    }
}

/// Lowercased alphanumeric tokens of length >= 2.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() >= 2)
        .map(|s| s.to_string())
        .collect()
}
