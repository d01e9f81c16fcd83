//! Core data types that flow through the question-answering pipeline.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// A source document after parsing, before chunking.
///
/// Produced by the parser layer; `metadata` always contains a `source`
/// field naming the originating file. Immutable once created.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// A bounded-size passage of document text — the unit of indexing
/// and retrieval.
///
/// Metadata is the parent document's metadata overlaid with the
/// structural fields (`Header1`..`Header3`) injected during splitting,
/// so every chunk remains attributable to its source. The id is
/// derived from (source, index, content), which makes re-ingesting
/// identical input produce identical identities.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn new(
        source: &str,
        index: i64,
        content: String,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let id = chunk_id(source, index, &content);
        Self {
            id,
            content,
            metadata,
        }
    }

    /// Content hash used for embedding staleness detection.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Source file name, if the chunk carries one.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").map(|s| s.as_str())
    }

    /// Heading breadcrumb for attribution, e.g. `"Fees > Tuition"`.
    pub fn header_path(&self) -> Option<String> {
        let parts: Vec<&str> = ["Header1", "Header2", "Header3"]
            .iter()
            .filter_map(|key| self.metadata.get(*key).map(|v| v.as_str()))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" > "))
        }
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Deterministic chunk identity: hex SHA-256 over source, ordinal, and content.
pub fn chunk_id(source: &str, index: i64, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Which retriever surfaced a passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retriever {
    Semantic,
    Lexical,
}

impl std::fmt::Display for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Retriever::Semantic => write!(f, "semantic"),
            Retriever::Lexical => write!(f, "lexical"),
        }
    }
}

/// A scored chunk returned from hybrid retrieval. Transient: created
/// per query and discarded after synthesis.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    pub score: f64,
    pub retriever: Retriever,
}
