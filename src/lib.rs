//! # docqa
//!
//! A grounded document question-answering pipeline with hybrid retrieval.
//!
//! docqa ingests a directory of documents (PDF, markdown, plain text),
//! splits them into heading-aware chunks, embeds and persists them in a
//! named SQLite collection, and answers questions by fusing semantic
//! (vector) and lexical (BM25) retrieval before grounding a language
//! model on the retrieved passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ PDF / md   │──▶│ Parser → Chunker │──▶│    SQLite      │
//! │ documents  │   │  (batch ingest)  │   │ chunks+vectors │
//! └────────────┘   └──────────────────┘   └──────┬────────┘
//!                                                │
//!          query ──▶ Query Expander ──▶ Semantic Index (per expansion)
//!                └────────────────────▶ Lexical Index (BM25)
//!                                                │
//!                               Hybrid Retriever (fuse + dedup)
//!                                                │
//!                               Answer Synthesizer ──▶ answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                       # create the store
//! docqa ingest                     # parse, chunk, and index documents
//! docqa embed pending              # backfill embedding vectors
//! docqa search "tuition" --mode hybrid
//! docqa ask "What is the tuition fee?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`parse`] | PDF/markdown/text parsing |
//! | [`chunker`] | Heading-aware, size-bounded chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`lexical`] | In-memory BM25 index |
//! | [`semantic`] | Persisted vector index |
//! | [`expand`] | Query expansion |
//! | [`retrieve`] | Hybrid retrieval and fusion |
//! | [`synthesize`] | Grounded answer synthesis |
//! | [`pipeline`] | Composed pipeline handle |
//! | [`ingest`] | Batch ingestion and chunk storage |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod expand;
pub mod ingest;
pub mod lexical;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod retrieve;
pub mod semantic;
pub mod stats;
pub mod synthesize;
