//! The composed question-answering pipeline.
//!
//! [`Pipeline`] is an explicit, immutable handle constructed once at
//! startup: it connects the store, instantiates the embedding provider
//! and chat model, loads the canonical chunk sequence, and builds the
//! in-memory lexical index. Request handlers receive it by reference —
//! there are no hidden singletons, and every component gets its
//! dependencies through its constructor.
//!
//! The retrieval-to-generation flow is expressed as [`Stage`]s — a
//! uniform "accepts input, produces output" capability — composed
//! sequentially by [`Pipeline::answer`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::ingest;
use crate::lexical::LexicalIndex;
use crate::llm::{self, ChatModel};
use crate::models::{Chunk, RetrievedPassage};
use crate::retrieve::HybridRetriever;
use crate::semantic::SemanticIndex;
use crate::synthesize::AnswerSynthesizer;

/// One polymorphic pipeline step.
#[async_trait]
pub trait Stage<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(&self, input: I) -> Result<O>;
}

/// Retrieval stage: query text in, fused passages out.
struct RetrievalStage<'a> {
    retriever: HybridRetriever<'a>,
}

#[async_trait]
impl<'a> Stage<String, Vec<RetrievedPassage>> for RetrievalStage<'a> {
    async fn run(&self, input: String) -> Result<Vec<RetrievedPassage>> {
        self.retriever.retrieve(&input).await
    }
}

/// Synthesis stage: (query, passages) in, answer text out.
struct SynthesisStage<'a> {
    synthesizer: AnswerSynthesizer<'a>,
}

#[async_trait]
impl<'a> Stage<(String, Vec<RetrievedPassage>), String> for SynthesisStage<'a> {
    async fn run(&self, input: (String, Vec<RetrievedPassage>)) -> Result<String> {
        let (query, passages) = input;
        self.synthesizer.synthesize(&query, &passages).await
    }
}

/// Process-wide pipeline state, built once and shared across requests.
/// All fields are read-only after construction.
pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    provider: Box<dyn EmbeddingProvider>,
    chat: Box<dyn ChatModel>,
    semantic: SemanticIndex,
    lexical: LexicalIndex,
    chunks: Vec<Chunk>,
}

impl Pipeline {
    /// Connect the store, create the model clients, and build the
    /// in-memory lexical index from the canonical chunk sequence.
    pub async fn new(config: &Config) -> Result<Self> {
        if !config.embedding.is_enabled() {
            bail!("The pipeline requires embeddings. Set [embedding] provider in config.");
        }
        if !config.llm.is_enabled() {
            bail!("The pipeline requires a language model. Set [llm] provider in config.");
        }

        let provider = embedding::create_provider(&config.embedding)?;
        let chat = llm::create_chat_model(&config.llm)?;
        let pool = db::connect(config).await?;
        let chunks = ingest::load_chunks(&pool, &config.store.collection).await?;
        let lexical = LexicalIndex::build(&chunks);
        let semantic = SemanticIndex::new(pool.clone(), config.store.collection.clone());

        Ok(Self {
            config: config.clone(),
            pool,
            provider,
            chat,
            semantic,
            lexical,
            chunks,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Run hybrid retrieval for one query.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>> {
        let stage = RetrievalStage {
            retriever: self.retriever(),
        };
        stage.run(query.to_string()).await
    }

    /// Stateless entry point: one question in, one grounded answer out.
    pub async fn answer(&self, query: &str) -> Result<String> {
        let retrieval = RetrievalStage {
            retriever: self.retriever(),
        };
        let synthesis = SynthesisStage {
            synthesizer: AnswerSynthesizer::new(self.chat.as_ref()),
        };

        let passages = retrieval.run(query.to_string()).await?;
        synthesis.run((query.to_string(), passages)).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    fn retriever(&self) -> HybridRetriever<'_> {
        HybridRetriever::new(
            &self.semantic,
            self.provider.as_ref(),
            self.chat.as_ref(),
            &self.lexical,
            &self.chunks,
            &self.config.retrieval,
            &self.config.expansion,
        )
    }
}

/// Run the `ask` CLI command.
pub async fn run_ask(config: &Config, question: &str, show_sources: bool) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let pipeline = Pipeline::new(config).await?;

    if show_sources {
        let passages = pipeline.retrieve(question).await?;
        let synthesizer = AnswerSynthesizer::new(pipeline.chat.as_ref());
        let answer = synthesizer.synthesize(question, &passages).await?;

        println!("{}", answer);
        println!();
        println!("Sources:");
        if passages.is_empty() {
            println!("  (none)");
        }
        for passage in &passages {
            let source = passage.chunk.source().unwrap_or("(unknown)");
            match passage.chunk.header_path() {
                Some(path) => println!("  - {} ({})", source, path),
                None => println!("  - {}", source),
            }
        }
    } else {
        let answer = pipeline.answer(question).await?;
        println!("{}", answer);
    }

    pipeline.close().await;
    Ok(())
}
