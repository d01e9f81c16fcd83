//! Answer synthesis: turn retrieved passages and the user question into
//! one grounded chat completion.
//!
//! The system prompt pins the model to the supplied context: it must
//! answer only from the passages, read markdown table intersections
//! carefully, cite the source document when it can, close with a fixed
//! disclaimer, and fall back to a fixed "cannot find" sentence when the
//! context does not contain the answer. The model's text comes back to
//! the caller unmodified.

use anyhow::{Context, Result};

use crate::llm::{ChatMessage, ChatModel};
use crate::models::RetrievedPassage;

/// Fixed sentence the assistant must use when the context is
/// insufficient.
pub const NO_ANSWER: &str = "I cannot find that information in the official documents.";

/// Fixed closing disclaimer.
pub const DISCLAIMER: &str = "For more info visit official site";

const SYSTEM_PROMPT: &str = "You are an expert academic assistant. \
Your task is to answer questions using ONLY the provided context snippets below.\n\n\
--- GUIDELINES ---\n\
1. **Strict Fidelity:** If the answer is not in the context, say 'I cannot find that \
information in the official documents.' Do not make up numbers.\n\
2. **Table Logic:** The context may contain Markdown tables. When asked for fees or \
stats, read the row and column headers carefully to find the intersection.\n\
3. **Tone:** Be precise, professional, and helpful. Format lists and numbers clearly.\n\
4. **Citations:** If possible, mention the document source (e.g., 'According to \
fees.pdf...').\n\
5. **Disclaimer:** Always mention at the end: 'For more info visit official site'.\n\n\
--- CONTEXT ---\n\
{context}";

pub struct AnswerSynthesizer<'a> {
    model: &'a dyn ChatModel,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(model: &'a dyn ChatModel) -> Self {
        Self { model }
    }

    /// Compose the grounded prompt and return the model's answer text.
    ///
    /// Empty retrieval is not an error: with no passages the fixed
    /// cannot-find response is returned without a model call, so the
    /// behavior is identical no matter which model is configured.
    pub async fn synthesize(&self, query: &str, passages: &[RetrievedPassage]) -> Result<String> {
        if passages.is_empty() {
            return Ok(format!("{} {}", NO_ANSWER, DISCLAIMER));
        }

        let messages = build_messages(query, passages);
        self.model
            .complete(&messages)
            .await
            .context("answer synthesis failed")
    }
}

/// Assemble the system + user messages for one question.
pub fn build_messages(query: &str, passages: &[RetrievedPassage]) -> Vec<ChatMessage> {
    let context = build_context(passages);
    let system = SYSTEM_PROMPT.replace("{context}", &context);
    vec![ChatMessage::system(system), ChatMessage::user(query)]
}

/// Concatenate passage contents into the context block, each prefixed
/// with its attribution line.
fn build_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|passage| {
            let source = passage.chunk.source().unwrap_or("unknown source");
            match passage.chunk.header_path() {
                Some(path) => format!("[{} | {}]\n{}", source, path, passage.chunk.content),
                None => format!("[{}]\n{}", source, passage.chunk.content),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
