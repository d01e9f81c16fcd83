//! Query expansion: paraphrase a user question to broaden semantic recall.
//!
//! The expander asks the chat model for a handful of alternative
//! phrasings and returns the original question first, followed by the
//! expansions — recall is widened, never replaced. Expansion is best
//! effort: on model failure, timeout, or unparseable output it falls
//! back to the original question alone and never fails the pipeline.

use crate::llm::{ChatMessage, ChatModel};

const EXPANSION_TEMPLATE: &str = "You are an AI language model assistant. Your task is to \
generate {count} different versions of the given user question to retrieve relevant \
documents from a vector database. By generating multiple perspectives on the user \
question, your goal is to help overcome some of the limitations of distance-based \
similarity search. Provide these alternative questions separated by newlines, with no \
numbering or extra commentary.\n\nOriginal question: {question}";

pub struct QueryExpander<'a> {
    model: &'a dyn ChatModel,
    count: usize,
}

impl<'a> QueryExpander<'a> {
    pub fn new(model: &'a dyn ChatModel, count: usize) -> Self {
        Self { model, count }
    }

    /// Produce the ordered query sequence: the original question
    /// followed by up to `count` distinct paraphrases.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let prompt = EXPANSION_TEMPLATE
            .replace("{count}", &self.count.to_string())
            .replace("{question}", query);

        let raw = match self.model.complete(&[ChatMessage::user(prompt)]).await {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("Warning: query expansion failed, using original query: {}", e);
                return vec![query.to_string()];
            }
        };

        let expansions = parse_expansions(&raw, query, self.count);
        if expansions.is_empty() {
            eprintln!("Warning: query expansion returned no usable queries, using original");
            return vec![query.to_string()];
        }

        let mut queries = Vec::with_capacity(expansions.len() + 1);
        queries.push(query.to_string());
        queries.extend(expansions);
        queries
    }
}

/// Parse model output into distinct expansion queries: one per line,
/// numbering and bullets stripped, blanks and duplicates of the
/// original dropped.
fn parse_expansions(raw: &str, original: &str, count: usize) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();

    for line in raw.lines() {
        let candidate = strip_list_marker(line.trim());
        if candidate.is_empty() {
            continue;
        }
        if candidate.eq_ignore_ascii_case(original.trim()) {
            continue;
        }
        if seen.iter().any(|s| s.eq_ignore_ascii_case(&candidate)) {
            continue;
        }
        seen.push(candidate);
        if seen.len() == count {
            break;
        }
    }

    seen
}

/// Remove leading `1.`, `2)`, `-`, `*` markers and surrounding quotes.
fn strip_list_marker(line: &str) -> String {
    let mut rest = line;

    let digits: usize = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let after = &rest[digits..];
        if let Some(stripped) = after.strip_prefix('.').or_else(|| after.strip_prefix(')')) {
            rest = stripped;
        }
    }
    let rest = rest
        .trim_start_matches(['-', '*'])
        .trim()
        .trim_matches('"')
        .trim();

    rest.to_string()
}
