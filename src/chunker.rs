//! Two-phase document chunker.
//!
//! Phase one splits each document along markdown heading boundaries
//! (levels 1–3), recording the nearest enclosing heading text as
//! `Header1`/`Header2`/`Header3` metadata. Phase two splits each section
//! down to a maximum character length with a recursive separator cascade
//! (paragraph → line → word → character) and a fixed overlap between
//! consecutive chunks of the same section.
//!
//! Every chunk's metadata starts from the parent document's metadata and
//! overlays the structural heading fields, so source attribution survives
//! splitting.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ParsedDocument};

/// Separator cascade for size-bounded splitting. If none of these occur
/// in an oversized piece, it is split at character boundaries.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Split a batch of parsed documents into the canonical chunk sequence.
///
/// Output order follows input document order, then section order, then
/// sub-chunk order; chunk indices are contiguous per document. The same
/// input and parameters always yield the same sequence and the same ids.
pub fn split_documents(documents: &[ParsedDocument], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for document in documents {
        let source = document
            .metadata
            .get("source")
            .cloned()
            .unwrap_or_default();
        let mut index: i64 = 0;

        for section in split_by_headings(&document.text) {
            // Document metadata first, structural fields overlaid
            let mut metadata = document.metadata.clone();
            for (level, heading) in section.headings.iter().enumerate() {
                if let Some(text) = heading {
                    metadata.insert(format!("Header{}", level + 1), text.clone());
                }
            }

            for piece in split_text(&section.body, config.max_chars, config.overlap_chars) {
                chunks.push(Chunk::new(&source, index, piece, metadata.clone()));
                index += 1;
            }
        }
    }

    chunks
}

/// A contiguous run of document text governed by the same heading path.
#[derive(Debug)]
struct Section {
    headings: [Option<String>; 3],
    body: String,
}

/// Split text on markdown heading lines of levels 1–3.
///
/// Heading lines themselves are consumed into metadata, not section
/// bodies. Deeper headings (`####`+) and anything inside a fenced code
/// block stay in the body. A document without headings yields a single
/// section covering the whole text.
fn split_by_headings(text: &str) -> Vec<Section> {
    fn flush(headings: &[Option<String>; 3], lines: &mut Vec<&str>, out: &mut Vec<Section>) {
        let body = lines.join("\n").trim().to_string();
        lines.clear();
        if !body.is_empty() {
            out.push(Section {
                headings: (*headings).clone(),
                body,
            });
        }
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut headings: [Option<String>; 3] = [None, None, None];
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            lines.push(line);
            continue;
        }

        if !in_fence {
            if let Some((level, title)) = parse_heading(trimmed) {
                flush(&headings, &mut lines, &mut sections);
                // Entering a heading clears all deeper levels
                for deeper in headings.iter_mut().skip(level - 1) {
                    *deeper = None;
                }
                headings[level - 1] = Some(title);
                continue;
            }
        }

        lines.push(line);
    }
    flush(&headings, &mut lines, &mut sections);

    sections
}

/// Parse a markdown ATX heading of level 1–3: `#`, `##`, or `###`
/// followed by a space (or nothing). Returns (level, title).
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if rest.is_empty() {
        return Some((hashes, String::new()));
    }
    if rest.starts_with(' ') || rest.starts_with('\t') {
        return Some((hashes, rest.trim().to_string()));
    }
    None
}

/// Split `text` so no piece exceeds `max_chars` characters, carrying
/// `overlap_chars` of trailing context into each following piece.
///
/// Splitting prefers paragraph boundaries, then lines, then words, and
/// falls back to character windows, so the size bound always holds.
pub fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    split_level(text, max_chars, overlap_chars, 0)
}

fn split_level(text: &str, max_chars: usize, overlap_chars: usize, level: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }
    if level >= SEPARATORS.len() {
        return split_chars(text, max_chars, overlap_chars);
    }

    let separator = SEPARATORS[level];
    let pieces: Vec<&str> = text.split(separator).collect();
    if pieces.len() == 1 {
        return split_level(text, max_chars, overlap_chars, level + 1);
    }

    // Reduce every piece below the limit, recursing with finer
    // separators where needed, then merge back up with overlap.
    let mut atoms: Vec<String> = Vec::new();
    for piece in pieces {
        if piece.trim().is_empty() {
            continue;
        }
        if char_len(piece) <= max_chars {
            atoms.push(piece.to_string());
        } else {
            atoms.extend(split_level(piece, max_chars, overlap_chars, level + 1));
        }
    }

    merge_atoms(atoms, separator, max_chars, overlap_chars)
}

/// Greedily pack atoms into chunks of at most `max_chars`, seeding each
/// new chunk with the trailing atoms of the previous one up to
/// `overlap_chars`.
fn merge_atoms(atoms: Vec<String>, separator: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks: Vec<String> = Vec::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut buffer_len = 0usize;

    for atom in atoms {
        let atom_len = char_len(&atom);
        let mut projected = if buffer.is_empty() {
            atom_len
        } else {
            buffer_len + sep_len + atom_len
        };

        if projected > max_chars && !buffer.is_empty() {
            chunks.push(buffer.join(separator));

            // Keep a tail of the flushed chunk as overlap context
            let mut tail: Vec<String> = Vec::new();
            let mut tail_len = 0usize;
            for prev in buffer.iter().rev() {
                let prev_len = char_len(prev);
                let extra = if tail.is_empty() {
                    prev_len
                } else {
                    prev_len + sep_len
                };
                if tail_len + extra > overlap_chars {
                    break;
                }
                tail_len += extra;
                tail.push(prev.clone());
            }
            tail.reverse();
            buffer = tail;
            buffer_len = tail_len;

            // Drop overlap from the front if the incoming atom would
            // still not fit beside it
            while !buffer.is_empty() && buffer_len + sep_len + atom_len > max_chars {
                let removed = buffer.remove(0);
                let removed_len = char_len(&removed);
                buffer_len = buffer_len.saturating_sub(if buffer.is_empty() {
                    removed_len
                } else {
                    removed_len + sep_len
                });
            }

            projected = if buffer.is_empty() {
                atom_len
            } else {
                buffer_len + sep_len + atom_len
            };
            debug_assert!(projected <= max_chars || buffer.is_empty());
        }

        if !buffer.is_empty() {
            buffer_len += sep_len;
        }
        buffer.push(atom);
        buffer_len += atom_len;
    }

    if !buffer.is_empty() {
        chunks.push(buffer.join(separator));
    }

    chunks
}

/// Last-resort split at character boundaries with a sliding overlap.
fn split_chars(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = max_chars - overlap_chars;
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
