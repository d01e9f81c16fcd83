//! Document parsing: turns source files into [`ParsedDocument`]s.
//!
//! PDFs go through `pdf-extract`; markdown and plain-text files are read
//! directly (the chunker understands markdown headings either way). Every
//! document's metadata is tagged with `source` = file name, since parsers
//! given a batch of files cannot be trusted to attribute text themselves.
//!
//! A file that fails to parse is skipped with a warning; one corrupt
//! document never aborts an ingest run.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::ParsedDocument;

/// Per-file parse error. The ingest pipeline skips the file and continues.
#[derive(Debug)]
pub enum ParseError {
    Io(String),
    Pdf(String),
    UnsupportedExtension(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(e) => write!(f, "read failed: {}", e),
            ParseError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ParseError::UnsupportedExtension(ext) => {
                write!(f, "unsupported file extension: {}", ext)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Extract the text of a single file based on its extension.
pub fn parse_file(path: &Path) -> Result<String, ParseError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => {
            let bytes = std::fs::read(path).map_err(|e| ParseError::Io(e.to_string()))?;
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ParseError::Pdf(e.to_string()))
        }
        "md" | "markdown" | "txt" => {
            std::fs::read_to_string(path).map_err(|e| ParseError::Io(e.to_string()))
        }
        other => Err(ParseError::UnsupportedExtension(other.to_string())),
    }
}

/// Scan the configured documents root and parse every matching file.
///
/// Files are visited in sorted relative-path order so the resulting
/// document sequence is deterministic. Parse failures are reported on
/// stderr and skipped.
pub fn scan_documents(config: &Config) -> Result<Vec<ParsedDocument>> {
    let root = &config.documents.root;
    if !root.exists() {
        bail!("documents root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.documents.include_globs)?;
    let exclude_set = build_globset(&config.documents.exclude_globs)?;

    let mut paths: Vec<(String, std::path::PathBuf)> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push((rel_str, path.to_path_buf()));
    }
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    let mut documents = Vec::new();
    for (rel_str, path) in paths {
        let text = match parse_file(&path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", rel_str, e);
                continue;
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_str.clone());

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), file_name);
        metadata.insert("path".to_string(), rel_str);

        documents.push(ParsedDocument { text, metadata });
    }

    Ok(documents)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DocumentsConfig, StoreConfig};
    use std::fs;

    fn config_for(root: &Path) -> Config {
        Config {
            store: StoreConfig {
                path: root.join("docqa.sqlite"),
                collection: "main".to_string(),
            },
            documents: DocumentsConfig {
                root: root.join("docs"),
                include_globs: vec![
                    "**/*.pdf".to_string(),
                    "**/*.md".to_string(),
                    "**/*.txt".to_string(),
                ],
                exclude_globs: vec![],
            },
            chunking: Default::default(),
            retrieval: Default::default(),
            expansion: Default::default(),
            embedding: Default::default(),
            llm: Default::default(),
        }
    }

    #[test]
    fn test_scan_tags_source_metadata() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("fees.md"), "# Fees\n\nTuition details.").unwrap();

        let parsed = scan_documents(&config_for(tmp.path())).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].metadata.get("source").unwrap(), "fees.md");
        assert!(parsed[0].text.contains("Tuition details."));
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("b.md"), "beta").unwrap();
        fs::write(docs.join("a.md"), "alpha").unwrap();
        fs::write(docs.join("ignore.json"), "{}").unwrap();

        let parsed = scan_documents(&config_for(tmp.path())).unwrap();
        let sources: Vec<&str> = parsed
            .iter()
            .map(|d| d.metadata.get("source").unwrap().as_str())
            .collect();
        assert_eq!(sources, vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_corrupt_pdf_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("broken.pdf"), b"not a pdf").unwrap();
        fs::write(docs.join("ok.md"), "still here").unwrap();

        let parsed = scan_documents(&config_for(tmp.path())).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].metadata.get("source").unwrap(), "ok.md");
    }

    #[test]
    fn test_missing_root_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = scan_documents(&config_for(tmp.path())).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
