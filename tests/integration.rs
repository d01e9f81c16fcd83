use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docqa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("fees.md"),
        "# Fees\n\n## Tuition\n\nTuition is 50000 INR per semester.\n\n## Hostel\n\nHostel rent is 8000 INR per semester.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("admissions.md"),
        "# Admissions\n\nApplications open in March.\n\n## Eligibility\n\nA bachelor's degree is required for postgraduate programs.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("library.txt"),
        "The library opens at nine in the morning and closes at midnight during examinations.",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/data/docqa.sqlite"
collection = "main"

[documents]
root = "{}/docs"
include_globs = ["**/*.md", "**/*.txt", "**/*.pdf"]

[chunking]
max_chars = 2000
overlap_chars = 200
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_store() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docqa(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docqa(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_documents() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (stdout, stderr, success) = run_docqa(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents parsed: 3"));
    assert!(stdout.contains("upserted: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (stdout1, _, _) = run_docqa(&config_path, &["ingest"]);
    assert!(stdout1.contains("upserted: 3"));

    // Unchanged corpus: nothing rewritten, chunk identities stable
    let (stdout2, _, success) = run_docqa(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout2.contains("upserted: 0 (unchanged: 3)"));
}

#[test]
fn test_ingest_picks_up_changes() {
    let (tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    fs::write(
        tmp.path().join("docs").join("library.txt"),
        "The library now opens at eight in the morning.",
    )
    .unwrap();

    let (stdout, _, success) = run_docqa(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("upserted: 1 (unchanged: 2)"));
}

#[test]
fn test_ingest_removes_deleted_documents() {
    let (tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    fs::remove_file(tmp.path().join("docs").join("library.txt")).unwrap();
    let (_, _, success) = run_docqa(&config_path, &["ingest"]);
    assert!(success);

    let (stdout, _, _) = run_docqa(&config_path, &["search", "library morning"]);
    assert!(
        stdout.contains("No results."),
        "deleted document still retrievable: {}",
        stdout
    );
}

#[test]
fn test_ingest_dry_run() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (stdout, _, success) = run_docqa(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("documents found: 3"));
}

#[test]
fn test_ingest_with_limit() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (stdout, _, success) = run_docqa(&config_path, &["ingest", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("upserted: 1"));
}

#[test]
fn test_lexical_search_finds_tuition() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docqa(&config_path, &["search", "What is the tuition fee?"]);
    assert!(success, "search failed");
    assert!(
        stdout.contains("fees.md"),
        "Expected fees.md in results, got: {}",
        stdout
    );
    assert!(
        stdout.contains("Fees > Tuition"),
        "Expected heading breadcrumb, got: {}",
        stdout
    );
    assert!(stdout.contains("50000"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    let (stdout1, _, _) = run_docqa(&config_path, &["search", "semester"]);
    let (stdout2, _, _) = run_docqa(&config_path, &["search", "semester"]);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (stdout, _, success) = run_docqa(&config_path, &["search", ""]);
    assert!(success, "Empty query should not panic");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docqa(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (_, stderr, success) = run_docqa(&config_path, &["search", "test", "--mode", "invalid"]);
    assert!(!success, "Unknown mode should fail");
    assert!(
        stderr.contains("Unknown search mode"),
        "Should mention unknown mode, got: {}",
        stderr
    );
}

#[test]
fn test_search_semantic_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (_, stderr, success) =
        run_docqa(&config_path, &["search", "test", "--mode", "semantic"]);
    assert!(!success, "Semantic mode should fail when embeddings disabled");
    assert!(
        stderr.contains("embeddings"),
        "Should mention embeddings, got: {}",
        stderr
    );
}

#[test]
fn test_search_hybrid_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (_, stderr, success) = run_docqa(&config_path, &["search", "test", "--mode", "hybrid"]);
    assert!(!success, "Hybrid mode should fail when embeddings disabled");
    assert!(
        stderr.contains("embeddings"),
        "Should mention embeddings, got: {}",
        stderr
    );
}

#[test]
fn test_ask_errors_when_models_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    let (_, stderr, success) = run_docqa(&config_path, &["ask", "What is the tuition fee?"]);
    assert!(!success, "ask should fail without configured providers");
    assert!(
        stderr.contains("embeddings") || stderr.contains("language model"),
        "Should name the missing provider, got: {}",
        stderr
    );
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (_, stderr, success) = run_docqa(&config_path, &["embed", "pending"]);
    assert!(!success, "embed pending should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_embed_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    let (_, stderr, success) = run_docqa(&config_path, &["embed", "rebuild"]);
    assert!(!success, "embed rebuild should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();

    run_docqa(&config_path, &["init"]);
    run_docqa(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docqa(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("fees.md"));
    assert!(stdout.contains("admissions.md"));
}
