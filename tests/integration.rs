use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn psearch_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_psearch"))
}

fn setup_test_env(filter_stage: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("products.jsonl"),
        r#"{"id": 1, "title": "Canon EOS mirrorless camera", "brand": "Canon", "price": 1200}
{"id": 2, "title": "Sony Alpha camera body", "brand": "Sony", "price": 800}
{"id": 3, "title": "Aluminium travel tripod", "brand": "Manfrotto", "price": 150}
{"id": 4, "title": "Red leather camera strap", "brand": "Peak", "price": 25}
{"id": 5, "title": "Black camera backpack", "brand": "Lowepro", "price": 90}
{"id": 6, "price": 10}
"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/psearch.sqlite"

[retrieval]
top_k = 5

[intent]
filter_stage = "{}"

[server]
bind = "127.0.0.1:7331"
"#,
        root.display(),
        filter_stage
    );

    let config_path = config_dir.join("psearch.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_psearch(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = psearch_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run psearch binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn ingested(filter_stage: &str) -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env(filter_stage);
    let products = tmp.path().join("products.jsonl");
    run_psearch(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_psearch(&config_path, &["ingest", products.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

fn search_json(config_path: &Path, args: &[&str]) -> Vec<serde_json::Value> {
    let mut full = vec!["search"];
    full.extend_from_slice(args);
    full.push("--json");
    let (stdout, stderr, success) = run_psearch(config_path, &full);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env("semantic");

    let (stdout, stderr, success) = run_psearch(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("semantic");

    let (_, _, success1) = run_psearch(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_psearch(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_skips_products_without_text() {
    let (tmp, config_path) = setup_test_env("semantic");
    let products = tmp.path().join("products.jsonl");

    run_psearch(&config_path, &["init"]);
    let (stdout, _, success) = run_psearch(&config_path, &["ingest", products.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("upserted products: 5"), "got: {}", stdout);
    assert!(stdout.contains("skipped (no searchable text): 1"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_idempotent_by_id() {
    let (tmp, config_path) = ingested("semantic");
    let products = tmp.path().join("products.jsonl");

    let (stdout, _, _) = run_psearch(&config_path, &["ingest", products.to_str().unwrap()]);
    assert!(stdout.contains("upserted products: 5"));

    let (stdout, _, success) = run_psearch(&config_path, &["index", "status"]);
    assert!(success);
    assert!(stdout.contains("products: 5"), "got: {}", stdout);
    assert!(stdout.contains("indexed documents: 5"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env("semantic");
    let products = tmp.path().join("products.jsonl");

    run_psearch(&config_path, &["init"]);
    let (stdout, _, success) = run_psearch(
        &config_path,
        &["ingest", products.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("records found: 6"));
    assert!(stdout.contains("indexable: 5"));

    let (stdout, _, _) = run_psearch(&config_path, &["index", "status"]);
    assert!(stdout.contains("products: 0"));
    assert!(stdout.contains("not built"));
}

#[test]
fn test_ingest_rejects_malformed_line() {
    let (tmp, config_path) = setup_test_env("semantic");
    let bad = tmp.path().join("bad.jsonl");
    fs::write(&bad, "{\"title\": \"ok\"}\nnot json\n").unwrap();

    run_psearch(&config_path, &["init"]);
    let (_, stderr, success) = run_psearch(&config_path, &["ingest", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("line 2"), "got: {}", stderr);
}

#[test]
fn test_search_lexical_match() {
    let (_tmp, config_path) = ingested("semantic");

    let results = search_json(&config_path, &["tripod"]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], 3);
    assert_eq!(results[0]["source"], "hybrid");
    assert_eq!(results[0]["payload"]["brand"], "Manfrotto");
}

#[test]
fn test_search_text_output() {
    let (_tmp, config_path) = ingested("semantic");

    let (stdout, _, success) = run_psearch(&config_path, &["search", "tripod", "--explain"]);
    assert!(success);
    assert!(stdout.contains("Aluminium travel tripod"));
    assert!(stdout.contains("explain: lexical="));

    let (stdout, _, success) = run_psearch(&config_path, &["search", "nonexistentterm"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = ingested("semantic");

    let first = search_json(&config_path, &["camera", "--top-k", "3"]);
    let second = search_json(&config_path, &["camera", "--top-k", "3"]);
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn test_search_price_ceiling_with_fused_filter() {
    let (_tmp, config_path) = ingested("fused");

    let results = search_json(&config_path, &["camera under $100"]);
    let mut ids: Vec<i64> = results.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![4, 5]);
}

#[test]
fn test_search_rejects_empty_query_and_bad_weight() {
    let (_tmp, config_path) = ingested("semantic");

    let (_, stderr, success) = run_psearch(&config_path, &["search", "   "]);
    assert!(!success);
    assert!(stderr.contains("empty"), "got: {}", stderr);

    let (_, _, success) = run_psearch(
        &config_path,
        &["search", "camera", "--semantic-weight", "1.5"],
    );
    assert!(!success);
}

#[test]
fn test_index_rebuild() {
    let (_tmp, config_path) = ingested("semantic");

    let (stdout, _, success) = run_psearch(&config_path, &["index", "rebuild"]);
    assert!(success);
    assert!(stdout.contains("lexical index: ready"));
    assert!(stdout.contains("indexed documents: 5"));
}

#[test]
fn test_embed_pending_requires_provider() {
    let (_tmp, config_path) = ingested("semantic");

    let (_, stderr, success) = run_psearch(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_psearch(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("config"));
}
