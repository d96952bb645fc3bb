//! CLI tests that run the built `hrag` binary.
//!
//! Only commands that need no running model or vector store service are
//! exercised here; provider behavior is covered by `upstream_integration.rs`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("hrag");
    path
}

fn setup_test_env(include_builtin: bool) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs").join("nutrition");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("fiber.md"),
        "# Dietary Fiber\n\nFiber supports digestion and helps regulate blood sugar.\n\nAdults should aim for 25-30 grams per day.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("hydration.txt"),
        "Most adults need about 2-3 liters of fluids daily.\n\nNeeds rise with heat and exercise.",
    )
    .unwrap();
    fs::write(root.join("docs").join("notes.json"), "{\"ignored\": true}").unwrap();
    let heart_dir = root.join("docs").join("cardiology");
    fs::create_dir_all(&heart_dir).unwrap();
    fs::write(
        heart_dir.join("blood-pressure.md"),
        "# Blood Pressure\n\nNormal blood pressure is below 120/80 mmHg.",
    )
    .unwrap();

    let config_content = format!(
        r#"[vector_store]
provider = "memory"
collection = "cli_test"

[chunking]
max_tokens = 64

[logging]
level = "warn"

[corpus]
include_builtin = {}
root = "{}/docs"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
"#,
        include_builtin,
        root.display()
    );

    let config_path = config_dir.join("hrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(hrag_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["ingest", "ask", "search", "agents", "serve", "status", "collection"] {
        assert!(stdout.contains(cmd), "--help is missing '{}': {}", cmd, stdout);
    }
}

#[test]
fn test_ingest_dry_run_directory_only() {
    let (_tmp, config_path) = setup_test_env(false);

    let (stdout, stderr, success) = run_hrag(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("documents: 3"), "got: {}", stdout);
    assert!(!stdout.contains("embedded"));
}

#[test]
fn test_ingest_dry_run_with_builtin_corpus() {
    let (_tmp, config_path) = setup_test_env(true);

    let (stdout, _, success) = run_hrag(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("documents: 17"), "got: {}", stdout);

    let (stdout, _, success) = run_hrag(&config_path, &["ingest", "--dry-run", "--limit", "2"]);
    assert!(success);
    assert!(stdout.contains("documents: 2"), "got: {}", stdout);
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("does-not-exist.toml");

    let (stdout, stderr, success) = run_hrag(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("documents: 14"), "got: {}", stdout);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("hrag.toml");
    fs::write(&config_path, "[llm]\nprovider = \"bard\"\n").unwrap();

    let (_, stderr, success) = run_hrag(&config_path, &["ingest", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("Unknown llm provider"), "stderr={}", stderr);
}

#[test]
fn test_agents_list() {
    let (_tmp, config_path) = setup_test_env(false);

    let (stdout, stderr, success) = run_hrag(&config_path, &["agents", "list"]);
    assert!(success, "stderr={}", stderr);
    for name in ["research", "analysis", "synthesis", "coordinator"] {
        assert!(stdout.contains(name), "missing {}: {}", name, stdout);
    }
}

#[test]
fn test_collection_info_on_fresh_memory_store() {
    let (_tmp, config_path) = setup_test_env(false);

    let (stdout, _, success) = run_hrag(&config_path, &["collection", "info"]);
    assert!(success);
    assert!(stdout.contains("'cli_test' does not exist"), "got: {}", stdout);
}
