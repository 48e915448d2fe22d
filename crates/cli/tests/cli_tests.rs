//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary in `dir` with an isolated environment
fn ccopt(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ccopt"));
    cmd.current_dir(dir)
        .args(args)
        .env("RUST_LOG", "error")
        .env_remove("OPENAI_API_KEY")
        .env_remove("CCOPT_OPENAI_API_KEY")
        .env_remove("CCOPT_MODEL_DIR")
        .env_remove("CCOPT_SNAPSHOT_PATH")
        .env_remove("CCOPT_CACHE_DIR");
    cmd.output().expect("Failed to execute ccopt")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = ccopt(dir.path(), &["--help"]);
    let stdout = stdout(&output);

    assert!(output.status.success(), "CLI help should succeed");
    for command in ["seed", "train", "recommend", "explain", "analytics", "summary", "trends", "model", "metrics"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("--log-json"), "Should show log-json option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = ccopt(dir.path(), &["--version"]);
    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout(&output).contains("ccopt"), "Should show binary name");
}

/// Test recommend subcommand help
#[test]
fn test_recommend_help() {
    let dir = TempDir::new().unwrap();
    let output = ccopt(dir.path(), &["recommend", "--help"]);
    let stdout = stdout(&output);

    assert!(output.status.success(), "Recommend help should succeed");
    assert!(stdout.contains("--environment"));
    assert!(stdout.contains("--min-savings"));
    assert!(stdout.contains("--downsize-only"));
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let dir = TempDir::new().unwrap();
    let output = ccopt(dir.path(), &["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

/// Test that commands needing data fail cleanly without a snapshot
#[test]
fn test_missing_snapshot() {
    let dir = TempDir::new().unwrap();
    let output = ccopt(dir.path(), &["recommend"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ccopt seed"), "Should point at the seed command");
}

/// Test model command before any training
#[test]
fn test_model_before_training() {
    let dir = TempDir::new().unwrap();
    assert!(ccopt(dir.path(), &["seed", "--instances", "12", "--days", "2"]).status.success());

    let output = ccopt(dir.path(), &["model"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No trained model"), "stderr was: {}", stderr);
}

/// Seed, train, recommend, explain and summarize through the binary
#[test]
fn test_end_to_end_json() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("snap.json");
    let snapshot = snapshot.to_str().unwrap();
    let models = dir.path().join("models");
    let models = models.to_str().unwrap();
    let global = ["--snapshot", snapshot, "--model-dir", models, "--format", "json"];
    let run = |args: &[&str]| {
        let mut all: Vec<&str> = global.to_vec();
        all.extend_from_slice(args);
        ccopt(dir.path(), &all)
    };

    let seeded = run(&["seed", "--instances", "30", "--days", "3"]);
    assert!(seeded.status.success());
    assert_eq!(json(&seeded)["instances"], 30);

    let trained = run(&["train"]);
    assert!(trained.status.success(), "{}", String::from_utf8_lossy(&trained.stderr));
    let meta = json(&trained);
    assert_eq!(meta["version"], 1);
    assert!(meta["feature_schema"]["fields"].as_array().unwrap().len() > 7);

    let recommended = run(&["recommend"]);
    assert!(recommended.status.success());
    let recs = json(&recommended);
    let recs = recs.as_array().unwrap();
    assert_eq!(recs.len(), 30);
    for rec in recs {
        let action = rec["action"].as_str().unwrap();
        assert!(action == "keep" || action == "downsize");
    }

    let first = recs[0]["instance_ref"].as_str().unwrap();
    let explained = run(&["explain", first]);
    assert!(explained.status.success());
    assert!(stdout(&explained).contains("Explanations are disabled"));

    let analytics = run(&["analytics"]);
    assert!(analytics.status.success());
    let summary = json(&analytics);
    assert_eq!(summary["instance_count"], 30);
    assert_eq!(summary["model"]["version"], 1);

    let summary = run(&["summary"]);
    assert!(summary.status.success());
    assert!(stdout(&summary).contains("Summaries are disabled"));

    let trends = run(&["trends", "--days", "10"]);
    assert!(trends.status.success());
    assert_eq!(json(&trends)["days"].as_array().unwrap().len(), 10);

    let model = run(&["model"]);
    assert!(model.status.success());
    assert_eq!(json(&model)["version"], 1);

    let metrics = ccopt(dir.path(), &["--snapshot", snapshot, "--model-dir", models, "metrics"]);
    assert!(metrics.status.success());
    assert!(stdout(&metrics).contains("ccopt_recommendations_generated"));
}
