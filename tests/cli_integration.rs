//! Integration tests for the qreport CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RISKS: &str = "Feature: Online index rebuild\nStatus: At Risk\nPriority: High\n";
const PRBS: &str = "P1(1)\nPRB-0012345\nAnalysis Complete\n9/18/2025\nArchival is not running\n";
const BUGS: &str = "Work ID\tSubject\tPriority\tStatus\tScrum Team\tFound in Build\tCreated Date\n\
W-12345678\tCrash on startup when WAL is truncated\tP1\tNew\tQuery Engine\tsdb.258.11\t9/2/2025\n";
const CI: &str = "P2(1)\nStorage Core(1)\nW-19876543\nTriaged\nsdb.260.1\n9/10/2025\nFlaky replication test\n";
const LEFTSHIFT: &str = "Work ID,Team,Priority,Subject,Status\nW-1111111,Storage,P1,Deadlock found by stress suite,New\n";
const SECURITY: &str = "P3(1)\nStorage Core(1)\nW-18765432\nsdb.259.4\nTriaged\nCID 40112: RESOURCE_LEAK in segment.c\n";

/// Get a Command for the qreport binary with a clean environment
fn qreport(project: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("qreport"));
    cmd.arg("--project")
        .arg(project)
        .env_remove("RUST_LOG")
        .env_remove("QREPORT_LLM_ENDPOINT")
        .env_remove("QREPORT_LLM_MODEL")
        .env_remove("QREPORT_WEEKS_DIR")
        .env_remove("QREPORT_REPORTS_DIR")
        .env_remove("QREPORT_GIT_REPO")
        .env_remove("LLM_GW_EXPRESS_KEY");
    cmd
}

/// Project with every required local input for `cw37/Engine`.
fn project_with_inputs() -> TempDir {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("weeks/cw37/Engine");
    std::fs::create_dir_all(&dir).unwrap();
    for (name, content) in [
        ("risks.txt", RISKS),
        ("prb.txt", PRBS),
        ("bugs.txt", BUGS),
        ("ci.txt", CI),
        ("leftshift.txt", LEFTSHIFT),
        ("security.txt", SECURITY),
    ] {
        std::fs::write(dir.join(name), content).unwrap();
    }
    temp
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[test]
fn test_help() {
    Command::new(cargo::cargo_bin!("qreport"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Weekly quality report"));
}

#[test]
fn test_version() {
    Command::new(cargo::cargo_bin!("qreport"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_generate_requires_week_and_component() {
    let temp = TempDir::new().unwrap();
    qreport(temp.path())
        .arg("generate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--week"));
}

#[test]
fn test_prompt_prints_sections_in_order() {
    let temp = project_with_inputs();

    let output = qreport(temp.path())
        .args(["prompt", "--week", "cw37", "--component", "Engine"])
        .args(["--report-end-date", "2025-09-20"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();

    let framing = text.find("# Weekly Quality Report Input").unwrap();
    let risks = text.find("Online index rebuild").unwrap();
    let request = text.find("## Report Request").unwrap();
    assert!(framing < risks && risks < request);
    assert!(text.contains("PRB-0012345"));
    assert!(text.contains("Component: Engine"));
}

#[test]
fn test_prompt_report_type() {
    let temp = project_with_inputs();

    qreport(temp.path())
        .args(["prompt", "--week", "cw37", "--component", "Engine"])
        .args(["--report-type", "compact"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generate a compact quality report"));
}

#[test]
fn test_prompt_to_file() {
    let temp = project_with_inputs();
    let out = temp.path().join("prompt.md");

    qreport(temp.path())
        .args(["prompt", "--week", "cw37", "--component", "Engine", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("Prompt written"));

    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.starts_with("# Weekly Quality Report Input"));
}

#[test]
fn test_missing_input_exits_with_input_code() {
    let temp = project_with_inputs();
    std::fs::remove_file(temp.path().join("weeks/cw37/Engine/prb.txt")).unwrap();

    qreport(temp.path())
        .env("LLM_GW_EXPRESS_KEY", "test-key")
        .args(["generate", "--week", "cw37", "--component", "Engine"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("prb.txt"));

    assert!(!temp.path().join("reports").exists());
}

#[test]
fn test_unknown_week_lists_available_weeks() {
    let temp = project_with_inputs();

    qreport(temp.path())
        .args(["prompt", "--week", "cw99", "--component", "Engine"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("cw37"));
}

#[test]
fn test_missing_key_exits_with_gateway_code() {
    let temp = project_with_inputs();

    qreport(temp.path())
        .args(["generate", "--week", "cw37", "--component", "Engine", "--no-git"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("LLM_GW_EXPRESS_KEY"));

    assert!(!temp.path().join("reports").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gateway_rejection_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "invalid key"}})),
        )
        .mount(&server)
        .await;

    let temp = project_with_inputs();
    qreport(temp.path())
        .env("QREPORT_LLM_ENDPOINT", format!("{}/chat/completions", server.uri()))
        .env("LLM_GW_EXPRESS_KEY", "expired-key")
        .args(["generate", "--week", "cw37", "--component", "Engine", "--no-git"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("Authentication failed"))
        .stderr(predicate::str::contains("Hint:"));

    let reports = temp.path().join("reports");
    assert!(!reports.exists() || count_files(&reports) == 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generate_then_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "## Executive Summary\nStable week."}}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 40}
        })))
        .mount(&server)
        .await;

    let temp = project_with_inputs();
    for _ in 0..2 {
        qreport(temp.path())
            .env("QREPORT_LLM_ENDPOINT", format!("{}/chat/completions", server.uri()))
            .env("LLM_GW_EXPRESS_KEY", "test-key")
            .args(["generate", "--week", "cw37", "--component", "Engine", "--no-git"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Report generated"));
    }

    let output = qreport(temp.path())
        .args(["list", "--component", "Engine", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let artifacts: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let artifacts = artifacts.as_array().unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0]["week"], "cw37");

    let versions: Vec<u64> = artifacts.iter().map(|a| a["version"].as_u64().unwrap()).collect();
    assert!(versions.contains(&1) && versions.contains(&2));
}

#[test]
fn test_list_empty() {
    let temp = TempDir::new().unwrap();
    qreport(temp.path())
        .args(["list", "--component", "Engine"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No reports found"));
}

#[test]
fn test_config_show_json() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("qreport.json"),
        r#"{"prompt": {"max_chars": 20000}}"#,
    )
    .unwrap();

    let output = qreport(temp.path())
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let settings: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(settings["prompt"]["max_chars"], 20000);
    assert_eq!(settings["llm"]["api_key_env"], "LLM_GW_EXPRESS_KEY");
}

#[test]
fn test_invalid_config_refuses_to_run() {
    let temp = project_with_inputs();
    std::fs::write(
        temp.path().join("qreport.json"),
        r#"{"prompt": {"max_chars": 10}}"#,
    )
    .unwrap();

    qreport(temp.path())
        .args(["prompt", "--week", "cw37", "--component", "Engine"])
        .assert()
        .code(7);
}

#[test]
fn test_config_paths() {
    let temp = TempDir::new().unwrap();
    qreport(temp.path())
        .args(["config", "paths"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qreport.json"));
}
