//! Integration tests for the e2e-triage CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const REPORT: &str = r#"{
  "suites": [
    {
      "title": "checkout.spec.ts",
      "file": "checkout.spec.ts",
      "specs": [
        {
          "title": "loads cart",
          "file": "checkout.spec.ts",
          "line": 12,
          "tests": [{"projectName": "chromium", "results": [{
            "status": "failed",
            "retry": 0,
            "error": {"message": "Error: AppDataSource.getRepository cannot be used in the browser"}
          }]}]
        },
        {
          "title": "pays",
          "file": "checkout.spec.ts",
          "line": 30,
          "tests": [{"projectName": "chromium", "results": [{
            "status": "failed",
            "retry": 0,
            "error": {"message": "Error: AppDataSource.getRepository cannot be used in the browser"}
          }]}]
        },
        {
          "title": "shows total",
          "file": "checkout.spec.ts",
          "line": 44,
          "tests": [{"projectName": "chromium", "results": [{"status": "passed", "retry": 0}]}]
        }
      ]
    }
  ]
}"#;

/// Get a Command for the e2e-triage binary, isolated from the user config
fn triage(home: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("e2e-triage"));
    cmd.env("XDG_CONFIG_HOME", home)
        .env("HOME", home)
        .env("NO_COLOR", "1");
    cmd
}

fn write_report(temp: &TempDir) -> PathBuf {
    let path = temp.path().join("results.json");
    std::fs::write(&path, REPORT).unwrap();
    path
}

#[test]
fn test_help() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("end-to-end test failures"));
}

#[test]
fn test_version() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_analyze_human_output() {
    let temp = TempDir::new().unwrap();
    let report = write_report(&temp);

    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 of 3 tests failed"))
        .stdout(predicate::str::contains("BC:1@AF"))
        .stdout(predicate::str::contains("npx e2e-fix --pattern=browser_compat"));
}

#[test]
fn test_analyze_json_and_output_file() {
    let temp = TempDir::new().unwrap();
    let report = write_report(&temp);
    let out = temp.path().join("out").join("report.json");

    let assert = triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg(&report)
        .arg("--json")
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["failedTests"], 2);
    assert_eq!(json["deduplication"]["uniqueCount"], 1);
    assert_eq!(json["aggregated"]["totalErrors"], 1);
    assert_eq!(json["actionItems"][0]["type"], "auto_fix");
    assert_eq!(
        json["groups"][0]["testNames"][0],
        "loads cart"
    );

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written["runId"], json["runId"]);
}

#[test]
fn test_status_from_stdin() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .arg("-")
        .write_stdin(REPORT)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("X:1|BC:1@AF"));
}

#[test]
fn test_status_empty_input() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .arg("-")
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("P:0/0"));
}

#[test]
fn test_analyze_list_reporter_text() {
    let temp = TempDir::new().unwrap();
    let text = "\
  1) [chromium] › login.spec.ts:8:5 › Login › redirects home

    Error: page.goto: net::ERR_CONNECTION_REFUSED at http://localhost:3000/

  1 failed
";

    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg("-")
        .arg("--json")
        .write_stdin(text)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"failedTests\": 1"))
        .stdout(predicate::str::contains("\"network\""));
}

#[test]
fn test_missing_input_file() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg(temp.path().join("nope.json"))
        .assert()
        .code(6)
        .stderr(predicate::str::contains("Missing required file"));
}

#[test]
fn test_invalid_threshold() {
    let temp = TempDir::new().unwrap();
    let report = write_report(&temp);

    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg(&report)
        .arg("--threshold")
        .arg("1.5")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("clusterThreshold"));
}

#[test]
fn test_malformed_pattern_database() {
    let temp = TempDir::new().unwrap();
    let report = write_report(&temp);
    let patterns = temp.path().join("patterns.json");
    std::fs::write(&patterns, "{ not json").unwrap();

    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg(&report)
        .arg("--patterns")
        .arg(&patterns)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Pattern database error"));
}

#[test]
fn test_project_config_fix_command() {
    let temp = TempDir::new().unwrap();
    let report = write_report(&temp);
    let config_dir = temp.path().join(".e2e-triage");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.json"),
        r#"{"fixCommand": "pnpm triage:fix"}"#,
    )
    .unwrap();

    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("analyze")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("pnpm triage:fix --pattern=browser_compat"));
}

#[test]
fn test_explicit_config_must_exist() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("--config")
        .arg(temp.path().join("missing.json"))
        .arg("patterns")
        .arg("list")
        .assert()
        .code(6);
}

#[test]
fn test_clusters_json() {
    let temp = TempDir::new().unwrap();
    let report = write_report(&temp);

    let assert = triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("clusters")
        .arg(&report)
        .arg("--json")
        .assert()
        .success();

    let clusters: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(clusters.as_array().unwrap().len(), 1);
}

#[test]
fn test_patterns_list_filters() {
    let temp = TempDir::new().unwrap();
    let assert = triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("patterns")
        .arg("list")
        .arg("--category")
        .arg("browser_compat")
        .arg("--fixable")
        .arg("--json")
        .assert()
        .success();

    let patterns: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let patterns = patterns.as_array().unwrap();
    assert!(!patterns.is_empty());
    assert!(patterns.iter().all(|p| p["fixAvailable"] == true));
    assert!(patterns
        .iter()
        .any(|p| p["id"] == "typeorm-browser-bundle"));
}

#[test]
fn test_patterns_list_rejects_unknown_category() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("patterns")
        .arg("list")
        .arg("--category")
        .arg("cosmic_rays")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown category"));
}

#[test]
fn test_patterns_show() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("patterns")
        .arg("show")
        .arg("typeorm-browser-bundle")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"severity\": \"critical\""));

    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("patterns")
        .arg("show")
        .arg("no-such-pattern")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pattern id"));
}

#[test]
fn test_categorize() {
    let temp = TempDir::new().unwrap();
    triage(temp.path())
        .arg("--project")
        .arg(temp.path())
        .arg("categorize")
        .arg("Error: AppDataSource.getRepository cannot be used in the browser")
        .assert()
        .success()
        .stdout(predicate::str::contains("browser_compat (BC)"))
        .stdout(predicate::str::contains("Automatic fix available"));
}
