mod common;

use common::{Fixture, archivist};
use std::fs;
use tempfile::tempdir;

#[test]
fn run_without_endpoints_writes_placeholder_summary_and_no_marker() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());
    fx.group(1, "Ops", "ops")
        .thread(3, 1, "Rollout plan")
        .chat(1, Some(3), "Ship it", 1_700_000_000);

    archivist(tmp.path())
        .arg("run")
        .assert()
        .code(2)
        .stdout(predicates::str::contains("remote index not configured"));

    let summary = fs::read_to_string(fx.summary_dir().join("Rollout_plan_3_summary.md"))
        .expect("summary written");
    assert!(summary.starts_with("# Memory: Rollout plan\n"));
    assert!(summary.contains("**Workspace:** Ops"));
    assert!(summary.contains("### Part 1\n[LLM NOT CONFIGURED]"));

    let snapshot = fx.snapshot_dir().join("Ops").join("Rollout_plan_3.json");
    assert!(snapshot.exists());
    assert!(!fx.snapshot_dir().join("Ops").join("Rollout_plan_3.json.done").exists());

    let audit = fs::read_to_string(tmp.path().join("logs").join("audit.log")).expect("audit");
    assert!(audit.contains("\"phase\":\"extract\""));
    assert!(audit.contains("\"phase\":\"summarize\""));
}

#[test]
fn simulated_summaries_are_written_with_json_report() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());
    fx.group(1, "Ops", "ops")
        .thread(3, 1, "Rollout plan")
        .chat(1, Some(3), "Ship it", 1_700_000_000);

    let output = archivist(tmp.path())
        .env("ARCHIVIST_SIMULATE_SUMMARIES", "1")
        .args(["--json", "watch", "--once"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["command"], "watch");
    assert_eq!(report["ok"], false);

    let summary = fs::read_to_string(fx.summary_dir().join("Rollout_plan_3_summary.md"))
        .expect("summary written");
    assert!(summary.contains("- Simulated summary"));
}

#[test]
fn status_reports_paths_as_json() {
    let tmp = tempdir().expect("tempdir");
    let fx = Fixture::new(tmp.path());
    fx.group(1, "Ops", "ops");

    let output = archivist(tmp.path())
        .args(["--json", "status"])
        .output()
        .expect("run");
    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["command"], "status");
    assert_eq!(report["ok"], true);
    let details: Vec<String> = report["details"]
        .as_array()
        .expect("details")
        .iter()
        .filter_map(|d| d.as_str().map(str::to_string))
        .collect();
    assert!(details.iter().any(|d| d == "model=not configured"));
    assert!(details.iter().any(|d| d == "manifest.entries=0"));
}

#[test]
fn invalid_config_file_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("archivist.toml"),
        "[chunking]\nmax_chars = 0\n",
    )
    .expect("write config");
    archivist(tmp.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("E002_CONFIG_INVALID"));
}

#[test]
fn inspect_unknown_document_is_an_issue() {
    let tmp = tempdir().expect("tempdir");
    archivist(tmp.path())
        .args(["inspect", "Nope_1_summary.md"])
        .assert()
        .code(2)
        .stdout(predicates::str::contains("no manifest entry"));
}
