//! Integration tests for the mend binary.
//!
//! These tests verify end-to-end behavior including:
//! - Record creation, display and listing
//! - Recovery progress and healing
//! - Reminders, statistics and export
//! - Deletion

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mend"))
}

/// Run `mend` against `data_dir` and return stdout, asserting success
fn run(data_dir: &Path, args: &[&str]) -> String {
    let output = cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .output()
        .expect("Failed to run mend");
    assert!(
        output.status.success(),
        "mend {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("stdout is not UTF-8")
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    serde_json::from_str(&run(data_dir, args)).expect("stdout is not JSON")
}

/// Log an injury and return its id
fn log_injury(data_dir: &Path, args: &[&str]) -> String {
    let mut full = vec!["log"];
    full.extend_from_slice(args);
    let stdout = run(data_dir, &full);
    stdout
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().last())
        .expect("no id printed")
        .to_string()
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Injury health records and recovery tracker",
        ));
}

#[test]
fn test_log_creates_store_layout() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    let id = log_injury(
        data_dir,
        &["--type", "Cut", "--severity", "minor", "--body-part", "Finger"],
    );

    assert!(data_dir.join("records").join(format!("{}.json", id)).exists());
    assert!(data_dir.join("photos").exists());
    let ledger = fs::read_to_string(data_dir.join("ids.ledger")).unwrap();
    assert!(ledger.contains(&id));

    let record = run_json(data_dir, &["show", &id, "--json"]);
    assert_eq!(record["injury_type"], "Cut");
    assert_eq!(record["severity"], "MINOR");
    assert_eq!(record["status"], "ACTIVE");
}

#[test]
fn test_log_requires_severity_without_analysis() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .args(["log", "--type", "Cut"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--severity is required"));
}

#[test]
fn test_unknown_severity_rejected() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .args(["log", "--type", "Cut", "--severity", "catastrophic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown severity"));
}

#[test]
fn test_emergency_without_analysis_rejected() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .args([
            "log",
            "--type",
            "Burn",
            "--severity",
            "severe",
            "--emergency",
            "emergency",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires an initial analysis"));
}

#[test]
fn test_log_from_analysis_and_toggle_steps() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let analysis_path = data_dir.join("analysis.json");
    fs::write(
        &analysis_path,
        r#"{
            "analysis_text": "Second-degree burn on the palm",
            "severity": "MODERATE",
            "emergency_level": "URGENT",
            "recommendation": "Cool and cover, see a doctor",
            "steps": ["Cool under running water", "Cover with cling film"]
        }"#,
    )
    .unwrap();

    let stdout = run(
        data_dir,
        &[
            "log",
            "--type",
            "Burn",
            "--analysis",
            analysis_path.to_str().unwrap(),
        ],
    );
    assert!(stdout.contains("[ ] 0. Cool under running water"));
    let id = stdout
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().last())
        .unwrap()
        .to_string();

    let stdout = run(data_dir, &["step", &id, "1"]);
    assert!(stdout.contains("[x] 1. Cover with cling film"));

    let record = run_json(data_dir, &["show", &id, "--json"]);
    assert_eq!(record["emergency_level"], "URGENT");
    assert_eq!(record["first_aid_steps"]["completed"], serde_json::json!([1]));

    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["step", &id, "5"])
        .assert()
        .failure();
}

#[test]
fn test_progress_to_healed() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Scrape", "--severity", "minor"]);

    run(data_dir, &["progress", &id, "--pain", "4", "--progress", "10"]);
    let stdout = run(data_dir, &["progress", &id, "--pain", "2", "--progress", "50"]);
    assert!(stdout.contains("HEALING"));
    let stdout = run(data_dir, &["progress", &id, "--pain", "0", "--progress", "100"]);
    assert!(stdout.contains("HEALED"));

    let record = run_json(data_dir, &["show", &id, "--json"]);
    assert_eq!(record["status"], "HEALED");
    assert_eq!(record["recovery_updates"].as_array().unwrap().len(), 3);
    assert!(record["healed_at"].is_string());

    let stats = run_json(data_dir, &["stats", "--json"]);
    assert_eq!(stats["total_records"], 1);
    assert_eq!(stats["healed_injuries"], 1);
    assert!(stats["average_recovery_seconds"].is_number());
}

#[test]
fn test_progress_drop_needs_regression() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Sprain", "--severity", "moderate"]);
    run(data_dir, &["progress", &id, "--pain", "3", "--progress", "60"]);

    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["progress", &id, "--pain", "6", "--progress", "40"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("regression"));

    run(
        data_dir,
        &["progress", &id, "--pain", "6", "--progress", "40", "--regression"],
    );
    let record = run_json(data_dir, &["show", &id, "--json"]);
    assert_eq!(record["recovery_updates"].as_array().unwrap().len(), 2);
    assert_eq!(record["recovery_updates"][1]["regression"], true);
}

#[test]
fn test_list_by_body_part_newest_first() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    let first = log_injury(data_dir, &["--type", "Cut", "--severity", "minor", "--body-part", "Finger"]);
    let ankle = log_injury(data_dir, &["--type", "Sprain", "--severity", "minor", "--body-part", "Ankle"]);
    let second = log_injury(data_dir, &["--type", "Burn", "--severity", "minor", "--body-part", "Finger"]);

    let listed = run_json(data_dir, &["list", "--body-part", "finger", "--json"]);
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
    assert!(!ids.contains(&ankle.as_str()));

    let page = run_json(data_dir, &["list", "--page", "1", "--page-size", "2", "--json"]);
    assert_eq!(page.as_array().unwrap().len(), 1);
}

#[test]
fn test_reminder_due_and_done() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Cut", "--severity", "minor"]);

    run(
        data_dir,
        &["remind", &id, "--label", "Change dressing", "--in-hours", "-1"],
    );
    run(data_dir, &["remind", &id, "--label", "Later", "--in-hours", "5"]);

    let due = run_json(data_dir, &["due", "--json"]);
    let due = due.as_array().unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0]["reminder"]["label"], "Change dressing");
    let index = due[0]["index"].as_u64().unwrap().to_string();

    run(data_dir, &["done", &id, &index]);
    assert!(run(data_dir, &["due"]).contains("Nothing due."));

    // Completing again is a no-op
    run(data_dir, &["done", &id, &index]);
}

#[test]
fn test_out_of_range_hours_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Cut", "--severity", "minor"]);

    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["remind", &id, "--label", "Never", "--in-hours", "9223372036854775807"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));

    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["med", &id, "--name", "Ibuprofen", "--dosage", "200mg", "--every", "4294967295"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("medication frequency"));

    // Neither attempt left anything behind, and planning still works
    let record = run_json(data_dir, &["show", &id, "--json"]);
    assert!(record["reminders"].as_array().unwrap().is_empty());
    assert!(record["medications"].as_array().unwrap().is_empty());
    run(data_dir, &["remind", &id, "--plan"]);
}

#[test]
fn test_plan_reminders_for_severe_injury() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Fracture", "--severity", "severe"]);

    let stdout = run(data_dir, &["remind", &id, "--plan"]);
    assert!(stdout.contains("Scheduled 4 reminders"));
    assert!(stdout.contains("follow_up"));

    let stdout = run(data_dir, &["remind", &id, "--plan"]);
    assert!(stdout.contains("Scheduled 0 reminders"));
}

#[test]
fn test_archived_record_is_read_only() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Cut", "--severity", "minor"]);

    run(data_dir, &["status", &id, "archived"]);
    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["note", &id, "too late"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("archived"));

    run(data_dir, &["show", &id]);
}

#[test]
fn test_photo_attach_and_delete() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Burn", "--severity", "minor"]);

    let photo_file = data_dir.join("burn.jpg");
    fs::write(&photo_file, b"\xff\xd8\xff fake jpeg").unwrap();
    run(
        data_dir,
        &["photo", &id, photo_file.to_str().unwrap(), "--caption", "day one"],
    );

    let photo_dir = data_dir.join("photos").join(&id);
    assert_eq!(fs::read_dir(&photo_dir).unwrap().count(), 1);
    let record = run_json(data_dir, &["show", &id, "--json"]);
    assert_eq!(record["photos"]["before"][0]["caption"], "day one");

    run(data_dir, &["delete", &id]);
    assert!(!photo_dir.exists());
    assert!(!data_dir.join("records").join(format!("{}.json", id)).exists());

    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["show", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
    assert!(run(data_dir, &["list"]).contains("No records."));
}

#[test]
fn test_export_csv_to_stdout() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Cut", "--severity", "minor"]);

    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["export", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "id,created_at,injury_type,severity,status,progress_percent,healing_stage",
        ))
        .stdout(predicate::str::contains(id));
}

#[test]
fn test_export_markdown_to_file() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let id = log_injury(data_dir, &["--type", "Sprain", "--severity", "moderate"]);
    run(data_dir, &["note", &id, "Iced for 20 minutes"]);

    let out = data_dir.join("export").join("report.md");
    run(
        data_dir,
        &["export", &id, "--format", "markdown", "--output", out.to_str().unwrap()],
    );

    let report = fs::read_to_string(&out).unwrap();
    assert!(report.starts_with("# Sprain"));
    assert!(report.contains("Iced for 20 minutes"));
}

#[test]
fn test_export_unknown_id_fails() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .args(["export", "00000000-0000-0000-0000-000000000001"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
}
