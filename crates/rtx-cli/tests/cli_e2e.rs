//! End-to-end CLI tests. These exercise the binary without touching the
//! network: empty projects produce empty working sets, and usage errors
//! must fail before any scheduling happens.

use assert_cmd::Command;
use predicates::prelude::*;

fn rtx() -> Command {
    let mut cmd = Command::cargo_bin("rtx").expect("binary built");
    // Keep runs hermetic: no config file pickup from the repo.
    cmd.env("RTX_CONFIG", "");
    cmd.env_remove("RTX_LOG");
    cmd
}

#[test]
fn list_managers_names_all_scanners() {
    rtx()
        .arg("list-managers")
        .assert()
        .success()
        .stdout(predicate::str::contains("npm"))
        .stdout(predicate::str::contains("package-lock.json"))
        .stdout(predicate::str::contains("Cargo.lock"))
        .stdout(predicate::str::contains("requirements.txt"));
}

#[test]
fn scan_of_empty_project_is_exit_zero() {
    let td = tempfile::tempdir().expect("tempdir");
    rtx()
        .arg("--project-root")
        .arg(td.path())
        .arg("--format")
        .arg("json")
        .arg("scan")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("\"schema_version\": 1"))
        .stdout(predicate::str::contains("\"exit_code\": 0"));
}

#[test]
fn unknown_manager_fails_with_usage_exit() {
    let td = tempfile::tempdir().expect("tempdir");
    rtx()
        .arg("--project-root")
        .arg(td.path())
        .arg("scan")
        .arg("--manager")
        .arg("homebrew")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown ecosystem"));
}

#[test]
fn unknown_flag_value_fails_with_usage_exit() {
    rtx()
        .arg("--format")
        .arg("xml")
        .arg("scan")
        .assert()
        .code(3);
}

#[test]
fn bad_deadline_fails_before_scanning() {
    let td = tempfile::tempdir().expect("tempdir");
    rtx()
        .arg("--project-root")
        .arg(td.path())
        .arg("--deadline")
        .arg("not-a-duration")
        .arg("scan")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("invalid --deadline"));
}

#[test]
fn diagnostics_prints_sources_and_thresholds() {
    let td = tempfile::tempdir().expect("tempdir");
    rtx()
        .arg("--project-root")
        .arg(td.path())
        .arg("diagnostics")
        .assert()
        .success()
        .stdout(predicate::str::contains("source osv:"))
        .stdout(predicate::str::contains("global_concurrency: 16"))
        .stdout(predicate::str::contains("abandonment_threshold_days: 540"));
}

#[test]
fn report_roundtrips_saved_json() {
    let td = tempfile::tempdir().expect("tempdir");
    let report_path = td.path().join("report.json");

    rtx()
        .arg("--project-root")
        .arg(td.path())
        .arg("--format")
        .arg("json")
        .arg("--output")
        .arg(&report_path)
        .arg("scan")
        .assert()
        .code(0);

    rtx()
        .arg("report")
        .arg(&report_path)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("no dependencies evaluated"));
}

#[test]
fn report_rejects_non_report_input() {
    let td = tempfile::tempdir().expect("tempdir");
    let bogus = td.path().join("bogus.json");
    std::fs::write(&bogus, "{\"hello\": 1}").expect("write");

    rtx()
        .arg("report")
        .arg(&bogus)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not a saved rtx report"));
}

#[test]
fn malformed_lockfile_warns_but_completes() {
    let td = tempfile::tempdir().expect("tempdir");
    std::fs::write(td.path().join("package-lock.json"), "{ not json").expect("write");

    rtx()
        .arg("--project-root")
        .arg(td.path())
        .arg("--format")
        .arg("json")
        .arg("scan")
        .assert()
        .code(0)
        .stderr(predicate::str::contains("scanner failed"));
}
