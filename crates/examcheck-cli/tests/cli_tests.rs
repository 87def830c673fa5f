//! CLI integration tests using assert_cmd.

use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use examcheck_core::command::{TakeExamCommand, TAKE_EXAM};
use examcheck_core::context::Language;
use examcheck_core::exam::ExamConfiguration;
use examcheck_core::question::QuestionSet;
use examcheck_core::result::{key, ExamResult, Origin};
use examcheck_core::settings::{Settings, Workarounds};

fn examcheck() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("examcheck").unwrap()
}

/// A command that runs in the given directory without picking up a
/// user-level config.
fn examcheck_in(dir: &Path) -> Command {
    let mut cmd = examcheck();
    cmd.current_dir(dir).env("HOME", dir).env_remove("EXAMCHECK_DATABASE");
    cmd
}

const FAST_CONFIG: &str = r#"
[run]
wait_time = 0.0
master_seed = 42

[settings]
num_deterministic_machines = 2
crash_frequency = 0
"#;

fn write_result(path: &Path, score: &str) {
    let mut result = ExamResult::new(Origin::Recorded);
    result.add(key(["xls", "score_reached"]), score).unwrap();
    result.add(key(["xls", "score_maximum"]), "3").unwrap();
    result.save_json(path).unwrap();
}

// ---------------------------------------------------------------------------
// init / validate
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config() {
    let dir = TempDir::new().unwrap();

    examcheck_in(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created examcheck.toml"));

    let content = std::fs::read_to_string(dir.path().join("examcheck.toml")).unwrap();
    assert!(content.contains("[machines]"));
    assert!(content.contains("# crash_frequency = "));

    examcheck_in(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn validate_starter_config() {
    let dir = TempDir::new().unwrap();
    examcheck_in(dir.path()).arg("init").assert().success();

    examcheck_in(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Machines: 2"))
        .stdout(predicate::str::contains("test_passes = AVR"))
        .stdout(predicate::str::contains("Configuration valid."));
}

#[test]
fn validate_rejects_unknown_pass() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[settings]\ntest_passes = \"AVZ\"\n").unwrap();

    examcheck_in(dir.path())
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"))
        .stderr(predicate::str::contains("unknown test pass 'Z'"));
}

#[test]
fn validate_nonexistent_file() {
    examcheck()
        .arg("validate")
        .arg("--config")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

// ---------------------------------------------------------------------------
// compare
// ---------------------------------------------------------------------------

#[test]
fn compare_matching_results() {
    let dir = TempDir::new().unwrap();
    let expected = dir.path().join("expected.json");
    let actual = dir.path().join("actual.json");
    write_result(&expected, "2.5");
    write_result(&actual, "2.5");

    examcheck()
        .arg("compare")
        .arg("--expected")
        .arg(&expected)
        .arg("--actual")
        .arg(&actual)
        .arg("--fail-on-mismatch")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 matching, 0 differing"))
        .stdout(predicate::str::contains("Results match."));
}

#[test]
fn compare_mismatch_fails_when_asked() {
    let dir = TempDir::new().unwrap();
    let expected = dir.path().join("expected.json");
    let actual = dir.path().join("actual.json");
    write_result(&expected, "2.5");
    write_result(&actual, "2.75");

    examcheck()
        .arg("compare")
        .arg("--expected")
        .arg(&expected)
        .arg("--actual")
        .arg(&actual)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 differing"))
        .stdout(predicate::str::contains("xls / score_reached: 2.5 != 2.75"));

    examcheck()
        .arg("compare")
        .arg("--expected")
        .arg(&expected)
        .arg("--actual")
        .arg(&actual)
        .arg("--fail-on-mismatch")
        .arg("--format")
        .arg("markdown")
        .assert()
        .failure()
        .stdout(predicate::str::contains("| FAIL | xls / score_reached | 2.5 | 2.75 |"));
}

#[test]
fn compare_missing_file() {
    let dir = TempDir::new().unwrap();
    let expected = dir.path().join("expected.json");
    write_result(&expected, "1");

    examcheck()
        .arg("compare")
        .arg("--expected")
        .arg(&expected)
        .arg("--actual")
        .arg(dir.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read result"));
}

// ---------------------------------------------------------------------------
// session
// ---------------------------------------------------------------------------

fn take_exam_command() -> TakeExamCommand {
    TakeExamCommand {
        command: TAKE_EXAM.to_string(),
        machine: "machine1".to_string(),
        machine_index: 1,
        username: "tu_1".to_string(),
        password: "secret".to_string(),
        test_id: "7".to_string(),
        test_url: "sim://exam/test/7".to_string(),
        server_url: "sim://exam".to_string(),
        wait_time: 0.0,
        admin_lang: Language::En,
        questions: QuestionSet::demo(),
        exam_configuration: ExamConfiguration::default(),
        settings: Settings {
            crash_frequency: 0,
            ..Settings::default()
        },
        workarounds: Workarounds::default(),
    }
}

#[test]
fn session_streams_records() {
    let input = take_exam_command().to_json().unwrap();
    let output = examcheck()
        .arg("session")
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let records: Vec<(String, String)> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records[0].0, "ECHO");
    assert!(records[0].1.starts_with("running test on machine #1"));

    let (tag, payload) = records.last().unwrap();
    assert_eq!(tag, "DONE");
    let result = ExamResult::from_json(payload).unwrap();
    assert!(!result.has_errors(), "{:?}", result.errors());
    assert!(!result.answers().is_empty());
}

#[test]
fn session_rejects_garbage() {
    examcheck()
        .arg("session")
        .write_stdin("{\"command\": \"reboot\"}")
        .assert()
        .failure()
        .stdout(predicate::str::starts_with("[\"ERROR\""))
        .stderr(predicate::str::contains("invalid take-exam command"));
}

// ---------------------------------------------------------------------------
// master / report
// ---------------------------------------------------------------------------

#[test]
fn master_run_is_stored_and_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("examcheck.toml");
    std::fs::write(&config, FAST_CONFIG).unwrap();
    let db = dir.path().join("results.db");

    examcheck_in(dir.path())
        .arg("master")
        .arg("--machines")
        .arg("2")
        .arg("--database")
        .arg(&db)
        .assert()
        .success()
        .stderr(predicate::str::contains("2 machine(s) on test 'Demo'"))
        .stderr(predicate::str::contains("Coverage so far"));

    examcheck_in(dir.path())
        .arg("report")
        .arg("--database")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Runs: 1"))
        .stdout(predicate::str::contains("Coverage:"));

    let output = examcheck_in(dir.path())
        .arg("report")
        .arg("--database")
        .arg(&db)
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(summary["counts"]["OK"], 1);
    assert!(summary["coverage"]["percentage"].as_f64().unwrap() > 0.0);
    assert!(summary["performance"]["samples"].as_u64().unwrap() > 0);

    let batch = summary["runs"][0]["batch"].as_str().unwrap().to_string();
    let files = dir.path().join("files");
    examcheck_in(dir.path())
        .arg("report")
        .arg("--database")
        .arg(&db)
        .arg("--extract")
        .arg(&batch)
        .arg("--output")
        .arg(&files)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("from {batch}")));
}

#[test]
fn master_detects_corrupt_export() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("examcheck.toml"), FAST_CONFIG).unwrap();

    examcheck_in(dir.path())
        .arg("master")
        .arg("--fault")
        .arg("corrupt-export")
        .arg("--database")
        .arg(dir.path().join("results.db"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("run finished with FAIL/integrity"));
}

#[test]
fn report_without_database() {
    let dir = TempDir::new().unwrap();
    examcheck_in(dir.path())
        .arg("report")
        .arg("--database")
        .arg(dir.path().join("none.db"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("results database not found"));
}

// ---------------------------------------------------------------------------
// machine / probe
// ---------------------------------------------------------------------------

/// Kills the worker even when an assertion fails.
struct Worker(std::process::Child);

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn probe_runs_sessions_on_a_worker() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let _worker = Worker(
        std::process::Command::new(assert_cmd::cargo::cargo_bin("examcheck"))
            .arg("machine")
            .arg("--listen")
            .arg(format!("127.0.0.1:{port}"))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap(),
    );

    let config = dir.path().join("examcheck.toml");
    std::fs::write(
        &config,
        format!(
            "[machines]\nworker1 = \"http://127.0.0.1:{port}\"\n\n\
             [run]\npoll_interval_ms = 50\nmax_retries = 10\nretry_delay_ms = 100\n\n\
             [settings]\ncrash_frequency = 0\n"
        ),
    )
    .unwrap();

    examcheck_in(dir.path())
        .arg("probe")
        .timeout(Duration::from_secs(120))
        .assert()
        .success()
        .stdout(predicate::str::contains("worker1"))
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn probe_needs_machines() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("examcheck.toml"), FAST_CONFIG).unwrap();

    examcheck_in(dir.path())
        .arg("probe")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no [machines] configured"));
}
