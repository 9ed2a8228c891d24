mod common;

use common::{GoalTrackProcess, fixture_path};

fn path_arg(path: &std::path::Path) -> String {
    path.to_str().expect("non-UTF-8 path").to_string()
}

// ============================================================================
// version command
// ============================================================================

#[test]
fn version_human() {
    let output = GoalTrackProcess::spawn_command(&["version"]);
    assert!(
        output.status.success(),
        "version should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("goaltrack"),
        "version output should contain 'goaltrack': {stdout}"
    );
    assert!(
        stdout.contains('.'),
        "version output should contain a version number: {stdout}"
    );
}

#[test]
fn version_json() {
    let output = GoalTrackProcess::spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("version JSON should be valid");
    assert_eq!(parsed["name"], "goaltrack");
    assert!(parsed.get("version").is_some(), "JSON should have 'version': {stdout}");
}

// ============================================================================
// validate command
// ============================================================================

#[test]
fn validate_accepts_fixtures() {
    let files = [
        fixture_path("dwell_regression.yaml"),
        fixture_path("sequence_order.yaml"),
        fixture_path("station_ops.yaml"),
        fixture_path("winner_stability.yaml"),
    ];
    let mut args = vec!["validate".to_string()];
    args.extend(files.iter().map(|p| path_arg(p)));
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let output = GoalTrackProcess::spawn_command(&args);
    assert!(
        output.status.success(),
        "validate should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches(": ok (").count(), 4, "stdout: {stdout}");
}

#[test]
fn validate_rejects_invalid_scenario() {
    let file = path_arg(&fixture_path("invalid_scenario.yaml"));
    let output = GoalTrackProcess::spawn_command(&["validate", &file]);
    assert_eq!(output.status.code(), Some(2), "config errors exit with 2");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("scenario.name"), "stderr: {stderr}");
    assert!(stderr.contains("'not' needs exactly 1 child"), "stderr: {stderr}");
}

#[test]
fn validate_missing_file() {
    let output = GoalTrackProcess::spawn_command(&["validate", "/nonexistent/scenario.yaml"]);
    assert_eq!(output.status.code(), Some(2));
}

// ============================================================================
// run command
// ============================================================================

#[test]
fn run_prints_human_report() {
    let file = path_arg(&fixture_path("dwell_regression.yaml"));
    let output = GoalTrackProcess::spawn_command(&["run", "--scenario", &file]);
    assert!(
        output.status.success(),
        "run should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scenario dwell-regression:"), "stdout: {stdout}");
    assert!(stdout.contains("[completed] landing - Land and stay put"), "stdout: {stdout}");
}

#[test]
fn run_json_report() {
    let file = path_arg(&fixture_path("sequence_order.yaml"));
    let output =
        GoalTrackProcess::spawn_command(&["run", "--scenario", &file, "--format", "json"]);
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report should be JSON");
    assert_eq!(report["scenario"], "sequence-order");
    assert_eq!(report["summary"]["steps_applied"], 3);
    let statuses: Vec<(&str, &str)> = report["contracts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| (c["id"].as_str().unwrap(), c["status"].as_str().unwrap()))
        .collect();
    assert_eq!(
        statuses,
        [("strict-checklist", "failed"), ("relaxed-checklist", "completed")]
    );
}

#[test]
fn run_writes_events_and_save_then_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("events.jsonl");
    let save = dir.path().join("save.yaml");
    let file = path_arg(&fixture_path("station_ops.yaml"));

    let output = GoalTrackProcess::spawn_command(&[
        "run",
        "--quiet",
        "--scenario",
        &file,
        "--events-file",
        &path_arg(&events),
        "--save",
        &path_arg(&save),
    ]);
    assert!(
        output.status.success(),
        "run should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty(), "--quiet prints nothing");

    let lines = std::fs::read_to_string(&events).unwrap();
    let last: serde_json::Value = serde_json::from_str(lines.lines().last().unwrap()).unwrap();
    assert_eq!(last["type"], "ScenarioFinished");
    assert_eq!(last["summary"]["completed"], 2);

    let saved = std::fs::read_to_string(&save).unwrap();
    assert!(saved.contains("TRACKER"), "save: {saved}");

    let output = GoalTrackProcess::spawn_command(&[
        "run",
        "--scenario",
        &file,
        "--resume",
        &path_arg(&save),
        "--format",
        "json",
    ]);
    assert!(
        output.status.success(),
        "resume should exit 0: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["summary"]["steps_applied"], 0);
    assert_eq!(report["summary"]["completed"], 2);
}

#[test]
fn run_invalid_scenario_exits_with_config_error() {
    let file = path_arg(&fixture_path("invalid_scenario.yaml"));
    let output = GoalTrackProcess::spawn_command(&["run", "--scenario", &file]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error:") || stderr.contains("error:"), "stderr: {stderr}");
}

#[test]
fn run_with_metrics_prints_prometheus_text() {
    let file = path_arg(&fixture_path("dwell_regression.yaml"));
    let output = GoalTrackProcess::spawn_command(&["run", "--scenario", &file, "--metrics"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("goaltrack_"), "stdout: {stdout}");
}
