use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

const SCRIPT: &str = "def add(a, b):\n    # sum\n    return a + b\n\n\nprint(add(1, 2))\n";

fn write_project(dir: &Path, config: &str) {
    fs::write(dir.join("demo.py"), SCRIPT).expect("script should write");
    fs::write(dir.join("render.json"), config).expect("config should write");
}

fn run_codereel(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_codereel"))
        .current_dir(cwd)
        .env("RUST_LOG", "off")
        .args(args)
        .output()
        .expect("codereel command should run")
}

fn stderr_envelope(output: &std::process::Output) -> Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .expect("stderr should carry a JSON envelope");
    serde_json::from_str(line).expect("envelope should be JSON")
}

#[test]
fn check_reports_retained_lines() {
    let dir = tempdir().expect("tempdir should create");
    write_project(
        dir.path(),
        r#"{"script_path": "demo.py", "start_line": 1, "end_line": 6, "include_comments": false}"#,
    );
    let output = run_codereel(dir.path(), &["check", "render.json"]);
    assert!(output.status.success(), "check should succeed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("5 retained"), "stdout: {stdout}");
    assert!(stdout.contains("demo_1-6.mp4"), "stdout: {stdout}");
}

#[test]
fn plan_json_describes_layout_and_events() {
    let dir = tempdir().expect("tempdir should create");
    write_project(
        dir.path(),
        r#"{"script_path": "demo.py", "start_line": 1, "end_line": 6, "quality": "fast",
            "line_groups": ["1", "3", "ALL_REMAINING"]}"#,
    );
    let output = run_codereel(dir.path(), &["plan", "render.json", "--json"]);
    assert!(output.status.success(), "plan should succeed: {output:?}");
    let plan: Value = serde_json::from_slice(&output.stdout).expect("plan should be JSON");
    assert_eq!(plan["quality_dir"], "480p60");
    assert_eq!(plan["output_file"], "demo_1-6.mp4");
    assert_eq!(plan["line_count"], 6);
    let reveals = plan["events"]
        .as_array()
        .expect("events array")
        .iter()
        .filter(|event| event["event"] == "reveal")
        .map(|event| event["lines"].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        reveals,
        vec![
            serde_json::json!([1]),
            serde_json::json!([3]),
            serde_json::json!([2, 4, 5, 6])
        ]
    );
}

#[test]
fn range_errors_exit_with_client_code() {
    let dir = tempdir().expect("tempdir should create");
    write_project(
        dir.path(),
        r#"{"script_path": "demo.py", "start_line": 2, "end_line": 60}"#,
    );
    let output = run_codereel(dir.path(), &["check", "render.json"]);
    assert_eq!(output.status.code(), Some(2));
    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "CONFIG_RANGE");
    assert_eq!(envelope["error"]["details"]["file_length"], 6);
}

#[test]
fn strict_groups_rejects_repeated_lines() {
    let dir = tempdir().expect("tempdir should create");
    write_project(
        dir.path(),
        r#"{
            "script_path": "demo.py",
            "start_line": 1,
            "end_line": 6,
            "line_groups": ["1 2", "2 3"]
        }"#,
    );
    let lenient = run_codereel(dir.path(), &["check", "render.json"]);
    assert!(lenient.status.success(), "duplicates are skipped by default");

    let strict = run_codereel(dir.path(), &["check", "render.json", "--strict-groups"]);
    assert_eq!(strict.status.code(), Some(2));
    assert_eq!(stderr_envelope(&strict)["error"]["code"], "CONFIG_DUPLICATE_LINE");
}

#[test]
fn convert_writes_legacy_text() {
    let dir = tempdir().expect("tempdir should create");
    write_project(
        dir.path(),
        r#"{"script_path": "demo.py", "start_line": 1, "end_line": 3, "line_groups": ["SPLIT 2"]}"#,
    );
    let output = run_codereel(dir.path(), &["convert", "render.json", "--to", "legacy"]);
    assert!(output.status.success(), "convert should succeed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines = stdout.lines().collect::<Vec<_>>();
    assert!(lines[0].ends_with("demo.py"));
    assert_eq!(&lines[1..4], &["1", "3", "True"]);
    assert_eq!(lines.last(), Some(&"SPLIT 2"));
}

#[test]
fn unknown_video_is_not_found() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_codereel(
        dir.path(),
        &["download", "deadbeef", "--root", "data", "-o", "out.mp4"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_envelope(&output)["error"]["code"], "VIDEO_NOT_FOUND");

    let listing = run_codereel(dir.path(), &["videos", "--root", "data"]);
    assert!(listing.status.success());
    let videos: Value = serde_json::from_slice(&listing.stdout).expect("listing should be JSON");
    assert_eq!(videos, serde_json::json!([]));
}
