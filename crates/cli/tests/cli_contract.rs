use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should contain valid json")
}

#[test]
fn simulate_prints_snapshot_after_navigation() {
    let output = cargo_bin_cmd!("pageflow")
        .args(["simulate", "--pages", "500", "--page-size", "600x800", "--viewport", "900x1000"])
        .args(["--center", "250", "--goto", "10:0.5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    let snapshot = &value["snapshot"];
    assert_eq!(snapshot["document"], "ready");
    assert_eq!(snapshot["page_count"], 500);

    let mounted: Vec<u64> = snapshot["mounted"]
        .as_array()
        .expect("mounted should be an array")
        .iter()
        .filter_map(Value::as_u64)
        .collect();
    assert!(mounted.len() <= 8, "mounted = {mounted:?}");
    assert!((8..=12).all(|page| mounted.contains(&page)), "mounted = {mounted:?}");

    assert_eq!(snapshot["navigation"]["status"], "converged");
    assert_eq!(snapshot["navigation"]["page_no"], 10);
    let scroll_top = snapshot["scroll_top"].as_f64().expect("scroll_top should be a number");
    assert!((scroll_top - 7524.0).abs() < 1.0, "scroll_top = {scroll_top}");
}

#[test]
fn simulate_can_include_event_log() {
    let output = cargo_bin_cmd!("pageflow")
        .args(["simulate", "--pages", "20", "--events"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    let events = value["events"].as_array().expect("events should be an array");
    assert_eq!(events[0]["event"], "loaded");
    assert_eq!(events[0]["page_count"], 20);
    assert!(events.iter().any(|event| event["event"] == "window_changed"));
}

#[test]
fn simulate_omits_events_by_default() {
    let output = cargo_bin_cmd!("pageflow")
        .args(["simulate", "--pages", "5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert!(value.get("events").is_none());
    assert_eq!(value["snapshot"]["mounted"], serde_json::json!([1, 2, 3]));
}

#[test]
fn simulate_rejects_bad_target() {
    cargo_bin_cmd!("pageflow")
        .args(["simulate", "--pages", "5", "--goto", "zero:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid navigation target"));
}

#[test]
fn config_reads_toml_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("pageflow.toml");
    std::fs::write(&path, "max_mounted_pages = 6\ndebounce_ms = 120\n").expect("config written");

    let output = cargo_bin_cmd!("pageflow")
        .arg("config")
        .arg("--config")
        .arg(&path)
        .env_remove("PAGEFLOW_MAX_MOUNTED_PAGES")
        .env_remove("PAGEFLOW_DEBOUNCE_MS")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["max_mounted_pages"], 6);
    assert_eq!(value["debounce_ms"], 120);
    assert_eq!(value["buffer_pages"], 2);
}

#[test]
fn config_applies_environment_overrides() {
    let output = cargo_bin_cmd!("pageflow")
        .arg("config")
        .env("PAGEFLOW_MAX_MOUNTED_PAGES", "5")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(stdout_json(&output)["max_mounted_pages"], 5);
}

#[test]
fn config_fails_for_missing_file() {
    cargo_bin_cmd!("pageflow")
        .args(["config", "--config", "does-not-exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file does not exist"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pageflow")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
