use assert_cmd::prelude::*;
use rstest::rstest;
use std::process::Command;
use tempfile::tempdir;

mod common;

fn json_lines(args: &[&str], env: Option<(&str, &str)>, success: bool) -> Vec<serde_json::Value> {
    let dir = tempdir().unwrap();
    let cfg = common::write_config(&dir, "");
    let mut cmd = Command::cargo_bin("claire").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(args);
    if let Some((k, v)) = env {
        cmd.env(k, v);
    }
    let assert = cmd.assert();
    let assert = if success {
        assert.success()
    } else {
        assert.failure()
    };
    let out = assert.get_output().stdout.clone();
    String::from_utf8_lossy(&out)
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| serde_json::from_str(l).expect("valid JSON"))
        .collect()
}

/// Validate the state line schema.
#[rstest]
fn state_schema() {
    let lines = json_lines(&["state"], None, true);
    let v = &lines[0];
    let tubes = v["tubes"].as_array().expect("tubes array");
    assert_eq!(tubes.len(), 2);
    assert_eq!(tubes[0]["tube"], 1);
    assert_eq!(tubes[0]["level_mm"], 400.0);
    assert_eq!(tubes[1]["level_mm"], 650.0);
    for t in tubes {
        assert!(t["inflow_duty"].as_f64().is_some());
        assert!(t["outflow_duty"].as_f64().is_some());
    }
}

#[rstest]
fn health_schema() {
    let lines = json_lines(&["health"], None, true);
    let v = &lines[0];
    assert_eq!(v["status"], "ok");
    assert_eq!(v["reader_alive"], true);
    assert_eq!(v["firmware"], "v1.0");
    assert!(v["heartbeat_ms"].as_u64().is_some());
}

/// Errors in JSON mode carry a stable reason and typed details.
#[rstest]
fn sensor_error_schema() {
    let lines = json_lines(&["state"], Some(("CLAIRE_TEST_SIM_FAULT", "1:1000")), false);
    let v = lines
        .iter()
        .find(|v| v.get("reason").is_some())
        .expect("error line");
    assert_eq!(v["reason"], "SensorError");
    assert_eq!(v["details"]["tube"], 1);
    assert!(v["details"]["raw_mm"].as_f64().unwrap() < 0.0);
    assert!(v["message"].as_str().unwrap().starts_with("What happened"));
}
