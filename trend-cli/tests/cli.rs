//! Runs the `trend-detect` binary end to end.

use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn write_step_input(dir: &TempDir) -> std::path::PathBuf {
    let mut lines = Vec::new();
    for bucket in 0..20 {
        let score = if bucket < 10 { 0.1 } else { 0.9 };
        for minute in [2, 6] {
            lines.push(format!(
                r#"{{"key": "rust", "timestamp": "2024-07-01T{:02}:{:02}:00Z", "score": {score}}}"#,
                (bucket * 10 + minute) / 60,
                (bucket * 10 + minute) % 60,
            ));
        }
        lines.push(format!(
            r#"{{"key": "go", "timestamp": "2024-07-01T{:02}:{:02}:00Z", "score": -0.4}}"#,
            (bucket * 10 + 5) / 60,
            (bucket * 10 + 5) % 60,
        ));
    }
    let path = dir.path().join("observations.jsonl");
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn test_single_report_and_alert_file() {
    let dir = TempDir::new().unwrap();
    let input = write_step_input(&dir);
    let alerts = dir.path().join("alerts.jsonl");

    let output = Command::new(env!("CARGO_BIN_EXE_trend-detect"))
        .env_remove("TREND_METHOD")
        .env("RUST_LOG", "off")
        .args(["--key", "rust", "--hours", "4", "--end", "2024-07-01T03:20:00Z"])
        .arg("--input")
        .arg(&input)
        .arg("--alerts-out")
        .arg(&alerts)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["key"], "rust");
    assert_eq!(report["method"], "simple");
    assert_eq!(report["summary"]["observation_count"], 40);
    let indices: Vec<u64> = report["change_points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["bucket_index"].as_u64().unwrap())
        .collect();
    // window starts at 23:20 the previous day, so the shift lands in bucket 14
    assert_eq!(indices, vec![14]);

    let written = fs::read_to_string(&alerts).unwrap();
    assert_eq!(written.lines().count(), 1);
}

#[test]
fn test_compare_prints_one_report_per_method() {
    let dir = TempDir::new().unwrap();
    let input = write_step_input(&dir);

    let output = Command::new(env!("CARGO_BIN_EXE_trend-detect"))
        .env("RUST_LOG", "off")
        .args(["--key", "go", "--hours", "4", "--end", "2024-07-01T03:20:00Z", "--compare"])
        .arg("--input")
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    let methods: Vec<&str> = reports.iter().map(|r| r["method"].as_str().unwrap()).collect();
    assert_eq!(methods, vec!["simple", "cusum", "zscore", "bayesian"]);
    for report in &reports {
        assert!(report["change_points"].as_array().unwrap().is_empty());
        assert_eq!(report["direction"], "flat");
    }
}

#[test]
fn test_unknown_method_fails() {
    let dir = TempDir::new().unwrap();
    let input = write_step_input(&dir);

    let output = Command::new(env!("CARGO_BIN_EXE_trend-detect"))
        .env("RUST_LOG", "off")
        .args(["--key", "rust", "--method", "fourier"])
        .arg("--input")
        .arg(&input)
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_hours_beyond_date_range_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let input = write_step_input(&dir);

    for extra in [&[][..], &["--compare"][..]] {
        let output = Command::new(env!("CARGO_BIN_EXE_trend-detect"))
            .env_remove("TREND_METHOD")
            .env("RUST_LOG", "off")
            .args(["--key", "rust", "--hours", "10000000000"])
            .args(extra)
            .arg("--input")
            .arg(&input)
            .output()
            .unwrap();
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(!stderr.contains("panicked"), "{stderr}");
        assert!(stderr.contains("date range"), "{stderr}");
    }
}
