//! End-to-end tests: source -> aggregation -> detection -> alerts -> sink.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use trend_engine::prelude::*;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn jitter(i: usize) -> f64 {
    (((i * 37 + 11) % 17) as f64 / 16.0 - 0.5) * 0.06
}

/// Three observations per ten-minute bucket whose mean follows `means`.
fn observations_for(means: &[f64]) -> Vec<Observation> {
    means
        .iter()
        .enumerate()
        .flat_map(|(bucket, &m)| {
            [(1, m - 0.05), (4, m), (8, m + 0.05)].into_iter().map(move |(minute, score)| {
                Observation::new(
                    start() + Duration::minutes(10 * bucket as i64 + minute),
                    score.clamp(-1.0, 1.0),
                )
                .unwrap()
            })
        })
        .collect()
}

fn noisy_step_means() -> Vec<f64> {
    (0..30)
        .map(|i| if i < 15 { 0.1 } else { 0.7 } + jitter(i))
        .collect()
}

async fn seeded_source(key: &str, means: &[f64]) -> Arc<InMemoryObservationSource> {
    let source = Arc::new(InMemoryObservationSource::new());
    source.extend(key, observations_for(means)).await;
    source
}

#[tokio::test]
async fn test_noisy_step_across_methods() {
    let source = seeded_source("rust", &noisy_step_means()).await;
    let analyzer = TrendAnalyzer::builder().source(source).build().unwrap();

    let reports = analyzer
        .compare_methods(
            "rust",
            start(),
            start() + Duration::minutes(300),
            &DetectionMethod::ALL,
        )
        .await
        .unwrap();

    let located: Vec<(DetectionMethod, Vec<usize>)> = reports
        .iter()
        .map(|r| {
            (
                r.method,
                r.change_points.iter().map(|c| c.bucket_index).collect(),
            )
        })
        .collect();

    assert_eq!(
        located,
        vec![
            (DetectionMethod::Simple, vec![15]),
            (DetectionMethod::Cusum, vec![18]),
            (DetectionMethod::ZScore, vec![15, 16]),
            (DetectionMethod::Bayesian, vec![15]),
        ]
    );
    for report in &reports {
        assert_eq!(report.direction, TrendDirection::Increasing);
        assert_eq!(report.summary.observation_count, 90);
        assert_eq!(report.alerts.len(), report.change_points.len());
    }
}

#[tokio::test]
async fn test_empty_source_yields_insufficient_data() {
    let analyzer = TrendAnalyzer::builder()
        .source(Arc::new(InMemoryObservationSource::new()))
        .build()
        .unwrap();
    let report = analyzer
        .analyze("missing", start(), start() + Duration::hours(1))
        .await
        .unwrap();

    assert!(matches!(
        report.status,
        AnalysisStatus::InsufficientData { available: 0, .. }
    ));
    assert_eq!(report.direction, TrendDirection::Flat);
    assert!(report.alerts.is_empty());
    assert_eq!(report.buckets.len(), 6);
}

#[tokio::test]
async fn test_invalid_range_is_rejected_before_fetch() {
    let analyzer = TrendAnalyzer::builder()
        .source(Arc::new(InMemoryObservationSource::new()))
        .build()
        .unwrap();
    let err = analyzer
        .analyze("rust", start(), start() - Duration::minutes(1))
        .await
        .unwrap_err();
    assert!(matches!(err, TrendError::InvalidRange { .. }));
}

#[tokio::test]
async fn test_alert_arithmetic() {
    let source = Arc::new(InMemoryObservationSource::new());
    source
        .insert("rust", Observation::new(start() + Duration::minutes(2), 0.2).unwrap())
        .await;
    source
        .insert("rust", Observation::new(start() + Duration::minutes(12), 0.5).unwrap())
        .await;

    let analyzer = TrendAnalyzer::builder()
        .config(TrendConfig::default().with_threshold(0.25))
        .source(source)
        .build()
        .unwrap();
    let report = analyzer
        .analyze("rust", start(), start() + Duration::minutes(20))
        .await
        .unwrap();

    assert_eq!(report.alerts.len(), 1);
    let alert = &report.alerts[0];
    assert_eq!(alert.previous_value, 0.2);
    assert_eq!(alert.current_value, 0.5);
    assert!((alert.change_rate_pct - 150.0).abs() < 1e-9);
    assert_eq!(alert.change_point.kind, ChangeKind::Increase);
}

#[tokio::test]
async fn test_config_file_drives_analysis() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("trend.toml");
    std::fs::write(
        &config_path,
        r#"
method = "bayesian"
bucket_width_minutes = 10
min_segment_length = 8
min_change_rate_pct = 50.0
"#,
    )
    .unwrap();

    let config = TrendConfig::from_file(&config_path).unwrap();
    let source = seeded_source("rust", &noisy_step_means()).await;
    let analyzer = TrendAnalyzer::builder()
        .config(config)
        .source(source)
        .build()
        .unwrap();
    assert_eq!(analyzer.config().method(), DetectionMethod::Bayesian);

    let report = analyzer
        .analyze("rust", start(), start() + Duration::minutes(300))
        .await
        .unwrap();
    assert_eq!(report.change_points.len(), 1);
    assert_eq!(report.change_points[0].bucket_index, 15);
    // 0.1 -> 0.7 is far above the 50% floor
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].severity, AlertSeverity::Critical);
}

#[tokio::test]
async fn test_publish_to_json_lines_and_list_recent() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonLinesAlertSink::new(dir.path().join("alerts.jsonl")));

    let source = Arc::new(InMemoryObservationSource::new());
    let mut up_down = vec![0.6; 12];
    up_down.extend(vec![-0.2; 12]);
    up_down.extend(vec![0.5; 12]);
    source.extend("rust", observations_for(&up_down)).await;
    source.extend("go", observations_for(&noisy_step_means())).await;

    let analyzer = TrendAnalyzer::builder()
        .source(source)
        .sink(sink.clone())
        .build()
        .unwrap();

    let end = start() + Duration::minutes(360);
    analyzer.analyze_and_publish("rust", start(), end).await.unwrap();
    analyzer.analyze_and_publish("go", start(), end).await.unwrap();

    let rust = analyzer.recent_alerts(Some("rust"), 10).await.unwrap();
    let indices: Vec<_> = rust.iter().map(|a| a.change_point.bucket_index).collect();
    assert_eq!(indices, vec![24, 12]);

    let latest = analyzer.recent_alerts(None, 1).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].key, "rust");
    assert_eq!(latest[0].change_point.bucket_index, 24);

    let all = sink.recent_alerts(None, 100).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_shared_analyzer_serves_concurrent_requests() {
    let source = Arc::new(InMemoryObservationSource::new());
    for k in 0..8 {
        let shift = 0.1 * (k + 1) as f64;
        let means: Vec<f64> = (0..20)
            .map(|i| if i < 10 { 0.0 } else { shift + 0.25 })
            .collect();
        source.extend(&format!("key-{k}"), observations_for(&means)).await;
    }

    let analyzer = Arc::new(TrendAnalyzer::builder().source(source).build().unwrap());
    let handles: Vec<_> = (0..8)
        .map(|k| {
            let analyzer = Arc::clone(&analyzer);
            tokio::spawn(async move {
                analyzer
                    .analyze(&format!("key-{k}"), start(), start() + Duration::minutes(200))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.change_points.len(), 1, "{}", report.key);
        assert_eq!(report.change_points[0].bucket_index, 10);
    }
}

#[test]
fn test_report_serializes_to_json() {
    let analyzer = TrendAnalyzer::builder().build().unwrap();
    let mut means = vec![0.1; 10];
    means.extend(vec![0.9; 10]);
    let report = analyzer
        .analyze_observations(
            "rust",
            &observations_for(&means),
            start(),
            start() + Duration::minutes(200),
        )
        .unwrap();

    let json = serde_json::to_string(&report).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["key"], "rust");
    assert_eq!(value["direction"], "increasing");
    assert_eq!(value["status"]["kind"], "complete");
    assert_eq!(value["change_points"][0]["kind"], "increase");
    assert_eq!(value["alerts"][0]["severity"], "critical");
    assert_eq!(value["buckets"].as_array().unwrap().len(), 20);
}
