//! Trend analysis orchestration.
//!
//! [`TrendAnalyzer`] ties the pieces together for one key and time range:
//! fetch observations, bucket them, run the configured detector over the
//! non-empty buckets, and turn each change point into an [`Alert`].
//!
//! ## Example
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use trend_engine::prelude::*;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let observations: Vec<Observation> = (0..20)
//!     .map(|i| {
//!         let score = if i < 10 { 0.2 } else { 0.6 };
//!         Observation::new(start + Duration::minutes(10 * i + 1), score).unwrap()
//!     })
//!     .collect();
//!
//! let analyzer = TrendAnalyzer::builder().build().unwrap();
//! let report = analyzer
//!     .analyze_observations("rust", &observations, start, start + Duration::minutes(200))
//!     .unwrap();
//!
//! assert_eq!(report.direction, TrendDirection::Increasing);
//! assert_eq!(report.alerts.len(), 1);
//! assert!((report.alerts[0].change_rate_pct - 200.0).abs() < 1e-6);
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn, Level};

use crate::aggregate::{BucketSeries, TimeSeriesAggregator};
use crate::alert::Alert;
use crate::config::{DetectionMethod, TrendConfig, ValidatedConfig};
use crate::detectors::{ChangeDetector, Detector};
use crate::error::{TrendError, TrendResult};
use crate::logging::{truncate_field, LogConfig};
use crate::model::{ChangePoint, Observation, TimeBucket, TrendDirection};
use crate::store::{AlertSink, ObservationSource};
use crate::{log_bucket, log_change_point};

/// Whether a report carries detection results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Detection ran over the full series.
    Complete,
    /// Too few non-empty buckets for the selected detector; detection skipped.
    InsufficientData { required: usize, available: usize },
}

/// Descriptive statistics of the analyzed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// Observations that fell inside the range.
    pub observation_count: usize,
    pub non_empty_buckets: usize,
    /// Observation-weighted mean score over the range.
    pub mean_score: Option<f64>,
    /// Least-squares slope of bucket means against bucket index.
    pub slope: Option<f64>,
}

/// The result of analyzing one key over one range with one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub key: String,
    pub method: DetectionMethod,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub direction: TrendDirection,
    pub status: AnalysisStatus,
    pub summary: TrendSummary,
    pub buckets: Vec<TimeBucket>,
    pub change_points: Vec<ChangePoint>,
    pub alerts: Vec<Alert>,
}

impl TrendReport {
    pub fn is_complete(&self) -> bool {
        self.status == AnalysisStatus::Complete
    }
}

/// Least-squares slope of `value` against `bucket_index`.
fn regression_slope(series: &BucketSeries) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }
    let n = series.len() as f64;
    let points = series.points();
    let mean_x = points.iter().map(|p| p.bucket_index as f64).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.value).sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for p in points {
        let dx = p.bucket_index as f64 - mean_x;
        sxy += dx * (p.value - mean_y);
        sxx += dx * dx;
    }
    (sxx > 0.0).then(|| sxy / sxx)
}

fn weighted_mean(buckets: &[TimeBucket]) -> Option<f64> {
    let (sum, count) = buckets
        .iter()
        .filter_map(|b| b.mean_score.map(|m| (m * b.count as f64, b.count)))
        .fold((0.0, 0usize), |(s, c), (m, n)| (s + m, c + n));
    (count > 0).then(|| sum / count as f64)
}

/// The `[now - hours, now)` range used by [`TrendAnalyzer::analyze_recent`].
///
/// # Errors
///
/// Returns [`TrendError::InvalidConfig`] if `hours` is not positive or the
/// window reaches outside the representable date range.
pub fn recent_window(
    hours: i64,
    now: DateTime<Utc>,
) -> TrendResult<(DateTime<Utc>, DateTime<Utc>)> {
    if hours <= 0 {
        return Err(TrendError::invalid_config(format!(
            "hours must be positive, got {hours}"
        )));
    }
    let start = Duration::try_hours(hours)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            TrendError::invalid_config(format!(
                "a window of {hours} hours before {now} is outside the supported date range"
            ))
        })?;
    Ok((start, now))
}

/// Inputs shared by every detection run over one aggregated range.
struct DetectionInput<'a> {
    key: &'a str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    buckets: &'a [TimeBucket],
}

/// Runs one detector over aggregated buckets and assembles the report.
///
/// Synchronous and free of I/O so it can run on a blocking thread.
fn run_detection(config: &ValidatedConfig, log: &LogConfig, input: DetectionInput<'_>) -> TrendReport {
    let params = config.params();
    let method = config.method();
    let series = BucketSeries::from_buckets(input.buckets);
    let detector = Detector::from_config(config);

    for point in series.points() {
        log_bucket!(
            log,
            bucket = point.bucket_index,
            at = %point.at,
            value = point.value,
            "Series point"
        );
    }

    let slope = regression_slope(&series);
    let summary = TrendSummary {
        observation_count: input.buckets.iter().map(|b| b.count).sum(),
        non_empty_buckets: series.len(),
        mean_score: weighted_mean(input.buckets),
        slope,
    };

    let required = detector.min_points().max(2);
    let mut report = TrendReport {
        key: input.key.to_string(),
        method,
        start: input.start,
        end: input.end,
        direction: TrendDirection::Flat,
        status: AnalysisStatus::Complete,
        summary,
        buckets: input.buckets.to_vec(),
        change_points: Vec::new(),
        alerts: Vec::new(),
    };

    if series.len() < required {
        debug!(
            required,
            available = series.len(),
            detector = detector.name(),
            "Insufficient data for detection"
        );
        report.status = AnalysisStatus::InsufficientData {
            required,
            available: series.len(),
        };
        return report;
    }

    report.direction = slope
        .map(|s| TrendDirection::from_slope(s, params.flat_slope_epsilon))
        .unwrap_or(TrendDirection::Flat);
    report.change_points = detector.detect(&series);

    for cp in &report.change_points {
        log_change_point!(
            log,
            key = %truncate_field(input.key, log.max_field_length),
            method = %method,
            bucket = cp.bucket_index,
            kind = %cp.kind,
            magnitude = cp.magnitude,
            confidence = cp.confidence,
            "Change point detected"
        );
    }

    if params.alerts_enabled {
        report.alerts = build_alerts(input.key, method, &series, &report.change_points, params);
    }

    report
}

fn build_alerts(
    key: &str,
    method: DetectionMethod,
    series: &BucketSeries,
    change_points: &[ChangePoint],
    params: &TrendConfig,
) -> Vec<Alert> {
    let points = series.points();
    let mut alerts = Vec::with_capacity(change_points.len());

    for cp in change_points {
        let position = match points.binary_search_by_key(&cp.bucket_index, |p| p.bucket_index) {
            Ok(position) if position > 0 => position,
            _ => {
                warn!(
                    bucket = cp.bucket_index,
                    "Change point has no preceding non-empty bucket, no alert raised"
                );
                continue;
            }
        };
        let alert = Alert::new(
            key,
            method,
            cp.clone(),
            points[position - 1].value,
            points[position].value,
        );
        if alert.change_rate_pct.abs() >= params.min_change_rate_pct {
            alerts.push(alert);
        } else {
            debug!(
                bucket = cp.bucket_index,
                change_rate_pct = alert.change_rate_pct,
                min_change_rate_pct = params.min_change_rate_pct,
                "Change rate below alert threshold"
            );
        }
    }

    alerts
}

/// Orchestrates aggregation, detection and alert shaping.
///
/// Holds only immutable state; share it behind an `Arc` to serve concurrent
/// requests.
pub struct TrendAnalyzer {
    config: ValidatedConfig,
    aggregator: TimeSeriesAggregator,
    source: Option<Arc<dyn ObservationSource>>,
    sink: Option<Arc<dyn AlertSink>>,
    log: LogConfig,
}

impl TrendAnalyzer {
    /// Creates a new builder for the trend analyzer.
    pub fn builder() -> TrendAnalyzerBuilder {
        TrendAnalyzerBuilder::default()
    }

    /// The validated configuration in use.
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Analyzes observations supplied by the caller.
    ///
    /// This is the pure entry point: no source or sink is consulted.
    #[instrument(skip(self, observations), fields(method = %self.config.method(), observations = observations.len()))]
    pub fn analyze_observations(
        &self,
        key: &str,
        observations: &[Observation],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<TrendReport> {
        let buckets = self.aggregator.aggregate(observations, start, end)?;
        let report = run_detection(
            &self.config,
            &self.log,
            DetectionInput {
                key,
                start,
                end,
                buckets: &buckets,
            },
        );
        if self.log.enabled(Level::INFO) {
            info!(
                direction = %report.direction,
                change_points = report.change_points.len(),
                alerts = report.alerts.len(),
                "Trend analysis complete"
            );
        }
        Ok(report)
    }

    /// Fetches observations for `key` from the configured source and analyzes
    /// them.
    #[instrument(skip(self), fields(method = %self.config.method()))]
    pub async fn analyze(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<TrendReport> {
        let observations = self.fetch(key, start, end).await?;
        self.analyze_observations(key, &observations, start, end)
    }

    /// Analyzes the `hours` hours ending at `now`.
    pub async fn analyze_recent(
        &self,
        key: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> TrendResult<TrendReport> {
        let (start, end) = recent_window(hours, now)?;
        self.analyze(key, start, end).await
    }

    /// Runs several detectors over the same data.
    ///
    /// Observations are fetched and bucketed once; each method then runs on
    /// its own blocking task. Reports are returned in the order of `methods`.
    #[instrument(skip(self))]
    pub async fn compare_methods(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        methods: &[DetectionMethod],
    ) -> TrendResult<Vec<TrendReport>> {
        let observations = self.fetch(key, start, end).await?;
        let buckets: Arc<[TimeBucket]> = self.aggregator.aggregate(&observations, start, end)?.into();

        let tasks = methods.iter().map(|&method| {
            let config = self.config.for_method(method);
            let log = self.log.clone();
            let buckets = Arc::clone(&buckets);
            let key = key.to_string();
            async move {
                let report = tokio::task::spawn_blocking(move || {
                    run_detection(
                        &config,
                        &log,
                        DetectionInput {
                            key: &key,
                            start,
                            end,
                            buckets: &buckets,
                        },
                    )
                })
                .await?;
                Ok::<_, TrendError>(report)
            }
        });

        let reports = try_join_all(tasks).await?;
        info!(methods = reports.len(), "Compared detection methods");
        Ok(reports)
    }

    /// Analyzes a range and forwards the resulting alerts to the sink.
    pub async fn analyze_and_publish(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<TrendReport> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| TrendError::invalid_config("no alert sink configured"))?;
        let report = self.analyze(key, start, end).await?;
        if !report.alerts.is_empty() {
            sink.publish(&report.alerts).await?;
        }
        Ok(report)
    }

    /// Returns recent alerts from the configured sink.
    pub async fn recent_alerts(&self, key: Option<&str>, limit: usize) -> TrendResult<Vec<Alert>> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| TrendError::invalid_config("no alert sink configured"))?;
        sink.recent_alerts(key, limit).await
    }

    async fn fetch(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<Vec<Observation>> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| TrendError::invalid_config("no observation source configured"))?;
        if end <= start {
            return Err(TrendError::invalid_range(start, end));
        }
        let observations = source.fetch_observations(key, start, end).await?;
        debug!(fetched = observations.len(), "Fetched observations");
        Ok(observations)
    }
}

/// Builder for [`TrendAnalyzer`].
#[derive(Default)]
pub struct TrendAnalyzerBuilder {
    config: Option<TrendConfig>,
    source: Option<Arc<dyn ObservationSource>>,
    sink: Option<Arc<dyn AlertSink>>,
    log: LogConfig,
}

impl TrendAnalyzerBuilder {
    /// Sets the configuration. It is validated by [`build`](Self::build).
    pub fn config(mut self, config: TrendConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the observation source used by the async entry points.
    pub fn source(mut self, source: Arc<dyn ObservationSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the alert sink used by [`TrendAnalyzer::analyze_and_publish`].
    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the logging verbosity for per-bucket and per-change diagnostics.
    pub fn log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Validates the configuration and builds the analyzer.
    pub fn build(self) -> TrendResult<TrendAnalyzer> {
        let config = self.config.unwrap_or_default().validate()?;
        let aggregator = TimeSeriesAggregator::from_config(&config)?;
        Ok(TrendAnalyzer {
            config,
            aggregator,
            source: self.source,
            sink: self.sink,
            log: self.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSeverity;
    use crate::model::ChangeKind;
    use crate::store::{InMemoryAlertSink, InMemoryObservationSource};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    /// One observation in the middle of each ten-minute bucket.
    fn observations(values: &[f64]) -> Vec<Observation> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                Observation::new(start() + Duration::minutes(10 * i as i64 + 5), v).unwrap()
            })
            .collect()
    }

    fn end_for(n: usize) -> DateTime<Utc> {
        start() + Duration::minutes(10 * n as i64)
    }

    fn step() -> Vec<f64> {
        let mut values = vec![0.1; 10];
        values.extend(vec![0.9; 10]);
        values
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = TrendAnalyzer::builder()
            .config(TrendConfig::default().with_threshold(-1.0))
            .build();
        assert!(matches!(result, Err(TrendError::InvalidConfig(_))));
    }

    #[test]
    fn test_step_report() {
        let analyzer = TrendAnalyzer::builder().build().unwrap();
        let report = analyzer
            .analyze_observations("rust", &observations(&step()), start(), end_for(20))
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.direction, TrendDirection::Increasing);
        assert_eq!(report.buckets.len(), 20);
        assert_eq!(report.change_points.len(), 1);
        assert_eq!(report.change_points[0].bucket_index, 10);

        let alert = &report.alerts[0];
        assert_eq!(alert.previous_value, 0.1);
        assert_eq!(alert.current_value, 0.9);
        assert!((alert.change_rate_pct - 800.0).abs() < 1e-6);
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(report.summary.observation_count, 20);
        assert!((report.summary.mean_score.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_is_insufficient_data() {
        let analyzer = TrendAnalyzer::builder().build().unwrap();
        let report = analyzer
            .analyze_observations("rust", &[], start(), end_for(6))
            .unwrap();

        assert_eq!(
            report.status,
            AnalysisStatus::InsufficientData {
                required: 2,
                available: 0
            }
        );
        assert_eq!(report.direction, TrendDirection::Flat);
        assert!(report.alerts.is_empty());
        assert_eq!(report.buckets.len(), 6);
        assert_eq!(report.summary.mean_score, None);
        assert_eq!(report.summary.slope, None);
    }

    #[test]
    fn test_below_detector_minimum_is_insufficient_data() {
        let analyzer = TrendAnalyzer::builder()
            .config(TrendConfig::default().with_method(DetectionMethod::ZScore))
            .build()
            .unwrap();
        let report = analyzer
            .analyze_observations("rust", &observations(&[0.1, 0.2, 0.9]), start(), end_for(3))
            .unwrap();
        assert_eq!(
            report.status,
            AnalysisStatus::InsufficientData {
                required: 11,
                available: 3
            }
        );
        assert_eq!(report.direction, TrendDirection::Flat);
        assert!(report.change_points.is_empty());
        assert!(report.summary.slope.is_some());
    }

    #[test]
    fn test_alert_uses_nearest_earlier_non_empty_bucket() {
        let analyzer = TrendAnalyzer::builder()
            .config(TrendConfig::default().with_threshold(0.2))
            .build()
            .unwrap();
        let observations = vec![
            Observation::new(start() + Duration::minutes(5), 0.2).unwrap(),
            // buckets 1 and 2 are empty
            Observation::new(start() + Duration::minutes(35), 0.5).unwrap(),
        ];
        let report = analyzer
            .analyze_observations("rust", &observations, start(), end_for(4))
            .unwrap();

        assert_eq!(report.change_points.len(), 1);
        assert_eq!(report.change_points[0].bucket_index, 3);
        assert_eq!(report.change_points[0].kind, ChangeKind::Increase);
        let alert = &report.alerts[0];
        assert_eq!(alert.previous_value, 0.2);
        assert_eq!(alert.current_value, 0.5);
        assert!((alert.change_rate_pct - 150.0).abs() < 1e-9);
        assert!(report.buckets[1].mean_score.is_none());
    }

    #[test]
    fn test_alert_filters() {
        let disabled = TrendAnalyzer::builder()
            .config(TrendConfig::default().with_alerts_enabled(false))
            .build()
            .unwrap();
        let report = disabled
            .analyze_observations("rust", &observations(&step()), start(), end_for(20))
            .unwrap();
        assert_eq!(report.change_points.len(), 1);
        assert!(report.alerts.is_empty());

        let strict = TrendAnalyzer::builder()
            .config(TrendConfig::default().with_min_change_rate_pct(1000.0))
            .build()
            .unwrap();
        let report = strict
            .analyze_observations("rust", &observations(&step()), start(), end_for(20))
            .unwrap();
        assert_eq!(report.change_points.len(), 1);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_flat_direction_within_epsilon() {
        let analyzer = TrendAnalyzer::builder().build().unwrap();
        let values: Vec<f64> = (0..10).map(|i| 0.3 + 0.001 * i as f64).collect();
        let report = analyzer
            .analyze_observations("rust", &observations(&values), start(), end_for(10))
            .unwrap();
        assert_eq!(report.direction, TrendDirection::Flat);
        assert!((report.summary.slope.unwrap() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_report_json_shape() {
        let analyzer = TrendAnalyzer::builder().build().unwrap();
        let report = analyzer
            .analyze_observations("rust", &[], start(), end_for(2))
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["method"], "simple");
        assert_eq!(json["direction"], "flat");
        assert_eq!(json["status"]["kind"], "insufficient_data");
        assert_eq!(json["start"], "2024-04-01T00:00:00Z");
        assert!(json["buckets"][0]["mean_score"].is_null());
    }

    #[tokio::test]
    async fn test_analyze_requires_source() {
        let analyzer = TrendAnalyzer::builder().build().unwrap();
        let err = analyzer.analyze("rust", start(), end_for(2)).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_analyze_recent_reads_window_from_source() {
        let source = Arc::new(InMemoryObservationSource::new());
        source.extend("rust", observations(&step())).await;
        // an observation for another key never leaks in
        source.extend("go", observations(&[-0.9; 20])).await;

        let analyzer = TrendAnalyzer::builder()
            .source(source)
            .build()
            .unwrap();
        let now = end_for(20);
        let report = analyzer.analyze_recent("rust", 2, now).await.unwrap();

        // 2 hours is 12 buckets: 2 at 0.1, then 10 at 0.9
        assert_eq!(report.buckets.len(), 12);
        assert_eq!(report.start, now - Duration::hours(2));
        assert_eq!(report.change_points.len(), 1);
        assert_eq!(report.change_points[0].bucket_index, 2);

        assert!(analyzer.analyze_recent("rust", 0, now).await.is_err());
    }

    #[test]
    fn test_recent_window_bounds() {
        let now = end_for(20);
        let (from, to) = recent_window(3, now).unwrap();
        assert_eq!(from, now - Duration::hours(3));
        assert_eq!(to, now);

        assert!(recent_window(-1, now).unwrap_err().is_config_error());
        assert!(recent_window(i64::MAX, now).unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_analyze_recent_rejects_window_beyond_date_range() {
        let analyzer = TrendAnalyzer::builder()
            .source(Arc::new(InMemoryObservationSource::new()))
            .build()
            .unwrap();
        let err = analyzer
            .analyze_recent("rust", 10_000_000_000, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TrendError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_compare_methods_runs_each_variant() {
        let source = Arc::new(InMemoryObservationSource::new());
        source.extend("rust", observations(&step())).await;
        let analyzer = TrendAnalyzer::builder()
            .config(TrendConfig::default().with_zscore(2.5, 5))
            .source(source)
            .build()
            .unwrap();

        let reports = analyzer
            .compare_methods("rust", start(), end_for(20), &DetectionMethod::ALL)
            .await
            .unwrap();

        let methods: Vec<_> = reports.iter().map(|r| r.method).collect();
        assert_eq!(methods, DetectionMethod::ALL.to_vec());
        for report in &reports {
            assert!(report.is_complete(), "{:?}", report.method);
            assert_eq!(report.change_points.len(), 1, "{:?}", report.method);
            let index = report.change_points[0].bucket_index;
            assert!((10..15).contains(&index), "{:?} at {index}", report.method);
            assert_eq!(report.buckets, reports[0].buckets);
        }
    }

    #[tokio::test]
    async fn test_analyze_and_publish() {
        let source = Arc::new(InMemoryObservationSource::new());
        source.extend("rust", observations(&step())).await;
        let sink = Arc::new(InMemoryAlertSink::new());

        let analyzer = TrendAnalyzer::builder()
            .source(source)
            .sink(sink.clone())
            .build()
            .unwrap();
        let report = analyzer
            .analyze_and_publish("rust", start(), end_for(20))
            .await
            .unwrap();
        assert_eq!(report.alerts.len(), 1);

        let stored = analyzer.recent_alerts(Some("rust"), 10).await.unwrap();
        assert_eq!(stored, report.alerts);
        assert_eq!(sink.stats().await.total_alerts, 1);
    }
}
