//! # Trend Engine - Sentiment Change-Point Detection
//!
//! Trend Engine turns an irregular stream of time-stamped sentiment scores
//! into fixed time buckets and locates the moments where opinion shifts,
//! abruptly or gradually.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, TimeZone, Utc};
//! use trend_engine::prelude::*;
//!
//! # async fn example() -> TrendResult<()> {
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let source = Arc::new(InMemoryObservationSource::new());
//! for i in 0..40 {
//!     let score = if i < 20 { -0.1 } else { 0.4 };
//!     source
//!         .insert("rust", Observation::new(start + Duration::minutes(10 * i), score)?)
//!         .await;
//! }
//!
//! let analyzer = TrendAnalyzer::builder()
//!     .config(TrendConfig::default().with_method(DetectionMethod::Cusum))
//!     .source(source)
//!     .sink(Arc::new(InMemoryAlertSink::new()))
//!     .build()?;
//!
//! let report = analyzer
//!     .analyze_and_publish("rust", start, start + Duration::hours(8))
//!     .await?;
//! for alert in &report.alerts {
//!     println!("{}", alert.description);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Detectors
//!
//! - **Simple**: adjacent-bucket difference against a threshold
//! - **CUSUM**: two-sided cumulative sums of standardized deviations
//! - **Z-score**: deviation from a trailing window
//! - **Bayesian**: online run-length posterior with a Normal-Gamma model
//!
//! All four consume the same [`aggregate::BucketSeries`] and are selected by
//! [`config::DetectionMethod`]. Empty buckets are never handed to a detector.
//!
//! ## Architecture
//!
//! - **`aggregate`**: fixed-width bucketing with online mean/variance
//! - **`detectors`**: the [`detectors::ChangeDetector`] trait and its variants
//! - **`analyzer`**: orchestration, trend direction, reports
//! - **`alert`**: alert records and severity
//! - **`store`**: async observation source and alert sink seams
//! - **`config`**: TOML-backed, validated configuration
//! - **`logging`**: `tracing` setup helpers

pub mod aggregate;
pub mod alert;
pub mod analyzer;
pub mod config;
pub mod detectors;
pub mod error;
pub mod logging;
pub mod model;
pub mod prelude;
pub mod store;
