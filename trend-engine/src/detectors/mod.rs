//! Change-point detection algorithms.
//!
//! Every detector implements [`ChangeDetector`]: a pure function from a
//! [`BucketSeries`] to an ordered list of [`ChangePoint`]s. Scan state
//! (running sums, run-length posteriors) lives on the stack of a single
//! `detect` call, so one detector value can be shared across threads and
//! reused for any number of series.
//!
//! The closed set of variants is exposed as [`Detector`], which is what the
//! analyzer builds from configuration:
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use trend_engine::aggregate::BucketSeries;
//! use trend_engine::config::TrendConfig;
//! use trend_engine::detectors::{ChangeDetector, Detector};
//!
//! let mut values = vec![0.1; 10];
//! values.extend(vec![0.9; 10]);
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let series = BucketSeries::from_values(start, Duration::minutes(10), &values);
//!
//! let detector = Detector::from_config(&TrendConfig::default().validate().unwrap());
//! let changes = detector.detect(&series);
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes[0].bucket_index, 10);
//! ```

mod bayesian;
mod cusum;
mod simple;
mod zscore;

pub use bayesian::{BayesianDetector, RunLengthSummary};
pub use cusum::CusumDetector;
pub use simple::SimpleDetector;
pub use zscore::ZScoreDetector;

use crate::aggregate::BucketSeries;
use crate::config::{DetectionMethod, ValidatedConfig};
use crate::model::ChangePoint;

/// Variance (or standard deviation) below which a value is treated as zero.
pub(crate) const NUMERIC_EPSILON: f64 = 1e-10;

/// A change-point detection strategy.
pub trait ChangeDetector: Send + Sync {
    /// Scans the series and returns change points ordered by bucket index.
    ///
    /// Series shorter than [`min_points`](Self::min_points) yield no change
    /// points.
    fn detect(&self, series: &BucketSeries) -> Vec<ChangePoint>;

    /// Minimum number of non-empty buckets needed for a meaningful scan.
    fn min_points(&self) -> usize;

    /// Returns the name of this detection strategy.
    fn name(&self) -> &str;

    /// Returns a description of this detection strategy.
    fn description(&self) -> &str;
}

/// One of the four supported detectors, selected by configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Detector {
    Simple(SimpleDetector),
    Cusum(CusumDetector),
    ZScore(ZScoreDetector),
    Bayesian(BayesianDetector),
}

impl Detector {
    /// Builds the detector selected by `config.method()`.
    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self::for_method(config.method(), config)
    }

    /// Builds the detector for `method` using the parameters in `config`.
    pub fn for_method(method: DetectionMethod, config: &ValidatedConfig) -> Self {
        let p = config.params();
        match method {
            DetectionMethod::Simple => Self::Simple(SimpleDetector::new(p.threshold)),
            DetectionMethod::Cusum => Self::Cusum(
                CusumDetector::new(p.cusum_threshold, p.drift)
                    .with_reference_window(p.reference_window),
            ),
            DetectionMethod::ZScore => Self::ZScore(
                ZScoreDetector::new(p.z_threshold, p.window_size).with_min_std(p.min_std),
            ),
            DetectionMethod::Bayesian => Self::Bayesian(
                BayesianDetector::new(p.prior_probability, p.min_segment_length)
                    .with_posterior_threshold(p.posterior_threshold)
                    .with_max_run_length(p.max_run_length)
                    .with_min_noise_variance(p.min_noise_variance),
            ),
        }
    }

    /// The method this detector implements.
    pub fn method(&self) -> DetectionMethod {
        match self {
            Self::Simple(_) => DetectionMethod::Simple,
            Self::Cusum(_) => DetectionMethod::Cusum,
            Self::ZScore(_) => DetectionMethod::ZScore,
            Self::Bayesian(_) => DetectionMethod::Bayesian,
        }
    }

    fn inner(&self) -> &dyn ChangeDetector {
        match self {
            Self::Simple(d) => d,
            Self::Cusum(d) => d,
            Self::ZScore(d) => d,
            Self::Bayesian(d) => d,
        }
    }
}

impl ChangeDetector for Detector {
    fn detect(&self, series: &BucketSeries) -> Vec<ChangePoint> {
        self.inner().detect(series)
    }

    fn min_points(&self) -> usize {
        self.inner().min_points()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    fn description(&self) -> &str {
        self.inner().description()
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
