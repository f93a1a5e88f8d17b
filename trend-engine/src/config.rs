//! Detector and analyzer configuration.
//!
//! [`TrendConfig`] is the user-facing, serde-friendly parameter set. It is
//! loaded from TOML (or built with `with_*` setters), optionally overridden by
//! the environment, and turned into an immutable [`ValidatedConfig`] by
//! [`TrendConfig::validate`]. Only a `ValidatedConfig` is accepted by the
//! analyzer and the detector factory, so invalid parameters never reach a
//! computation.
//!
//! # Example
//!
//! ```rust
//! use trend_engine::config::{DetectionMethod, TrendConfig};
//!
//! let config = TrendConfig::from_toml_str(
//!     r#"
//!     method = "cusum"
//!     cusum_threshold = 4.0
//!     bucket_width_minutes = 30
//!     "#,
//! )
//! .unwrap()
//! .validate()
//! .unwrap();
//!
//! assert_eq!(config.method(), DetectionMethod::Cusum);
//! assert_eq!(config.bucket_width().num_minutes(), 30);
//! ```

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{TrendError, TrendResult};

/// Environment variable that overrides the configured detection method.
pub const METHOD_ENV_VAR: &str = "TREND_METHOD";

/// The closed set of change-point detection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Adjacent-bucket difference against a fixed threshold.
    #[default]
    Simple,
    /// Two-sided cumulative sum of standardized deviations.
    Cusum,
    /// Trailing-window z-score.
    #[serde(alias = "z-score", alias = "z_score")]
    ZScore,
    /// Bayesian online change-point detection over run lengths.
    Bayesian,
}

impl DetectionMethod {
    /// All methods, in the order reports are produced by comparisons.
    pub const ALL: [DetectionMethod; 4] = [
        DetectionMethod::Simple,
        DetectionMethod::Cusum,
        DetectionMethod::ZScore,
        DetectionMethod::Bayesian,
    ];

    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Cusum => "cusum",
            Self::ZScore => "zscore",
            Self::Bayesian => "bayesian",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = TrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "cusum" => Ok(Self::Cusum),
            "zscore" | "z-score" | "z_score" => Ok(Self::ZScore),
            "bayesian" | "bocpd" => Ok(Self::Bayesian),
            other => Err(TrendError::invalid_config(format!(
                "unknown detection method '{other}' (expected simple, cusum, zscore or bayesian)"
            ))),
        }
    }
}

/// Raw trend analysis configuration.
///
/// Every key is optional in TOML; missing keys take the defaults below.
/// Unknown keys are rejected so that typos surface as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrendConfig {
    /// Detection algorithm.
    pub method: DetectionMethod,
    /// Bucket width in minutes.
    pub bucket_width_minutes: i64,
    /// Maximum number of buckets a single query may produce.
    pub max_buckets: usize,

    /// Simple: absolute difference between adjacent buckets.
    pub threshold: f64,

    /// CUSUM: decision threshold on the cumulative statistic.
    pub cusum_threshold: f64,
    /// CUSUM: slack subtracted from each standardized deviation.
    pub drift: f64,
    /// CUSUM: number of leading buckets that define the reference mean.
    pub reference_window: usize,

    /// Z-score: absolute z above which a bucket is flagged.
    pub z_threshold: f64,
    /// Z-score: trailing baseline window length.
    pub window_size: usize,
    /// Z-score: floor on the baseline standard deviation.
    pub min_std: f64,

    /// Bayesian: constant hazard (prior probability of a change per bucket).
    pub prior_probability: f64,
    /// Bayesian: minimum spacing between change points, in buckets.
    pub min_segment_length: usize,
    /// Bayesian: posterior mass on short run lengths required to declare a change.
    pub posterior_threshold: f64,
    /// Bayesian: maximum number of run-length hypotheses kept.
    pub max_run_length: usize,
    /// Bayesian: floor on the estimated observation noise variance.
    pub min_noise_variance: f64,

    /// Regression slope (per bucket) below which the trend is flat.
    pub flat_slope_epsilon: f64,
    /// Whether change points are turned into alerts.
    pub alerts_enabled: bool,
    /// Minimum absolute change rate (percent) for an alert to be raised.
    pub min_change_rate_pct: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::Simple,
            bucket_width_minutes: 10,
            max_buckets: 100_000,
            threshold: 0.3,
            cusum_threshold: 5.0,
            drift: 0.5,
            reference_window: 5,
            z_threshold: 2.5,
            window_size: 10,
            min_std: 0.01,
            prior_probability: 0.01,
            min_segment_length: 5,
            posterior_threshold: 0.5,
            max_run_length: 500,
            min_noise_variance: 1e-4,
            flat_slope_epsilon: 0.01,
            alerts_enabled: true,
            min_change_rate_pct: 0.0,
        }
    }
}

impl TrendConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> TrendResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrendError::invalid_config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|e| {
            TrendError::invalid_config(format!(
                "failed to parse TOML in '{}': {e}",
                path.display()
            ))
        })
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> TrendResult<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Serializes configuration to a TOML string.
    pub fn to_toml_string(&self) -> TrendResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies `TREND_METHOD` from the process environment, if set.
    ///
    /// An unparseable value is an error.
    pub fn with_env_overrides(self) -> TrendResult<Self> {
        let value = env::var(METHOD_ENV_VAR).ok();
        self.with_method_override(value.as_deref())
    }

    /// Applies an optional method name on top of this configuration.
    pub fn with_method_override(mut self, method: Option<&str>) -> TrendResult<Self> {
        if let Some(raw) = method {
            self.method = raw.parse()?;
        }
        Ok(self)
    }

    /// Sets the detection method.
    pub fn with_method(mut self, method: DetectionMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the bucket width in minutes.
    pub fn with_bucket_width_minutes(mut self, minutes: i64) -> Self {
        self.bucket_width_minutes = minutes;
        self
    }

    /// Sets the Simple detector threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the CUSUM decision threshold and drift.
    pub fn with_cusum(mut self, threshold: f64, drift: f64) -> Self {
        self.cusum_threshold = threshold;
        self.drift = drift;
        self
    }

    /// Sets the z-score threshold and trailing window size.
    pub fn with_zscore(mut self, z_threshold: f64, window_size: usize) -> Self {
        self.z_threshold = z_threshold;
        self.window_size = window_size;
        self
    }

    /// Sets the Bayesian hazard and minimum segment length.
    pub fn with_bayesian(mut self, prior_probability: f64, min_segment_length: usize) -> Self {
        self.prior_probability = prior_probability;
        self.min_segment_length = min_segment_length;
        self
    }

    /// Enables or disables alert generation.
    pub fn with_alerts_enabled(mut self, enabled: bool) -> Self {
        self.alerts_enabled = enabled;
        self
    }

    /// Sets the minimum absolute change rate for alerts, in percent.
    pub fn with_min_change_rate_pct(mut self, pct: f64) -> Self {
        self.min_change_rate_pct = pct;
        self
    }

    /// Validates every parameter and freezes the configuration.
    ///
    /// All parameters are checked, not just the ones used by `method`, so a
    /// validated config can be reused to run any variant.
    pub fn validate(self) -> TrendResult<ValidatedConfig> {
        if self.bucket_width_minutes <= 0 {
            return Err(TrendError::InvalidWidth {
                seconds: self.bucket_width_minutes.saturating_mul(60),
            });
        }
        if self.max_buckets == 0 {
            return Err(TrendError::invalid_config("max_buckets must be at least 1"));
        }

        positive("threshold", self.threshold)?;
        positive("cusum_threshold", self.cusum_threshold)?;
        non_negative("drift", self.drift)?;
        at_least("reference_window", self.reference_window, 1)?;

        positive("z_threshold", self.z_threshold)?;
        at_least("window_size", self.window_size, 2)?;
        non_negative("min_std", self.min_std)?;

        open_unit("prior_probability", self.prior_probability)?;
        at_least("min_segment_length", self.min_segment_length, 1)?;
        open_unit("posterior_threshold", self.posterior_threshold)?;
        if self.max_run_length <= self.min_segment_length {
            return Err(TrendError::invalid_config(format!(
                "max_run_length ({}) must exceed min_segment_length ({})",
                self.max_run_length, self.min_segment_length
            )));
        }
        positive("min_noise_variance", self.min_noise_variance)?;

        non_negative("flat_slope_epsilon", self.flat_slope_epsilon)?;
        non_negative("min_change_rate_pct", self.min_change_rate_pct)?;

        let bucket_width = Duration::try_minutes(self.bucket_width_minutes).ok_or_else(|| {
            TrendError::invalid_config(format!(
                "bucket_width_minutes ({}) is out of range",
                self.bucket_width_minutes
            ))
        })?;
        Ok(ValidatedConfig {
            inner: self,
            bucket_width,
        })
    }
}

fn positive(name: &str, value: f64) -> TrendResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TrendError::invalid_config(format!(
            "{name} must be a positive finite number, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> TrendResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrendError::invalid_config(format!(
            "{name} must be a non-negative finite number, got {value}"
        )))
    }
}

fn open_unit(name: &str, value: f64) -> TrendResult<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(TrendError::invalid_config(format!(
            "{name} must lie strictly between 0 and 1, got {value}"
        )))
    }
}

fn at_least(name: &str, value: usize, min: usize) -> TrendResult<()> {
    if value >= min {
        Ok(())
    } else {
        Err(TrendError::invalid_config(format!(
            "{name} must be at least {min}, got {value}"
        )))
    }
}

/// A configuration that passed [`TrendConfig::validate`].
///
/// Immutable; share it by reference or clone it into tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    inner: TrendConfig,
    bucket_width: Duration,
}

impl ValidatedConfig {
    /// The validated parameters.
    pub fn params(&self) -> &TrendConfig {
        &self.inner
    }

    /// The configured detection method.
    pub fn method(&self) -> DetectionMethod {
        self.inner.method
    }

    /// Bucket width as a duration.
    pub fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    /// Returns a copy of this config with a different method.
    ///
    /// All parameters were validated up front, so switching methods cannot
    /// produce an invalid config.
    pub fn for_method(&self, method: DetectionMethod) -> Self {
        let mut inner = self.inner.clone();
        inner.method = method;
        Self {
            inner,
            bucket_width: self.bucket_width,
        }
    }

    /// Converts back into the raw, editable form.
    pub fn into_inner(self) -> TrendConfig {
        self.inner
    }
}

impl Default for ValidatedConfig {
    fn default() -> Self {
        let inner = TrendConfig::default();
        Self {
            bucket_width: Duration::minutes(inner.bucket_width_minutes),
            inner,
        }
    }
}
