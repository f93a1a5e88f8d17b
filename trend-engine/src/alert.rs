//! Alert records derived from change points.

use serde::{Deserialize, Serialize};

use crate::config::DetectionMethod;
use crate::model::{ChangeKind, ChangePoint};

/// Denominator floor for the relative change rate.
pub const RATE_EPSILON: f64 = 1e-8;

/// Alert severity, derived from the size of the shift on the `[-1, 1]` scale.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    /// Shifts of half the score range or more are critical, a fifth or more
    /// are warnings.
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude >= 0.5 {
            Self::Critical
        } else if magnitude >= 0.2 {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Relative change from `previous` to `current`, in percent.
///
/// The denominator is floored at [`RATE_EPSILON`] so a previous value of zero
/// yields a large finite rate instead of infinity.
pub fn change_rate_pct(previous: f64, current: f64) -> f64 {
    (current - previous) / previous.abs().max(RATE_EPSILON) * 100.0
}

/// A change point enriched with the surrounding bucket means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Keyword or series identifier.
    pub key: String,
    /// Detector that produced the change point.
    pub method: DetectionMethod,
    pub change_point: ChangePoint,
    /// Mean of the nearest earlier non-empty bucket.
    pub previous_value: f64,
    /// Mean of the change-point bucket.
    pub current_value: f64,
    pub change_rate_pct: f64,
    pub severity: AlertSeverity,
    pub description: String,
}

impl Alert {
    /// Builds an alert for `change_point` given the two adjacent bucket means.
    pub fn new(
        key: impl Into<String>,
        method: DetectionMethod,
        change_point: ChangePoint,
        previous_value: f64,
        current_value: f64,
    ) -> Self {
        let key = key.into();
        let change_rate_pct = change_rate_pct(previous_value, current_value);
        let severity = AlertSeverity::from_magnitude(change_point.magnitude);
        let verb = match change_point.kind {
            ChangeKind::Increase => "rose",
            ChangeKind::Decrease => "fell",
        };
        let description = format!(
            "Sentiment for '{key}' {verb} from {previous_value:.3} to {current_value:.3} \
             ({change_rate_pct:+.1}%) at {} [{method}, confidence {:.2}]",
            change_point.at.to_rfc3339(),
            change_point.confidence,
        );

        Self {
            key,
            method,
            change_point,
            previous_value,
            current_value,
            change_rate_pct,
            severity,
            description,
        }
    }
}
