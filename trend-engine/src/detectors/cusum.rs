use tracing::debug;

use super::{mean, population_std, ChangeDetector, NUMERIC_EPSILON};
use crate::aggregate::BucketSeries;
use crate::model::{ChangeKind, ChangePoint};

/// Two-sided cumulative sum detector.
///
/// Deviations are standardized against a reference mean taken from the first
/// `reference_window` buckets and the standard deviation of the whole series.
/// `S+` accumulates upward deviations beyond `drift`, `S-` downward ones; a
/// statistic crossing `threshold` raises an alarm and is reset to zero.
/// Consecutive alarms in the same direction belong to one sustained shift, so
/// only the first one is reported.
///
/// The reference is fixed for the whole scan. A later return to the reference
/// level after a reported shift is therefore not reported again.
#[derive(Debug, Clone, PartialEq)]
pub struct CusumDetector {
    /// Decision threshold on `|S|`, in standard deviations.
    pub threshold: f64,
    /// Allowed slack per bucket, in standard deviations.
    pub drift: f64,
    /// Number of leading buckets used for the reference mean.
    pub reference_window: usize,
}

impl CusumDetector {
    /// Creates a new CUSUM detector with a five bucket reference window.
    pub fn new(threshold: f64, drift: f64) -> Self {
        Self {
            threshold,
            drift,
            reference_window: 5,
        }
    }

    /// Sets the number of leading buckets used for the reference mean.
    pub fn with_reference_window(mut self, reference_window: usize) -> Self {
        self.reference_window = reference_window.max(1);
        self
    }
}

impl Default for CusumDetector {
    fn default() -> Self {
        Self::new(5.0, 0.5)
    }
}

impl ChangeDetector for CusumDetector {
    fn detect(&self, series: &BucketSeries) -> Vec<ChangePoint> {
        if series.len() < self.min_points() {
            return Vec::new();
        }

        let values = series.values();
        let sigma = population_std(&values);
        if sigma < NUMERIC_EPSILON {
            debug!(sigma, "Constant series, skipping CUSUM scan");
            return Vec::new();
        }

        let reference = mean(&values[..self.reference_window]);
        let mut s_pos = 0.0_f64;
        let mut s_neg = 0.0_f64;
        let mut last_kind: Option<ChangeKind> = None;
        let mut changes = Vec::new();

        for (position, &x) in values.iter().enumerate().skip(self.reference_window) {
            let z = (x - reference) / sigma;
            s_pos = (s_pos + z - self.drift).max(0.0);
            s_neg = (s_neg + z + self.drift).min(0.0);

            let alarm = if s_pos > self.threshold {
                let statistic = s_pos;
                s_pos = 0.0;
                Some((ChangeKind::Increase, statistic))
            } else if s_neg < -self.threshold {
                let statistic = s_neg;
                s_neg = 0.0;
                Some((ChangeKind::Decrease, statistic))
            } else {
                None
            };

            let Some((kind, statistic)) = alarm else {
                continue;
            };
            if last_kind == Some(kind) {
                debug!(position, ?kind, statistic, "Coalesced repeated CUSUM alarm");
                continue;
            }
            last_kind = Some(kind);

            let confidence = (statistic.abs() / (2.0 * self.threshold)).min(1.0);
            changes.push(series.change_point(
                position,
                kind,
                (x - reference).abs(),
                confidence,
            ));
        }

        changes
    }

    fn min_points(&self) -> usize {
        self.reference_window + 1
    }

    fn name(&self) -> &str {
        "CUSUM"
    }

    fn description(&self) -> &str {
        "Detects sustained shifts with two-sided cumulative sums of standardized deviations"
    }
}
