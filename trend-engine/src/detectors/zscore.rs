use tracing::debug;

use super::{mean, population_std, ChangeDetector, NUMERIC_EPSILON};
use crate::aggregate::BucketSeries;
use crate::model::{ChangeKind, ChangePoint};

/// Flags buckets that deviate from the trailing window by more than
/// `z_threshold` standard deviations.
///
/// The baseline for bucket `i` is the `window_size` buckets before it; the
/// bucket itself is never part of its own baseline. The baseline standard
/// deviation is floored at `min_std`, so that a perfectly flat baseline
/// followed by a jump is still scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ZScoreDetector {
    /// Absolute z-score above which a bucket is flagged.
    pub z_threshold: f64,
    /// Length of the trailing baseline window.
    pub window_size: usize,
    /// Floor applied to the baseline standard deviation.
    pub min_std: f64,
}

impl ZScoreDetector {
    /// Creates a new z-score detector.
    pub fn new(z_threshold: f64, window_size: usize) -> Self {
        Self {
            z_threshold,
            window_size,
            min_std: 0.01,
        }
    }

    /// Sets the floor on the baseline standard deviation.
    ///
    /// With a floor of zero, zero-variance baselines produce no signal.
    pub fn with_min_std(mut self, min_std: f64) -> Self {
        self.min_std = min_std;
        self
    }
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self::new(2.5, 10)
    }
}

impl ChangeDetector for ZScoreDetector {
    fn detect(&self, series: &BucketSeries) -> Vec<ChangePoint> {
        if self.window_size == 0 || series.len() < self.min_points() {
            return Vec::new();
        }

        let values = series.values();
        let mut changes = Vec::new();

        for position in self.window_size..values.len() {
            let window = &values[position - self.window_size..position];
            let baseline = mean(window);
            let raw_std = population_std(window);
            let deviation = values[position] - baseline;

            if raw_std < NUMERIC_EPSILON && deviation.abs() < NUMERIC_EPSILON {
                continue;
            }
            let std = raw_std.max(self.min_std);
            if std < NUMERIC_EPSILON {
                debug!(
                    bucket = series.points()[position].bucket_index,
                    "Zero-variance baseline, skipping bucket"
                );
                continue;
            }

            let z = deviation / std;
            if z.abs() > self.z_threshold {
                changes.push(series.change_point(
                    position,
                    ChangeKind::from_delta(z),
                    deviation.abs(),
                    (z.abs() / (2.0 * self.z_threshold)).min(1.0),
                ));
            }
        }

        changes
    }

    fn min_points(&self) -> usize {
        self.window_size + 1
    }

    fn name(&self) -> &str {
        "ZScore"
    }

    fn description(&self) -> &str {
        "Detects buckets whose mean lies far outside the trailing window distribution"
    }
}
