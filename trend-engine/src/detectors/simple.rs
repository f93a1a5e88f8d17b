use tracing::debug;

use super::ChangeDetector;
use crate::aggregate::BucketSeries;
use crate::model::{ChangeKind, ChangePoint};

/// Flags any adjacent pair of non-empty buckets whose means differ by more
/// than a fixed threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleDetector {
    /// Absolute difference that must be exceeded, in score units.
    pub threshold: f64,
}

impl SimpleDetector {
    /// Creates a new adjacent-difference detector.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for SimpleDetector {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl ChangeDetector for SimpleDetector {
    fn detect(&self, series: &BucketSeries) -> Vec<ChangePoint> {
        let points = series.points();
        let mut changes = Vec::new();

        for (position, pair) in points.windows(2).enumerate() {
            let diff = pair[1].value - pair[0].value;
            if diff.abs() > self.threshold {
                let confidence = (diff.abs() / (2.0 * self.threshold)).min(1.0);
                debug!(
                    bucket = pair[1].bucket_index,
                    diff, confidence, "Adjacent difference above threshold"
                );
                changes.push(series.change_point(
                    position + 1,
                    ChangeKind::from_delta(diff),
                    diff.abs(),
                    confidence,
                ));
            }
        }

        changes
    }

    fn min_points(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "Simple"
    }

    fn description(&self) -> &str {
        "Detects changes where adjacent bucket means differ by more than a fixed threshold"
    }
}
