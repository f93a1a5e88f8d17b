//! Fixed-width time bucketing of raw observations.
//!
//! The aggregator produces one [`TimeBucket`] per interval of the query range,
//! empty ones included. Detectors never see the buckets directly; they consume
//! a [`BucketSeries`], the non-empty view that keeps each point's original
//! bucket index.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ValidatedConfig;
use crate::error::{TrendError, TrendResult};
use crate::model::{ChangeKind, ChangePoint, Observation, TimeBucket};

/// Default cap on buckets per query.
pub const DEFAULT_MAX_BUCKETS: usize = 100_000;

/// Online mean/variance accumulator (Welford).
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    fn population_variance(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.m2 / self.count as f64).max(0.0))
    }
}

fn total_nanos(d: Duration) -> i128 {
    i128::from(d.num_seconds()) * 1_000_000_000 + i128::from(d.subsec_nanos())
}

/// Buckets observations into fixed-width, gapless windows.
#[derive(Debug, Clone)]
pub struct TimeSeriesAggregator {
    width: Duration,
    max_buckets: usize,
}

impl TimeSeriesAggregator {
    /// Creates an aggregator with the given bucket width.
    ///
    /// # Errors
    ///
    /// Returns [`TrendError::InvalidWidth`] if `width` is not positive.
    pub fn new(width: Duration) -> TrendResult<Self> {
        if width <= Duration::zero() {
            return Err(TrendError::InvalidWidth {
                seconds: width.num_seconds(),
            });
        }
        Ok(Self {
            width,
            max_buckets: DEFAULT_MAX_BUCKETS,
        })
    }

    /// Creates an aggregator from a validated configuration.
    pub fn from_config(config: &ValidatedConfig) -> TrendResult<Self> {
        Ok(Self::new(config.bucket_width())?.with_max_buckets(config.params().max_buckets))
    }

    /// Sets the maximum number of buckets a single query may produce.
    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets.max(1);
        self
    }

    /// The bucket width.
    pub fn width(&self) -> Duration {
        self.width
    }

    /// Number of buckets covering `[start, end)`. The last one may be partial.
    pub fn bucket_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> TrendResult<usize> {
        if end <= start {
            return Err(TrendError::invalid_range(start, end));
        }
        let span = total_nanos(end - start);
        let width = total_nanos(self.width);
        let count = (span + width - 1) / width;
        if count > self.max_buckets as i128 {
            return Err(TrendError::InvalidRange {
                start,
                end,
                detail: format!(
                    " ({count} buckets of {}s exceed the limit of {})",
                    self.width.num_seconds(),
                    self.max_buckets
                ),
            });
        }
        // bounded by max_buckets above
        Ok(count as usize)
    }

    /// Aggregates observations into buckets spanning `[start, end)`.
    ///
    /// Input order does not matter: observations are sorted by timestamp
    /// (ties by score) before accumulation, so any permutation of the same
    /// observations yields identical buckets. Observations outside the range
    /// or with non-finite scores are ignored.
    #[instrument(skip(self, observations), fields(observations = observations.len()))]
    pub fn aggregate(
        &self,
        observations: &[Observation],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<Vec<TimeBucket>> {
        let count = self.bucket_count(start, end)?;
        let width = total_nanos(self.width);

        let mut sorted: Vec<&Observation> = observations.iter().collect();
        sorted.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.score.total_cmp(&b.score))
        });

        let mut stats = vec![Welford::default(); count];
        let mut out_of_range = 0usize;
        let mut invalid = 0usize;

        for obs in sorted {
            if obs.timestamp < start || obs.timestamp >= end {
                out_of_range += 1;
                continue;
            }
            if !obs.score.is_finite() || !(-1.0..=1.0).contains(&obs.score) {
                invalid += 1;
                continue;
            }
            let offset = total_nanos(obs.timestamp - start);
            // offset < span, so index < count
            let index = (offset / width) as usize;
            stats[index].push(obs.score);
        }

        if out_of_range > 0 {
            debug!(out_of_range, "Ignored observations outside the query range");
        }
        if invalid > 0 {
            warn!(invalid, "Dropped observations with scores outside [-1, 1]");
        }

        let mut buckets = Vec::with_capacity(count);
        let mut cursor = start;
        for acc in stats {
            let next = (cursor + self.width).min(end);
            buckets.push(TimeBucket {
                start: cursor,
                end: next,
                count: acc.count,
                mean_score: acc.mean(),
                variance: acc.population_variance(),
            });
            cursor = next;
        }

        debug!(
            buckets = buckets.len(),
            non_empty = buckets.iter().filter(|b| !b.is_empty()).count(),
            "Aggregated observations"
        );

        Ok(buckets)
    }
}

/// One non-empty bucket as seen by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Index of the bucket in the full bucket list.
    pub bucket_index: usize,
    /// Bucket start time.
    pub at: DateTime<Utc>,
    /// Bucket mean score.
    pub value: f64,
}

/// The ordered, non-empty buckets of a query.
///
/// Adjacent points are "adjacent" for detection purposes even if empty
/// buckets separated them in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketSeries {
    points: Vec<SeriesPoint>,
}

impl BucketSeries {
    /// Builds the series from aggregated buckets, skipping empty ones.
    pub fn from_buckets(buckets: &[TimeBucket]) -> Self {
        let points = buckets
            .iter()
            .enumerate()
            .filter_map(|(bucket_index, bucket)| {
                bucket.mean_score.map(|value| SeriesPoint {
                    bucket_index,
                    at: bucket.start,
                    value,
                })
            })
            .collect();
        Self { points }
    }

    /// Builds a gapless series from raw values, one bucket per value.
    pub fn from_values(start: DateTime<Utc>, width: Duration, values: &[f64]) -> Self {
        let mut at = start;
        let points = values
            .iter()
            .enumerate()
            .map(|(bucket_index, &value)| {
                let point = SeriesPoint {
                    bucket_index,
                    at,
                    value,
                };
                at += width;
                point
            })
            .collect();
        Self { points }
    }

    /// Number of non-empty buckets.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether every bucket in the range was empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The points in time order.
    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    /// The bucket means in order.
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// The point at series position `position`, not bucket index.
    pub fn get(&self, position: usize) -> Option<&SeriesPoint> {
        self.points.get(position)
    }

    /// Builds a change point located at the series position `position`.
    ///
    /// Callers pass positions they obtained by iterating this series.
    pub(crate) fn change_point(
        &self,
        position: usize,
        kind: ChangeKind,
        magnitude: f64,
        confidence: f64,
    ) -> ChangePoint {
        let point = self.points[position];
        ChangePoint {
            bucket_index: point.bucket_index,
            at: point.at,
            kind,
            magnitude,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}
