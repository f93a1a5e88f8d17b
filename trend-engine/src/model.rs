//! Core data types shared by the aggregator, detectors and analyzer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrendError, TrendResult};

/// Tolerance on the sum of a sentiment triple.
const SCORE_SUM_TOLERANCE: f64 = 1e-3;

/// A single time-stamped sentiment score in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// When the scored item was published or collected.
    pub timestamp: DateTime<Utc>,
    /// Sentiment score, `-1` fully negative to `1` fully positive.
    pub score: f64,
}

impl Observation {
    /// Creates a validated observation.
    ///
    /// # Errors
    ///
    /// Returns [`TrendError::InvalidObservation`] if `score` is not finite or
    /// lies outside `[-1, 1]`.
    pub fn new(timestamp: DateTime<Utc>, score: f64) -> TrendResult<Self> {
        if !score.is_finite() || !(-1.0..=1.0).contains(&score) {
            return Err(TrendError::invalid_observation(format!(
                "score {score} at {timestamp} is outside [-1, 1]"
            )));
        }
        Ok(Self { timestamp, score })
    }

    /// Creates an observation from a positive/negative/neutral triple.
    ///
    /// The score is clamped to `[-1, 1]` even for triples built without
    /// [`SentimentScores::new`]. Non-finite scores are left for the aggregator
    /// to drop.
    pub fn from_scores(timestamp: DateTime<Utc>, scores: SentimentScores) -> Self {
        Self {
            timestamp,
            score: scores.score().clamp(-1.0, 1.0),
        }
    }
}

/// Output of a sentiment classifier: three class probabilities summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl SentimentScores {
    /// Creates a validated triple.
    pub fn new(positive: f64, negative: f64, neutral: f64) -> TrendResult<Self> {
        for (name, value) in [
            ("positive", positive),
            ("negative", negative),
            ("neutral", neutral),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(TrendError::invalid_observation(format!(
                    "{name} probability {value} is outside [0, 1]"
                )));
            }
        }

        let sum = positive + negative + neutral;
        if (sum - 1.0).abs() > SCORE_SUM_TOLERANCE {
            return Err(TrendError::invalid_observation(format!(
                "sentiment probabilities sum to {sum:.4}, expected 1.0"
            )));
        }

        Ok(Self {
            positive,
            negative,
            neutral,
        })
    }

    /// Collapses the triple to a scalar in `[-1, 1]`.
    pub fn score(&self) -> f64 {
        self.positive - self.negative
    }
}

/// Aggregated statistics for one fixed-width interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    /// `None` when the bucket holds no observations.
    pub mean_score: Option<f64>,
    /// Population variance; `None` when the bucket holds no observations.
    pub variance: Option<f64>,
}

impl TimeBucket {
    /// Returns true if no observation fell into this bucket.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Direction of a detected shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Increase,
    Decrease,
}

impl ChangeKind {
    /// Classifies a signed difference. Zero maps to `Increase`.
    pub fn from_delta(delta: f64) -> Self {
        if delta < 0.0 {
            Self::Decrease
        } else {
            Self::Increase
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increase => write!(f, "increase"),
            Self::Decrease => write!(f, "decrease"),
        }
    }
}

/// A location in the bucketed series where a detector found a shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    /// Index into the full bucket list (empty buckets included).
    pub bucket_index: usize,
    /// Start of the bucket at `bucket_index`.
    pub at: DateTime<Utc>,
    pub kind: ChangeKind,
    /// Size of the shift in score units.
    pub magnitude: f64,
    /// Detector certainty in `[0, 1]`.
    pub confidence: f64,
}

/// Overall direction of the series over the analyzed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Flat,
}

impl TrendDirection {
    /// Classifies a regression slope against a dead band of `epsilon`.
    pub fn from_slope(slope: f64, epsilon: f64) -> Self {
        if slope > epsilon {
            Self::Increasing
        } else if slope < -epsilon {
            Self::Decreasing
        } else {
            Self::Flat
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_observation_validation() {
        assert!(Observation::new(ts(), 0.5).is_ok());
        assert!(Observation::new(ts(), -1.0).is_ok());
        assert!(Observation::new(ts(), 1.01).is_err());
        assert!(Observation::new(ts(), f64::NAN).is_err());
    }

    #[test]
    fn test_sentiment_scores_to_observation() {
        let scores = SentimentScores::new(0.7, 0.1, 0.2).unwrap();
        let obs = Observation::from_scores(ts(), scores);
        assert!((obs.score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_unvalidated_scores_are_clamped() {
        let scores = SentimentScores {
            positive: 4.0,
            negative: -2.0,
            neutral: 0.0,
        };
        assert_eq!(Observation::from_scores(ts(), scores).score, 1.0);

        let scores = SentimentScores {
            positive: 0.0,
            negative: 3.0,
            neutral: 0.0,
        };
        assert_eq!(Observation::from_scores(ts(), scores).score, -1.0);
    }

    #[test]
    fn test_sentiment_scores_rejects_bad_sum() {
        let err = SentimentScores::new(0.7, 0.7, 0.2).unwrap_err();
        assert!(err.to_string().contains("sum to"));
        assert!(SentimentScores::new(-0.1, 0.6, 0.5).is_err());
    }

    #[test]
    fn test_direction_from_slope() {
        assert_eq!(TrendDirection::from_slope(0.05, 0.01), TrendDirection::Increasing);
        assert_eq!(TrendDirection::from_slope(-0.05, 0.01), TrendDirection::Decreasing);
        assert_eq!(TrendDirection::from_slope(0.005, 0.01), TrendDirection::Flat);
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(
            serde_json::to_string(&ChangeKind::Decrease).unwrap(),
            "\"decrease\""
        );
        assert_eq!(
            serde_json::to_string(&TrendDirection::Flat).unwrap(),
            "\"flat\""
        );
    }
}
