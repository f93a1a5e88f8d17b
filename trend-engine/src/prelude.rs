//! Prelude for commonly used types and traits in trend-engine.

pub use crate::aggregate::{BucketSeries, TimeSeriesAggregator};
pub use crate::alert::{Alert, AlertSeverity};
pub use crate::analyzer::{AnalysisStatus, TrendAnalyzer, TrendReport, TrendSummary};
pub use crate::config::{DetectionMethod, TrendConfig, ValidatedConfig};
pub use crate::detectors::{ChangeDetector, Detector};
pub use crate::error::{TrendError, TrendResult};
pub use crate::logging::LogConfig;
pub use crate::model::{
    ChangeKind, ChangePoint, Observation, SentimentScores, TimeBucket, TrendDirection,
};
pub use crate::store::{
    AlertSink, InMemoryAlertSink, InMemoryObservationSource, JsonLinesAlertSink,
    ObservationSource,
};
