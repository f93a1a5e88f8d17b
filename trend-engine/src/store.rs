//! Storage seams: where observations come from and where alerts go.
//!
//! The engine itself never performs I/O. [`ObservationSource`] supplies the
//! ordered observations for a key and time range; [`AlertSink`] receives the
//! alerts produced by an analysis run. In-memory implementations are provided
//! for tests and embedding, and [`JsonLinesAlertSink`] appends alerts to a
//! file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::alert::Alert;
use crate::error::{TrendError, TrendResult};
use crate::model::Observation;

/// Supplies observations for a key.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Returns the observations for `key` with `start <= timestamp < end`,
    /// ordered by timestamp. Ties keep their insertion order.
    async fn fetch_observations(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<Vec<Observation>>;
}

/// Receives alerts for persistence or notification.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Stores a batch of alerts.
    async fn publish(&self, alerts: &[Alert]) -> TrendResult<()>;

    /// Returns up to `limit` alerts, newest change point first, optionally
    /// restricted to one key.
    async fn recent_alerts(&self, key: Option<&str>, limit: usize) -> TrendResult<Vec<Alert>>;
}

fn newest_first(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| b.change_point.at.cmp(&a.change_point.at));
}

/// In-memory observation store keyed by keyword.
#[derive(Clone, Default)]
pub struct InMemoryObservationSource {
    data: Arc<RwLock<HashMap<String, Vec<Observation>>>>,
}

impl InMemoryObservationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation, keeping the per-key list sorted.
    pub async fn insert(&self, key: &str, observation: Observation) {
        let mut data = self.data.write().await;
        let entries = data.entry(key.to_string()).or_default();
        let at = entries.partition_point(|o| o.timestamp <= observation.timestamp);
        entries.insert(at, observation);
    }

    /// Adds many observations for a key.
    pub async fn extend(&self, key: &str, observations: impl IntoIterator<Item = Observation>) {
        let mut data = self.data.write().await;
        let entries = data.entry(key.to_string()).or_default();
        entries.extend(observations);
        entries.sort_by_key(|o| o.timestamp);
    }

    /// Keys with at least one observation, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of observations stored for `key`.
    pub async fn len(&self, key: &str) -> usize {
        self.data.read().await.get(key).map_or(0, Vec::len)
    }
}

#[async_trait]
impl ObservationSource for InMemoryObservationSource {
    async fn fetch_observations(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrendResult<Vec<Observation>> {
        let data = self.data.read().await;
        let Some(entries) = data.get(key) else {
            return Ok(Vec::new());
        };
        let lo = entries.partition_point(|o| o.timestamp < start);
        let hi = entries.partition_point(|o| o.timestamp < end);
        Ok(entries[lo..hi.max(lo)].to_vec())
    }
}

/// Limits for [`InMemoryAlertSink`].
#[derive(Debug, Clone)]
pub struct InMemoryAlertConfig {
    /// Maximum number of distinct keys (default: 1,000).
    pub max_keys: usize,
    /// Maximum alerts retained per key; the oldest are evicted (default: 1,000).
    pub max_alerts_per_key: usize,
}

impl Default for InMemoryAlertConfig {
    fn default() -> Self {
        Self {
            max_keys: 1_000,
            max_alerts_per_key: 1_000,
        }
    }
}

/// Summary of what an alert sink currently holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertStoreStats {
    pub total_keys: usize,
    pub total_alerts: usize,
    pub oldest_change_point: Option<DateTime<Utc>>,
    pub newest_change_point: Option<DateTime<Utc>>,
}

/// In-memory alert sink with bounded retention.
#[derive(Clone, Default)]
pub struct InMemoryAlertSink {
    data: Arc<RwLock<HashMap<String, Vec<Alert>>>>,
    config: InMemoryAlertConfig,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InMemoryAlertConfig) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Returns counts and the change-point time range of stored alerts.
    pub async fn stats(&self) -> AlertStoreStats {
        let data = self.data.read().await;
        let all = data.values().flatten().map(|a| a.change_point.at);
        AlertStoreStats {
            total_keys: data.len(),
            total_alerts: data.values().map(Vec::len).sum(),
            oldest_change_point: all.clone().min(),
            newest_change_point: all.max(),
        }
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    #[instrument(skip(self, alerts), fields(alerts = alerts.len()))]
    async fn publish(&self, alerts: &[Alert]) -> TrendResult<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;

        let new_keys = alerts
            .iter()
            .filter(|a| !data.contains_key(&a.key))
            .map(|a| a.key.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        if data.len() + new_keys > self.config.max_keys {
            return Err(TrendError::sink(format!(
                "maximum key limit ({}) exceeded",
                self.config.max_keys
            )));
        }

        for alert in alerts {
            data.entry(alert.key.clone()).or_default().push(alert.clone());
        }

        for (key, entries) in data.iter_mut() {
            if entries.len() > self.config.max_alerts_per_key {
                newest_first(entries);
                let evicted = entries.len() - self.config.max_alerts_per_key;
                entries.truncate(self.config.max_alerts_per_key);
                warn!(
                    key = key.as_str(),
                    evicted,
                    max_alerts = self.config.max_alerts_per_key,
                    "Alert retention limit reached, evicted oldest alerts"
                );
            }
        }

        debug!(published = alerts.len(), "Stored alerts in memory");
        Ok(())
    }

    async fn recent_alerts(&self, key: Option<&str>, limit: usize) -> TrendResult<Vec<Alert>> {
        let data = self.data.read().await;
        let mut alerts: Vec<Alert> = match key {
            Some(key) => data.get(key).cloned().unwrap_or_default(),
            None => data.values().flatten().cloned().collect(),
        };
        newest_first(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }
}

/// Append-only JSON Lines alert log.
///
/// Each published alert becomes one line. Reads parse the whole file, so this
/// sink suits CLI runs and audit trails rather than high-volume serving.
#[derive(Debug)]
pub struct JsonLinesAlertSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesAlertSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AlertSink for JsonLinesAlertSink {
    #[instrument(skip(self, alerts), fields(path = %self.path.display(), alerts = alerts.len()))]
    async fn publish(&self, alerts: &[Alert]) -> TrendResult<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for alert in alerts {
            serde_json::to_writer(&mut buffer, alert)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        info!(published = alerts.len(), "Appended alerts to log");
        Ok(())
    }

    async fn recent_alerts(&self, key: Option<&str>, limit: usize) -> TrendResult<Vec<Alert>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut alerts = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let alert: Alert = serde_json::from_str(line).map_err(|e| {
                TrendError::Serialization(format!(
                    "{}:{}: {e}",
                    self.path.display(),
                    line_no + 1
                ))
            })?;
            if key.map_or(true, |k| alert.key == k) {
                alerts.push(alert);
            }
        }

        newest_first(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }
}
