//! Trend CLI - command-line runner for the trend engine
//!
//! This library holds the input handling shared by the `trend-detect` binary.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use trend_engine::model::{Observation, SentimentScores};

/// One input record: either a ready score or a classifier triple.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neutral: Option<f64>,
}

impl InputRecord {
    /// Whether this record belongs to `key`. Records without a key match any key.
    pub fn matches(&self, key: &str) -> bool {
        self.key.as_deref().map_or(true, |k| k == key)
    }

    /// Converts the record into a validated observation.
    pub fn to_observation(&self) -> Result<Observation> {
        if let Some(score) = self.score {
            return Ok(Observation::new(self.timestamp, score)?);
        }
        match (self.positive, self.negative, self.neutral) {
            (Some(positive), Some(negative), Some(neutral)) => {
                let scores = SentimentScores::new(positive, negative, neutral)?;
                Ok(Observation::from_scores(self.timestamp, scores))
            }
            _ => bail!(
                "record at {} has neither `score` nor a full positive/negative/neutral triple",
                self.timestamp
            ),
        }
    }
}

/// Parses a JSON array or JSON Lines document into records.
pub fn parse_records(content: &str) -> Result<Vec<InputRecord>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed to parse JSON array of observations");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid record on line {}", i + 1))
        })
        .collect()
}

/// Parses `content` and keeps the observations belonging to `key`.
pub fn observations_for_key(content: &str, key: &str) -> Result<Vec<Observation>> {
    parse_records(content)?
        .iter()
        .filter(|record| record.matches(key))
        .map(InputRecord::to_observation)
        .collect()
}

/// Reads input from a file, or from stdin when `path` is `None` or `-`.
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => fs::read_to_string(p)
            .with_context(|| format!("failed to read input file '{}'", p.display())),
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read observations from stdin")?;
            Ok(buffer)
        }
    }
}
