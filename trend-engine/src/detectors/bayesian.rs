//! Bayesian online change-point detection (Adams & MacKay) over bucket means.
//!
//! The detector keeps a posterior over the current run length, the number of
//! buckets since the last change. Each bucket either extends every run by one
//! (probability `1 - hazard`) or starts a fresh run (probability `hazard`).
//! Observations within a run are modelled as Normal with unknown mean and
//! precision under a Normal-Gamma prior, giving a Student-t predictive.
//!
//! A change is declared when, after `min_segment_length` buckets of hindsight,
//! most of the posterior mass sits on short run lengths. The start of the
//! most probable short run is reported as the change point.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use tracing::debug;

use super::{mean, ChangeDetector};
use crate::aggregate::BucketSeries;
use crate::model::{ChangeKind, ChangePoint};

/// Normal-consistency constant for the median absolute deviation.
const MAD_SCALE: f64 = 1.4826;

/// Posterior entries below this probability are dropped.
const PRUNE_PROBABILITY: f64 = 1e-10;

/// Most probable run length after scanning a whole series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunLengthSummary {
    /// Buckets since the most probable last change.
    pub run_length: usize,
    /// Posterior probability of that run length.
    pub probability: f64,
}

/// Bayesian online change-point detector with a constant hazard.
#[derive(Debug, Clone, PartialEq)]
pub struct BayesianDetector {
    /// Prior probability that any given bucket starts a new run.
    pub hazard: f64,
    /// Minimum spacing between change points, also the detection delay.
    pub min_segment_length: usize,
    /// Posterior mass on short runs required to declare a change.
    pub posterior_threshold: f64,
    /// Maximum number of run-length hypotheses kept per step.
    pub max_run_length: usize,
    /// Floor on the estimated observation noise variance.
    pub min_noise_variance: f64,
}

impl BayesianDetector {
    /// Creates a detector with the given hazard and minimum segment length.
    pub fn new(hazard: f64, min_segment_length: usize) -> Self {
        Self {
            hazard,
            min_segment_length,
            posterior_threshold: 0.5,
            max_run_length: 500,
            min_noise_variance: 1e-4,
        }
    }

    /// Sets the short-run posterior mass that raises an alarm.
    pub fn with_posterior_threshold(mut self, threshold: f64) -> Self {
        self.posterior_threshold = threshold;
        self
    }

    /// Caps the run-length distribution at `max_run_length` entries (at least 1).
    pub fn with_max_run_length(mut self, max_run_length: usize) -> Self {
        self.max_run_length = max_run_length.max(1);
        self
    }

    /// Sets the floor on the estimated observation noise variance.
    pub fn with_min_noise_variance(mut self, variance: f64) -> Self {
        self.min_noise_variance = variance;
        self
    }

    /// Runs the filter over the whole series and reports the most probable
    /// final run length. Returns `None` for an empty series.
    ///
    /// A series without changes converges to a single dominant run length
    /// equal to its length.
    pub fn run_length_posterior(&self, series: &BucketSeries) -> Option<RunLengthSummary> {
        if series.is_empty() {
            return None;
        }
        let outcome = self.scan(&series.values());
        outcome
            .posterior
            .iter()
            .max_by(|a, b| a.log_prob.total_cmp(&b.log_prob))
            .map(|h| RunLengthSummary {
                run_length: h.run_length,
                probability: h.log_prob.exp(),
            })
    }

    fn scan(&self, values: &[f64]) -> ScanOutcome {
        let prior = NormalGammaPrior::empirical(values, self.min_noise_variance);
        let log_hazard = self.hazard.ln();
        let log_growth = (-self.hazard).ln_1p();
        let log_prune = PRUNE_PROBABILITY.ln();
        let window = self.min_segment_length;

        let mut posterior = vec![RunHypothesis::fresh(0.0)];
        let mut detections: Vec<Detection> = Vec::new();

        for (t, &x) in values.iter().enumerate() {
            let predictive: Vec<f64> = posterior
                .iter()
                .map(|h| prior.log_predictive(h, x))
                .collect();

            let change_terms: Vec<f64> = posterior
                .iter()
                .zip(&predictive)
                .map(|(h, p)| h.log_prob + p + log_hazard)
                .collect();

            let mut next = Vec::with_capacity(posterior.len() + 1);
            next.push(RunHypothesis::fresh(log_sum_exp(&change_terms)));
            next.extend(
                posterior
                    .iter()
                    .zip(&predictive)
                    .map(|(h, p)| h.grow(x, h.log_prob + p + log_growth)),
            );
            normalize(&mut next);

            if t >= window {
                if let Some(detection) = self.check_change(&next, t, detections.last()) {
                    detections.push(detection);
                }
            }

            next.retain(|h| h.run_length == 0 || h.log_prob > log_prune);
            if next.len() > self.max_run_length {
                next.sort_by(|a, b| b.log_prob.total_cmp(&a.log_prob));
                next.truncate(self.max_run_length);
                next.sort_by_key(|h| h.run_length);
                normalize(&mut next);
            }
            posterior = next;
        }

        ScanOutcome {
            detections,
            posterior,
        }
    }

    fn check_change(
        &self,
        posterior: &[RunHypothesis],
        t: usize,
        previous: Option<&Detection>,
    ) -> Option<Detection> {
        let window = self.min_segment_length;
        let short_runs = posterior
            .iter()
            .filter(|h| (1..=window).contains(&h.run_length));

        let mass: f64 = short_runs.clone().map(|h| h.log_prob.exp()).sum();
        if mass <= self.posterior_threshold {
            return None;
        }

        let best = short_runs.max_by(|a, b| a.log_prob.total_cmp(&b.log_prob))?;
        // run_length <= window <= t, so the run starts inside the series
        let position = t + 1 - best.run_length;
        if position < window {
            return None;
        }
        if let Some(prev) = previous {
            if position < prev.position + window {
                return None;
            }
        }

        debug!(position, observed_at = t, mass, "Run-length posterior shifted");
        Some(Detection {
            position,
            observed_at: t,
            mass,
        })
    }
}

impl Default for BayesianDetector {
    fn default() -> Self {
        Self::new(0.01, 5)
    }
}

impl ChangeDetector for BayesianDetector {
    fn detect(&self, series: &BucketSeries) -> Vec<ChangePoint> {
        if self.min_segment_length == 0 || series.len() < self.min_points() {
            return Vec::new();
        }

        let values = series.values();
        let outcome = self.scan(&values);

        outcome
            .detections
            .iter()
            .map(|d| {
                let after = mean(&values[d.position..=d.observed_at]);
                let before_start = d.position.saturating_sub(self.min_segment_length);
                let before = mean(&values[before_start..d.position]);
                let delta = after - before;
                series.change_point(d.position, ChangeKind::from_delta(delta), delta.abs(), d.mass)
            })
            .collect()
    }

    fn min_points(&self) -> usize {
        2 * self.min_segment_length
    }

    fn name(&self) -> &str {
        "Bayesian"
    }

    fn description(&self) -> &str {
        "Detects changes from the posterior over run lengths under a constant hazard"
    }
}

#[derive(Debug, Clone, Copy)]
struct Detection {
    position: usize,
    observed_at: usize,
    mass: f64,
}

struct ScanOutcome {
    detections: Vec<Detection>,
    posterior: Vec<RunHypothesis>,
}

/// One run-length hypothesis with the sufficient statistics of its run.
#[derive(Debug, Clone, Copy)]
struct RunHypothesis {
    run_length: usize,
    log_prob: f64,
    count: usize,
    mean: f64,
    sum_sq: f64,
}

impl RunHypothesis {
    fn fresh(log_prob: f64) -> Self {
        Self {
            run_length: 0,
            log_prob,
            count: 0,
            mean: 0.0,
            sum_sq: 0.0,
        }
    }

    fn grow(&self, x: f64, log_prob: f64) -> Self {
        let count = self.count + 1;
        let delta = x - self.mean;
        let mean = self.mean + delta / count as f64;
        Self {
            run_length: self.run_length + 1,
            log_prob,
            count,
            mean,
            sum_sq: self.sum_sq + delta * (x - mean),
        }
    }
}

/// Normal-Gamma prior with empirical hyperparameters.
#[derive(Debug, Clone, Copy)]
struct NormalGammaPrior {
    mu_0: f64,
    kappa_0: f64,
    alpha_0: f64,
    beta_0: f64,
}

impl NormalGammaPrior {
    /// Centres the prior on the series mean and scales it by a robust noise
    /// estimate, so that a level shift does not inflate the expected noise.
    fn empirical(values: &[f64], min_noise_variance: f64) -> Self {
        let alpha_0 = 1.0;
        Self {
            mu_0: mean(values),
            kappa_0: 1.0,
            alpha_0,
            beta_0: alpha_0 * noise_variance(values, min_noise_variance),
        }
    }

    fn log_predictive(&self, run: &RunHypothesis, x: f64) -> f64 {
        let n = run.count as f64;
        let kappa_n = self.kappa_0 + n;
        let mu_n = (self.kappa_0 * self.mu_0 + n * run.mean) / kappa_n;
        let alpha_n = self.alpha_0 + n / 2.0;
        let beta_n = self.beta_0
            + run.sum_sq / 2.0
            + self.kappa_0 * n * (run.mean - self.mu_0).powi(2) / (2.0 * kappa_n);
        let scale_sq = beta_n * (kappa_n + 1.0) / (alpha_n * kappa_n);
        student_t_log_pdf(x, mu_n, scale_sq, 2.0 * alpha_n)
    }
}

/// Noise variance from the median absolute first difference.
fn noise_variance(values: &[f64], floor: f64) -> f64 {
    let mut diffs: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    if diffs.is_empty() {
        return floor;
    }
    diffs.sort_by(f64::total_cmp);
    let mid = diffs.len() / 2;
    let median = if diffs.len() % 2 == 1 {
        diffs[mid]
    } else {
        0.5 * (diffs[mid - 1] + diffs[mid])
    };
    // differences of two iid samples have twice the variance
    let sigma = MAD_SCALE * median / std::f64::consts::SQRT_2;
    (sigma * sigma).max(floor)
}

fn student_t_log_pdf(x: f64, mu: f64, scale_sq: f64, df: f64) -> f64 {
    let z_sq = (x - mu).powi(2) / (df * scale_sq);
    ln_gamma(0.5 * (df + 1.0)) - ln_gamma(0.5 * df)
        - 0.5 * (df * std::f64::consts::PI * scale_sq).ln()
        - 0.5 * (df + 1.0) * z_sq.ln_1p()
}

fn log_sum_exp(log_probs: &[f64]) -> f64 {
    let max = log_probs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = log_probs.iter().map(|&lp| (lp - max).exp()).sum();
    max + sum.ln()
}

fn normalize(posterior: &mut [RunHypothesis]) {
    let log_probs: Vec<f64> = posterior.iter().map(|h| h.log_prob).collect();
    let total = log_sum_exp(&log_probs);
    for h in posterior.iter_mut() {
        h.log_prob -= total;
    }
}
