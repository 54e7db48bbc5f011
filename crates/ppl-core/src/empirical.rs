//! Histograms over return values and the empirical distributions built from them.

use indexmap::IndexMap;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::effect::Distribution;
use crate::errors::{ErrorInfo, PplError};
use crate::value::Value;

/// Mass accumulated per distinct return value, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    buckets: IndexMap<Value, f64>,
    observations: usize,
}

impl Histogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one unit of mass to `value`.
    pub fn observe(&mut self, value: Value) {
        self.add(value, 1.0);
    }

    /// Adds `mass` to `value`.
    pub fn add(&mut self, value: Value, mass: f64) {
        *self.buckets.entry(value).or_insert(0.0) += mass;
        self.observations += 1;
    }

    /// Mass recorded for `value`.
    pub fn mass(&self, value: &Value) -> f64 {
        self.buckets.get(value).copied().unwrap_or(0.0)
    }

    /// Total recorded mass.
    pub fn total(&self) -> f64 {
        self.buckets.values().sum()
    }

    /// Number of `add`/`observe` calls.
    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Iterates over `(value, mass)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, f64)> {
        self.buckets.iter().map(|(value, mass)| (value, *mass))
    }
}

/// Normalized probability mass function over distinct return values.
///
/// This is what every engine hands back to its caller. It also satisfies the
/// [`Distribution`] contract, so an inference result can be sampled from or
/// scored by a subsequent program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalDistribution {
    support: Vec<(Value, f64)>,
    #[serde(with = "crate::numeric::log_weight")]
    log_normalizer: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acceptance_ratio: Option<f64>,
    samples: usize,
}

impl EmpiricalDistribution {
    /// Normalizes a histogram. Fails when it is empty or carries no finite mass.
    pub fn from_histogram(histogram: &Histogram) -> Result<Self, PplError> {
        let total = histogram.total();
        if histogram.is_empty() || !(total > 0.0) || !total.is_finite() {
            return Err(PplError::Numeric(
                ErrorInfo::new("empty-histogram", "cannot normalize histogram")
                    .with_context("buckets", histogram.len())
                    .with_context("total", total),
            ));
        }
        let support = histogram
            .iter()
            .map(|(value, mass)| (value.clone(), mass / total))
            .collect();
        Ok(Self {
            support,
            log_normalizer: 0.0,
            acceptance_ratio: None,
            samples: histogram.observations(),
        })
    }

    /// Attaches a log normalization-constant estimate.
    pub fn with_log_normalizer(mut self, log_normalizer: f64) -> Self {
        self.log_normalizer = log_normalizer;
        self
    }

    /// Attaches an empirical acceptance ratio.
    pub fn with_acceptance_ratio(mut self, ratio: f64) -> Self {
        self.acceptance_ratio = Some(ratio);
        self
    }

    /// Probability of `value` (zero when unseen).
    pub fn probability(&self, value: &Value) -> f64 {
        self.support
            .iter()
            .find(|(candidate, _)| candidate == value)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }

    /// Distinct values with their probabilities.
    pub fn support(&self) -> &[(Value, f64)] {
        &self.support
    }

    /// Estimate of the log normalization constant.
    pub fn log_normalizer(&self) -> f64 {
        self.log_normalizer
    }

    /// Empirical MH acceptance ratio, when produced by an MH engine.
    pub fn acceptance_ratio(&self) -> Option<f64> {
        self.acceptance_ratio
    }

    /// Number of observations the distribution was built from.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Most probable value; ties resolve to the first-seen value.
    pub fn mode(&self) -> Option<&Value> {
        let mut best: Option<&(Value, f64)> = None;
        for entry in &self.support {
            if best.map_or(true, |current| entry.1 > current.1) {
                best = Some(entry);
            }
        }
        best.map(|(value, _)| value)
    }

    /// Expectation of a numeric projection of the return values.
    pub fn expectation(&self, f: impl Fn(&Value) -> f64) -> f64 {
        self.support.iter().map(|(value, p)| p * f(value)).sum()
    }
}

impl Distribution for EmpiricalDistribution {
    fn name(&self) -> &str {
        "empirical"
    }

    fn draw(&self, _params: &[Value], rng: &mut dyn RngCore) -> Result<Value, PplError> {
        let u: f64 = rng.gen();
        let mut acc = 0.0;
        for (value, p) in &self.support {
            acc += p;
            if u < acc {
                return Ok(value.clone());
            }
        }
        self.support
            .last()
            .map(|(value, _)| value.clone())
            .ok_or_else(|| {
                PplError::Distribution(ErrorInfo::new(
                    "empty-support",
                    "empirical distribution has no support",
                ))
            })
    }

    fn score(&self, _params: &[Value], value: &Value) -> Result<f64, PplError> {
        Ok(self.probability(value).ln())
    }
}
