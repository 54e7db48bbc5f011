use ppl_core::EmpiricalDistribution;
use serde::{Deserialize, Serialize};

use crate::metrics::InferenceMetrics;

/// What an engine hands back once it has restored the previous handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inference {
    /// Normalized marginal over return values.
    pub distribution: EmpiricalDistribution,
    /// Counters recorded while the engine ran.
    pub metrics: InferenceMetrics,
}
