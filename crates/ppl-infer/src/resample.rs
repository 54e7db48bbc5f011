use ppl_core::errors::ErrorInfo;
use ppl_core::numeric::log_mean_exp;
use ppl_core::{PplError, RngHandle};

/// Outcome of one residual resampling step.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled {
    /// Index of the parent of every particle in the new population.
    ///
    /// Multinomially filled slots come first, followed by the deterministically
    /// retained copies, in parent order.
    pub ancestors: Vec<usize>,
    /// Log-mean weight of the old population; every survivor is reset to it.
    pub log_mean_weight: f64,
    /// Number of deterministically retained copies.
    pub retained: usize,
}

/// Residual resampling (Liu 2008, section 3.4.4).
///
/// Each particle keeps `floor(exp(w - mean))` copies; the remaining slots are
/// filled by sampling in proportion to the fractional remainders. Returns
/// `Ok(None)` when the log-mean weight is `-inf` and a numeric error when any
/// weight is NaN.
pub fn residual(
    log_weights: &[f64],
    rng: &mut RngHandle,
) -> Result<Option<Resampled>, PplError> {
    if let Some(idx) = log_weights.iter().position(|w| w.is_nan()) {
        return Err(PplError::Numeric(
            ErrorInfo::new("weight-nan", "particle weight is NaN").with_context("particle", idx),
        ));
    }
    let m = log_weights.len();
    let log_mean_weight = log_mean_exp(log_weights);
    if log_mean_weight == f64::NEG_INFINITY {
        return Ok(None);
    }

    let mut retained = Vec::with_capacity(m);
    let mut remainders = Vec::with_capacity(m);
    for (idx, weight) in log_weights.iter().enumerate() {
        let expected = (weight - log_mean_weight).exp();
        let copies = expected.floor();
        remainders.push(expected - copies);
        for _ in 0..copies as usize {
            retained.push(idx);
        }
    }
    retained.truncate(m);

    let missing = m - retained.len();
    let mut ancestors = Vec::with_capacity(m);
    for _ in 0..missing {
        ancestors.push(multinomial(&remainders, rng));
    }
    let kept = retained.len();
    ancestors.extend(retained);

    Ok(Some(Resampled {
        ancestors,
        log_mean_weight,
        retained: kept,
    }))
}

/// Draws an index with probability proportional to `weights`; uniform if they are all zero.
pub fn multinomial(weights: &[f64], rng: &mut RngHandle) -> usize {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return rng.index(weights.len());
    }
    let mut u = rng.uniform() * total;
    for (idx, weight) in weights.iter().enumerate() {
        if u < *weight {
            return idx;
        }
        u -= weight;
    }
    weights
        .iter()
        .rposition(|w| *w > 0.0)
        .unwrap_or(weights.len() - 1)
}
