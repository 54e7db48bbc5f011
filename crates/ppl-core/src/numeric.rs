//! Log-space helpers.

use crate::errors::{ErrorInfo, PplError};

/// `ln(sum(exp(xs)))`, returning `-inf` for empty input or all `-inf` entries.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = xs
        .iter()
        .filter(|&&x| x != f64::NEG_INFINITY)
        .map(|&x| (x - max).exp())
        .sum();
    max + sum.ln()
}

/// Log of the arithmetic mean of `exp(xs)`.
pub fn log_mean_exp(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NEG_INFINITY;
    }
    logsumexp(xs) - (xs.len() as f64).ln()
}

/// Effective sample size of a set of log weights.
pub fn effective_sample_size(log_weights: &[f64]) -> f64 {
    let total = logsumexp(log_weights);
    if total == f64::NEG_INFINITY {
        return 0.0;
    }
    let doubled: Vec<f64> = log_weights.iter().map(|w| 2.0 * w).collect();
    (2.0 * total - logsumexp(&doubled)).exp()
}

/// Rejects NaN; `-inf` and finite values pass through.
pub fn ensure_not_nan(value: f64, code: &str, what: &str) -> Result<f64, PplError> {
    if value.is_nan() {
        Err(PplError::Numeric(
            ErrorInfo::new(code, format!("{what} is NaN")).with_context("quantity", what),
        ))
    } else {
        Ok(value)
    }
}

/// Serde adapter for log weights that may be `-inf`.
///
/// JSON has no infinities, so `-inf` is written as `null` and `null` reads
/// back as `-inf`. Use with `#[serde(with = "ppl_core::numeric::log_weight")]`.
pub mod log_weight {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Writes `-inf` as `None` and every other value as `Some`.
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if *value == f64::NEG_INFINITY {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    /// Reads `None` as `-inf`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logsumexp_handles_negative_infinity() {
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            logsumexp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        let value = logsumexp(&[0.0, f64::NEG_INFINITY]);
        assert!(value.abs() < 1e-12);
    }

    #[test]
    fn log_mean_of_equal_weights_is_the_weight() {
        let mean = log_mean_exp(&[-1.5, -1.5, -1.5]);
        assert!((mean + 1.5).abs() < 1e-12);
    }

    #[test]
    fn ess_of_uniform_weights_is_population_size() {
        let ess = effective_sample_size(&[0.3; 8]);
        assert!((ess - 8.0).abs() < 1e-9);
    }
}
