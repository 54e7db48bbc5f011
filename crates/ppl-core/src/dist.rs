//! A handful of elementary distributions.
//!
//! The runtime treats distributions as an opaque capability; these exist so
//! that demos, benches and tests have something concrete to draw from.

use std::f64::consts::PI;
use std::rc::Rc;

use rand::{Rng, RngCore};

use crate::effect::{Distribution, DistributionRef};
use crate::errors::{ErrorInfo, PplError};
use crate::value::Value;

fn bad_params(dist: &str, reason: &str, params: &[Value]) -> PplError {
    PplError::Distribution(
        ErrorInfo::new("bad-params", reason.to_string())
            .with_context("distribution", dist)
            .with_context("arity", params.len()),
    )
}

fn real_param(dist: &str, params: &[Value], idx: usize) -> Result<f64, PplError> {
    params
        .get(idx)
        .and_then(Value::as_real)
        .ok_or_else(|| bad_params(dist, "expected a numeric parameter", params))
}

fn list_param<'a>(dist: &str, params: &'a [Value], idx: usize) -> Result<&'a [Value], PplError> {
    params
        .get(idx)
        .and_then(Value::as_list)
        .ok_or_else(|| bad_params(dist, "expected a list parameter", params))
}

/// Coin flip. Params: `[p]`. Values: `Bool`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bernoulli;

impl Distribution for Bernoulli {
    fn name(&self) -> &str {
        "bernoulli"
    }

    fn draw(&self, params: &[Value], rng: &mut dyn RngCore) -> Result<Value, PplError> {
        let p = real_param(self.name(), params, 0)?;
        Ok(Value::Bool(rng.gen::<f64>() < p))
    }

    fn score(&self, params: &[Value], value: &Value) -> Result<f64, PplError> {
        let p = real_param(self.name(), params, 0)?;
        match value.as_bool() {
            Some(true) => Ok(p.ln()),
            Some(false) => Ok((1.0 - p).ln()),
            None => Ok(f64::NEG_INFINITY),
        }
    }
}

/// Index drawn proportionally to unnormalized weights. Params: `[List(weights)]`. Values: `Int`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discrete;

impl Discrete {
    fn weights(params: &[Value]) -> Result<Vec<f64>, PplError> {
        let raw = list_param("discrete", params, 0)?;
        raw.iter()
            .map(|w| match w.as_real() {
                Some(x) if x >= 0.0 && x.is_finite() => Ok(x),
                _ => Err(bad_params("discrete", "weights must be finite and non-negative", params)),
            })
            .collect()
    }
}

impl Distribution for Discrete {
    fn name(&self) -> &str {
        "discrete"
    }

    fn draw(&self, params: &[Value], rng: &mut dyn RngCore) -> Result<Value, PplError> {
        let weights = Self::weights(params)?;
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(bad_params(self.name(), "weights sum to zero", params));
        }
        let mut u = rng.gen::<f64>() * total;
        for (idx, w) in weights.iter().enumerate() {
            if u < *w {
                return Ok(Value::Int(idx as i64));
            }
            u -= w;
        }
        Ok(Value::Int(weights.len() as i64 - 1))
    }

    fn score(&self, params: &[Value], value: &Value) -> Result<f64, PplError> {
        let weights = Self::weights(params)?;
        let total: f64 = weights.iter().sum();
        match value.as_int() {
            Some(idx) if idx >= 0 && (idx as usize) < weights.len() => {
                Ok((weights[idx as usize] / total).ln())
            }
            _ => Ok(f64::NEG_INFINITY),
        }
    }
}

/// Uniform choice among the listed items. Params: `[List(items)]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformDraw;

impl Distribution for UniformDraw {
    fn name(&self) -> &str {
        "uniform-draw"
    }

    fn draw(&self, params: &[Value], rng: &mut dyn RngCore) -> Result<Value, PplError> {
        let items = list_param(self.name(), params, 0)?;
        if items.is_empty() {
            return Err(bad_params(self.name(), "no items to draw from", params));
        }
        Ok(items[rng.gen_range(0..items.len())].clone())
    }

    fn score(&self, params: &[Value], value: &Value) -> Result<f64, PplError> {
        let items = list_param(self.name(), params, 0)?;
        let hits = items.iter().filter(|item| *item == value).count();
        Ok((hits as f64 / items.len() as f64).ln())
    }
}

/// Normal distribution. Params: `[mean, std]`. Values: `Real`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl Distribution for Gaussian {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn draw(&self, params: &[Value], rng: &mut dyn RngCore) -> Result<Value, PplError> {
        let mu = real_param(self.name(), params, 0)?;
        let sigma = real_param(self.name(), params, 1)?;
        // Box-Muller
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        Ok(Value::Real(mu + sigma * z))
    }

    fn score(&self, params: &[Value], value: &Value) -> Result<f64, PplError> {
        let mu = real_param(self.name(), params, 0)?;
        let sigma = real_param(self.name(), params, 1)?;
        if !(sigma > 0.0) {
            return Err(bad_params(self.name(), "std must be positive", params));
        }
        match value.as_real() {
            Some(x) => {
                let z = (x - mu) / sigma;
                Ok(-0.5 * z * z - sigma.ln() - 0.5 * (2.0 * PI).ln())
            }
            None => Ok(f64::NEG_INFINITY),
        }
    }
}

/// Shared [`Bernoulli`] handle.
pub fn bernoulli() -> DistributionRef {
    Rc::new(Bernoulli)
}

/// Shared [`Discrete`] handle.
pub fn discrete() -> DistributionRef {
    Rc::new(Discrete)
}

/// Shared [`UniformDraw`] handle.
pub fn uniform_draw() -> DistributionRef {
    Rc::new(UniformDraw)
}

/// Shared [`Gaussian`] handle.
pub fn gaussian() -> DistributionRef {
    Rc::new(Gaussian)
}
