#![allow(dead_code)]

use std::rc::Rc;

use ppl_core::dist::bernoulli;
use ppl_core::{exit, factor, sample, Address, Program, Step, Store, Value};

/// One fair coin, no factors.
pub fn coin() -> Program {
    Program::new(|store, address| {
        sample(
            store,
            address.child("coin"),
            bernoulli(),
            vec![Value::Real(0.5)],
            exit,
        )
    })
}

/// Fair coin conditioned to come up `true`.
pub fn hard_constraint() -> Program {
    Program::new(|store, address| {
        let guard = address.child("guard");
        sample(
            store,
            address.child("coin"),
            bernoulli(),
            vec![Value::Real(0.5)],
            move |store, coin| {
                let log_weight = if coin.as_bool() == Some(true) {
                    0.0
                } else {
                    f64::NEG_INFINITY
                };
                factor(store, guard.clone(), log_weight, move |store| {
                    exit(store, coin.clone())
                })
            },
        )
    })
}

/// Fair coin that every factor rules out.
pub fn impossible() -> Program {
    Program::new(|store, address| {
        let guard = address.child("guard");
        sample(
            store,
            address.child("coin"),
            bernoulli(),
            vec![Value::Real(0.5)],
            move |store, coin| {
                factor(store, guard.clone(), f64::NEG_INFINITY, move |store| {
                    exit(store, coin.clone())
                })
            },
        )
    })
}

/// Independent latent coins `x_i`, each observed through a channel that
/// reports it correctly with probability 0.9. Returns the number of `true` latents.
///
/// Posterior: each `x_i` equals its observation with probability 0.9.
pub fn noisy_observations(observations: &[bool]) -> Program {
    let observations: Rc<Vec<bool>> = Rc::new(observations.to_vec());
    Program::new(move |store, address| observe_step(store, address, observations.clone(), 0, 0))
}

fn observe_step(
    store: Store,
    address: Address,
    observations: Rc<Vec<bool>>,
    idx: usize,
    count: i64,
) -> Step {
    if idx == observations.len() {
        return exit(store, Value::Int(count));
    }
    let latent = address.child(format!("x{idx}"));
    let observed = address.child(format!("y{idx}"));
    sample(
        store,
        latent,
        bernoulli(),
        vec![Value::Real(0.5)],
        move |store, x| {
            let x = x.as_bool().unwrap_or(false);
            let log_weight = if x == observations[idx] {
                0.9f64.ln()
            } else {
                0.1f64.ln()
            };
            let address = address.clone();
            let observations = observations.clone();
            factor(store, observed.clone(), log_weight, move |store| {
                observe_step(
                    store,
                    address.clone(),
                    observations.clone(),
                    idx + 1,
                    count + x as i64,
                )
            })
        },
    )
}

/// Number of failed fair flips before the first success, conditioned on at
/// least two failures. The trace length varies with the value.
///
/// Posterior: `P(n = k) = 2^-(k - 1)` for `k >= 2`.
pub fn conditioned_geometric() -> Program {
    Program::new(|store, address| flip_until_success(store, address, 0))
}

fn flip_until_success(store: Store, address: Address, failures: i64) -> Step {
    let site = address.child(format!("flip{failures}"));
    sample(
        store,
        site,
        bernoulli(),
        vec![Value::Real(0.5)],
        move |store, success| {
            if success.as_bool() == Some(true) {
                let log_weight = if failures >= 2 { 0.0 } else { f64::NEG_INFINITY };
                factor(store, address.child("guard"), log_weight, move |store| {
                    exit(store, Value::Int(failures))
                })
            } else {
                flip_until_success(store, address.clone(), failures + 1)
            }
        },
    )
}

/// Mean of an integer-valued marginal.
pub fn mean(distribution: &ppl_core::EmpiricalDistribution) -> f64 {
    distribution.expectation(|value| value.as_int().unwrap_or(0) as f64)
}
