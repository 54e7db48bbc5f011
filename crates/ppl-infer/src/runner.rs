use ppl_core::errors::ErrorInfo;
use ppl_core::{Address, Context, EmpiricalDistribution, PplError, Program, Store};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::async_smc::run_async_smc;
use crate::config::{Algorithm, InferenceConfig};
use crate::determinism;
use crate::metrics::InferenceMetrics;
use crate::mh::run_mh;
use crate::outcome::Inference;
use crate::particle_filter::run_particle_filter;
use crate::rejuvenation::run_rejuvenation;

/// Summary returned to callers after a run completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Engine that produced the result.
    pub algorithm: String,
    /// Seed the run's randomness was drawn from.
    pub seed: u64,
    /// Marginal over return values.
    pub distribution: EmpiricalDistribution,
    /// Counters recorded during the run.
    pub metrics: InferenceMetrics,
}

impl RunSummary {
    /// Pretty-printed JSON rendering of the summary.
    ///
    /// A `-inf` normalizer or barrier weight is written as `null` and reads
    /// back as `-inf`.
    pub fn to_json(&self) -> Result<String, PplError> {
        serde_json::to_string_pretty(self).map_err(|err| {
            PplError::Config(
                ErrorInfo::new("json-encode", err.to_string())
                    .with_context("algorithm", &self.algorithm),
            )
        })
    }
}

/// Runs the configured engine once, seeded from the master seed.
pub fn run(
    config: &InferenceConfig,
    program: &Program,
    address: &Address,
    store: Store,
) -> Result<RunSummary, PplError> {
    config.validate()?;
    run_seeded(&config.algorithm, config.seed_policy.master_seed, program, address, store)
}

/// Runs `config.chains` independent replicates, each from its own derived seed.
pub fn run_chains(
    config: &InferenceConfig,
    program: &Program,
    address: &Address,
    store: Store,
) -> Result<Vec<RunSummary>, PplError> {
    config.validate()?;
    (0..config.chains)
        .map(|chain| {
            let seed = determinism::chain_seed(&config.seed_policy, chain);
            run_seeded(&config.algorithm, seed, program, address, store.clone())
        })
        .collect()
}

/// Runs `algorithm` with a fresh context seeded from `seed`.
pub fn run_seeded(
    algorithm: &Algorithm,
    seed: u64,
    program: &Program,
    address: &Address,
    store: Store,
) -> Result<RunSummary, PplError> {
    let mut ctx = Context::from_seed(seed);
    let inference = run_with(&mut ctx, algorithm, program, address, store)?;
    info!(
        algorithm = algorithm.name(),
        seed,
        distinct = inference.distribution.support().len(),
        log_normalizer = inference.distribution.log_normalizer(),
        acceptance_rate = inference.metrics.acceptance_rate(),
        "run complete"
    );
    Ok(RunSummary {
        algorithm: algorithm.name().to_string(),
        seed,
        distribution: inference.distribution,
        metrics: inference.metrics,
    })
}

/// Dispatches to the engine named by `algorithm` on an existing context.
pub fn run_with(
    ctx: &mut Context,
    algorithm: &Algorithm,
    program: &Program,
    address: &Address,
    store: Store,
) -> Result<Inference, PplError> {
    algorithm.validate()?;
    match algorithm {
        Algorithm::Mh(config) => run_mh(ctx, program, address, store, config),
        Algorithm::ParticleFilter(config) => {
            run_particle_filter(ctx, program, address, store, config)
        }
        Algorithm::Rejuvenation(config) => run_rejuvenation(ctx, program, address, store, config),
        Algorithm::AsyncSmc(config) => run_async_smc(ctx, program, address, store, config),
    }
}
