#![deny(missing_docs)]
#![doc = include_str!("../docs/inference-api.md")]

//! Inference engines for programs written against the `ppl-core` effect protocol.

/// Asynchronous anytime SMC.
pub mod async_smc;
/// YAML configuration schema and defaults.
pub mod config;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Counters and per-barrier population statistics.
pub mod metrics;
/// Lightweight Metropolis-Hastings.
pub mod mh;
/// Engine results.
pub mod outcome;
/// Particles and synchronous populations.
pub mod particle;
/// Synchronous particle filter.
pub mod particle_filter;
/// Particle filter with MH rejuvenation.
pub mod rejuvenation;
/// Residual resampling.
pub mod resample;
/// Config-driven `run`/`run_chains` entry points.
pub mod runner;
/// Ordered, address-indexed record of random choices.
pub mod trace;

pub use async_smc::{run_async_smc, AsyncSmc, FactorStats};
pub use config::{
    Algorithm, AsyncSmcConfig, InferenceConfig, MhConfig, Normalization, ParticleFilterConfig,
    RejuvenationConfig, SeedPolicy,
};
pub use metrics::{BarrierSample, InferenceMetrics};
pub use mh::{accept_prob, run_mh, MetropolisHastings};
pub use outcome::Inference;
pub use particle::Particle;
pub use particle_filter::{run_particle_filter, ParticleFilter};
pub use rejuvenation::{rejuvenate, run_rejuvenation, RejuvenatingFilter, Rejuvenated};
pub use resample::{residual, Resampled};
pub use runner::{run, run_chains, run_seeded, run_with, RunSummary};
pub use trace::{Trace, TraceEntry};
