use std::fs;
use std::path::Path;

use ppl_core::errors::ErrorInfo;
use ppl_core::PplError;
use serde::{Deserialize, Serialize};

/// YAML-configurable description of one inference run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceConfig {
    /// Engine and its parameters.
    pub algorithm: Algorithm,
    /// Master seed and substream policy.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Number of independent replicate runs executed by `run_chains`.
    #[serde(default = "default_chains")]
    pub chains: usize,
}

fn default_chains() -> usize {
    1
}

impl InferenceConfig {
    /// Wraps an algorithm with default seeding.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            seed_policy: SeedPolicy::default(),
            chains: default_chains(),
        }
    }

    /// Replaces the master seed.
    pub fn with_seed(mut self, master_seed: u64) -> Self {
        self.seed_policy.master_seed = master_seed;
        self
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, PplError> {
        let config: InferenceConfig = serde_yaml::from_str(contents).map_err(|err| {
            PplError::Config(
                ErrorInfo::new("yaml-parse", err.to_string())
                    .with_hint("see InferenceConfig for the accepted keys"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PplError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            PplError::Config(
                ErrorInfo::new("config-io", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        Self::from_yaml_str(&contents).map_err(|err| {
            let info = err.info().clone().with_context("path", path.display());
            PplError::Config(info)
        })
    }

    /// Rejects zero counts.
    pub fn validate(&self) -> Result<(), PplError> {
        require_positive("chains", self.chains)?;
        self.algorithm.validate()
    }
}

/// Supported engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Algorithm {
    /// Lightweight single-site Metropolis-Hastings.
    Mh(MhConfig),
    /// Synchronous particle filter.
    ParticleFilter(ParticleFilterConfig),
    /// Particle filter with MH rejuvenation after each barrier.
    Rejuvenation(RejuvenationConfig),
    /// Asynchronous anytime SMC.
    AsyncSmc(AsyncSmcConfig),
}

impl Algorithm {
    /// Stable name used in logs and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Mh(_) => "mh",
            Algorithm::ParticleFilter(_) => "particle-filter",
            Algorithm::Rejuvenation(_) => "rejuvenation",
            Algorithm::AsyncSmc(_) => "async-smc",
        }
    }

    /// Validates the engine parameters.
    pub fn validate(&self) -> Result<(), PplError> {
        match self {
            Algorithm::Mh(config) => config.validate(),
            Algorithm::ParticleFilter(config) => config.validate(),
            Algorithm::Rejuvenation(config) => config.validate(),
            Algorithm::AsyncSmc(config) => config.validate(),
        }
    }
}

/// Metropolis-Hastings parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MhConfig {
    /// Number of samples recorded, the initial execution included.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_iterations() -> usize {
    1000
}

impl Default for MhConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
        }
    }
}

impl MhConfig {
    /// Rejects a zero iteration count.
    pub fn validate(&self) -> Result<(), PplError> {
        require_positive("iterations", self.iterations)
    }
}

/// Synchronous particle filter parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticleFilterConfig {
    /// Population size.
    #[serde(default = "default_particles")]
    pub particles: usize,
    /// Fail when every particle has weight `-inf` at a barrier.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_particles() -> usize {
    100
}

fn default_strict() -> bool {
    true
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            particles: default_particles(),
            strict: default_strict(),
        }
    }
}

impl ParticleFilterConfig {
    /// Rejects an empty population.
    pub fn validate(&self) -> Result<(), PplError> {
        require_positive("particles", self.particles)
    }
}

/// Particle filter with rejuvenation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejuvenationConfig {
    /// Population size.
    #[serde(default = "default_particles")]
    pub particles: usize,
    /// MH steps applied to every particle after each barrier. Zero disables rejuvenation.
    #[serde(default = "default_rejuvenation_steps")]
    pub rejuvenation_steps: usize,
    /// Only rejuvenate choices made since the previous barrier.
    #[serde(default)]
    pub restricted: bool,
    /// Build the final histogram from every MH step of the final pass.
    #[serde(default)]
    pub collect_all_iterations: bool,
}

fn default_rejuvenation_steps() -> usize {
    10
}

impl Default for RejuvenationConfig {
    fn default() -> Self {
        Self {
            particles: default_particles(),
            rejuvenation_steps: default_rejuvenation_steps(),
            restricted: false,
            collect_all_iterations: false,
        }
    }
}

impl RejuvenationConfig {
    /// Rejects an empty population.
    pub fn validate(&self) -> Result<(), PplError> {
        require_positive("particles", self.particles)
    }
}

/// How the asynchronous engine estimates the log normalization constant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Summed final weights of exited particles over the number of fresh
    /// launches.
    #[default]
    FinalWeights,
    /// Running mean weight at the deepest factor index reached.
    LastFactorMean,
}

/// Asynchronous anytime SMC parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsyncSmcConfig {
    /// Number of particles that must exit before results are reported.
    #[serde(default = "default_particles")]
    pub particles: usize,
    /// Capacity of the pending-particle buffer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Normalization-constant estimator.
    #[serde(default)]
    pub normalization: Normalization,
}

fn default_buffer_size() -> usize {
    20
}

impl Default for AsyncSmcConfig {
    fn default() -> Self {
        Self {
            particles: default_particles(),
            buffer_size: default_buffer_size(),
            normalization: Normalization::default(),
        }
    }
}

impl AsyncSmcConfig {
    /// Rejects zero particle or buffer counts.
    pub fn validate(&self) -> Result<(), PplError> {
        require_positive("particles", self.particles)?;
        require_positive("buffer_size", self.buffer_size)
    }
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedPolicy {
    /// Master seed used for the run.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label mixed into chain seeds so differently labelled runs diverge.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x05EE_D5EE_DD15_5EED_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

fn require_positive(field: &str, value: usize) -> Result<(), PplError> {
    if value == 0 {
        return Err(PplError::Config(
            ErrorInfo::new("zero-count", "count must be positive").with_context("field", field),
        ));
    }
    Ok(())
}
