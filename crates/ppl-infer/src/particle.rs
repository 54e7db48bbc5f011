use std::collections::BTreeSet;

use ppl_core::errors::ErrorInfo;
use ppl_core::numeric::{effective_sample_size, log_mean_exp};
use ppl_core::{Context, Continuation, Histogram, PplError, Resume, Store, Value};
use tracing::{debug, warn};

use crate::metrics::BarrierSample;
use crate::resample::residual;
use crate::trace::Trace;

/// One weighted execution in a synchronous population.
#[derive(Debug, Clone)]
pub struct Particle {
    /// Continuation resuming the particle after its latest factor.
    pub continuation: Continuation,
    /// Store held by the particle.
    pub store: Store,
    /// Log importance weight.
    pub weight: f64,
    /// Full log-joint of the execution so far.
    pub score: f64,
    /// Every random choice made so far. Empty unless the engine rejuvenates.
    pub trace: Trace,
    /// Trace position from which restricted rejuvenation may regenerate.
    pub regen_floor: usize,
    /// Factors the particle has passed.
    pub factor_count: usize,
    /// Whether the particle has exited.
    pub completed: bool,
    /// Return value once completed.
    pub value: Option<Value>,
}

impl Particle {
    /// Particle about to run `continuation` from the program start.
    pub fn new(continuation: Continuation, store: Store) -> Self {
        Self {
            continuation,
            store,
            weight: 0.0,
            score: 0.0,
            trace: Trace::new(),
            regen_floor: 0,
            factor_count: 0,
            completed: false,
            value: None,
        }
    }
}

/// Fixed-size population scheduled round-robin between factors.
#[derive(Debug, Clone)]
pub(crate) struct Population {
    pub(crate) particles: Vec<Particle>,
    pub(crate) active: usize,
}

impl Population {
    pub(crate) fn new(count: usize, entry: &Continuation, store: &Store) -> Self {
        Self {
            particles: (0..count)
                .map(|_| Particle::new(entry.clone(), store.clone()))
                .collect(),
            active: 0,
        }
    }

    pub(crate) fn active_mut(&mut self) -> &mut Particle {
        &mut self.particles[self.active]
    }

    /// Next particle after the active one that has not exited, wrapping around.
    pub(crate) fn next_running(&self) -> Option<usize> {
        let start = self.active + 1;
        (start..self.particles.len())
            .chain(0..start.min(self.particles.len()))
            .find(|&idx| !self.particles[idx].completed)
    }

    pub(crate) fn first_running(&self) -> Option<usize> {
        self.particles.iter().position(|p| !p.completed)
    }

    pub(crate) fn last_running(&self) -> Option<usize> {
        self.particles.iter().rposition(|p| !p.completed)
    }

    /// Whether the active particle closes the current round.
    pub(crate) fn at_barrier(&self) -> bool {
        self.last_running() == Some(self.active)
    }

    pub(crate) fn resume_active(&self) -> Resume {
        let particle = &self.particles[self.active];
        Resume::Continue {
            k: particle.continuation.clone(),
            store: particle.store.clone(),
        }
    }

    pub(crate) fn log_weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    /// Log-mean of the current weights.
    pub(crate) fn log_normalizer(&self) -> f64 {
        log_mean_exp(&self.log_weights())
    }

    /// Residual resampling across the whole population.
    ///
    /// When every weight is `-inf` a strict population fails; a lenient one
    /// keeps its particles, sets every weight to `-inf` and reports a
    /// degenerate barrier.
    pub(crate) fn resample(
        &mut self,
        ctx: &mut Context,
        strict: bool,
        algorithm: &'static str,
        barrier: usize,
    ) -> Result<BarrierSample, PplError> {
        let weights = self.log_weights();
        let effective_sample_size = effective_sample_size(&weights);
        match residual(&weights, ctx.rng())? {
            Some(resampled) => {
                let distinct_ancestors = resampled
                    .ancestors
                    .iter()
                    .collect::<BTreeSet<_>>()
                    .len();
                let mut next = Vec::with_capacity(self.particles.len());
                for &parent in &resampled.ancestors {
                    let mut child = self.particles[parent].clone();
                    child.weight = resampled.log_mean_weight;
                    next.push(child);
                }
                self.particles = next;
                debug!(
                    algorithm,
                    barrier,
                    log_mean_weight = resampled.log_mean_weight,
                    ess = effective_sample_size,
                    distinct_ancestors,
                    "resampled"
                );
                Ok(BarrierSample {
                    barrier,
                    log_mean_weight: resampled.log_mean_weight,
                    effective_sample_size,
                    distinct_ancestors,
                    degenerate: false,
                })
            }
            None if strict => Err(PplError::Resampling(
                ErrorInfo::new("all-weights-impossible", "every particle has weight -inf")
                    .with_context("algorithm", algorithm)
                    .with_context("barrier", barrier)
                    .with_context("particles", self.particles.len())
                    .with_hint("use lenient mode to continue with a degenerate population"),
            )),
            None => {
                warn!(
                    algorithm,
                    barrier,
                    particles = self.particles.len(),
                    "every particle has weight -inf, skipping resampling"
                );
                for particle in &mut self.particles {
                    particle.weight = f64::NEG_INFINITY;
                }
                Ok(BarrierSample {
                    barrier,
                    log_mean_weight: f64::NEG_INFINITY,
                    effective_sample_size,
                    distinct_ancestors: self.particles.len(),
                    degenerate: true,
                })
            }
        }
    }

    /// Unweighted histogram over the return values of completed particles.
    pub(crate) fn histogram(&self) -> Histogram {
        let mut histogram = Histogram::new();
        for value in self.particles.iter().filter_map(|p| p.value.clone()) {
            histogram.observe(value);
        }
        histogram
    }
}
