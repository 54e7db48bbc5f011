//! Asynchronous anytime SMC (Paige, Wood, Doucet and Teh, 2014).
//!
//! There is no barrier. A bounded buffer holds particles waiting to be
//! resumed; each scheduling decision either launches a fresh particle or
//! resumes a buffered one. At every factor the arriving particle is compared
//! against a running mean weight for that factor index and is given zero,
//! one or several children accordingly. The session can be resumed with a
//! larger particle budget without discarding buffered work.

use std::collections::BTreeMap;

use ppl_core::errors::ErrorInfo;
use ppl_core::numeric::logsumexp;
use ppl_core::{
    drive, Address, Context, Continuation, Control, EmpiricalDistribution, FactorRequest, Handler,
    HandlerId, Histogram, PplError, Program, Resume, SampleRequest, Store, Value,
};
use tracing::{debug, trace};

use crate::config::{AsyncSmcConfig, Normalization};
use crate::metrics::InferenceMetrics;
use crate::outcome::Inference;

#[derive(Debug, Clone)]
struct AsyncParticle {
    continuation: Continuation,
    store: Store,
    weight: f64,
    final_weight: f64,
    factor_index: Option<usize>,
    children: usize,
    multiplicity: f64,
    value: Option<Value>,
}

impl AsyncParticle {
    fn fresh(continuation: Continuation, store: Store) -> Self {
        Self {
            continuation,
            store,
            weight: 0.0,
            final_weight: 0.0,
            factor_index: None,
            children: 0,
            multiplicity: 1.0,
            value: None,
        }
    }

    fn child(&self) -> Self {
        Self {
            children: 1,
            ..self.clone()
        }
    }
}

/// Running statistics of the arrivals at one factor index.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorStats {
    /// Particles that have arrived so far.
    pub arrivals: usize,
    /// Multiplicity-weighted log-mean weight of those arrivals.
    pub wbar: f64,
    /// Children assigned across all arrivals.
    pub total_children: usize,
}

/// Asynchronous anytime SMC session.
#[derive(Debug)]
pub struct AsyncSmc {
    id: HandlerId,
    entry: Continuation,
    store: Store,
    buffer: Vec<AsyncParticle>,
    buffer_size: usize,
    target: usize,
    stats: BTreeMap<usize, FactorStats>,
    exited: Vec<AsyncParticle>,
    active: Option<AsyncParticle>,
    launched: usize,
    normalization: Normalization,
    metrics: InferenceMetrics,
}

impl AsyncSmc {
    /// Validates `config`, seeds the buffer and installs the engine on `ctx`.
    ///
    /// The buffer starts with `floor(3 * buffer_size / 5)` fresh particles.
    pub fn install(
        ctx: &mut Context,
        program: &Program,
        address: &Address,
        store: Store,
        config: &AsyncSmcConfig,
    ) -> Result<Self, PplError> {
        config.validate()?;
        let entry = program.entry(address);
        let initial = config.buffer_size * 3 / 5;
        let buffer = (0..initial)
            .map(|_| AsyncParticle::fresh(entry.clone(), store.clone()))
            .collect();
        let metrics = InferenceMetrics {
            executions: initial,
            particles_spawned: initial,
            ..InferenceMetrics::default()
        };
        Ok(Self {
            id: ctx.install("async-smc"),
            entry,
            store,
            buffer,
            buffer_size: config.buffer_size,
            target: config.particles,
            stats: BTreeMap::new(),
            exited: Vec::new(),
            active: None,
            launched: 0,
            normalization: config.normalization,
            metrics,
        })
    }

    /// Runs until the particle budget has exited and returns the marginal.
    ///
    /// The engine must be installed; it restores the previous handler when done.
    pub fn run(&mut self, ctx: &mut Context) -> Result<EmpiricalDistribution, PplError> {
        if self.exited.len() >= self.target {
            let distribution = self.distribution()?;
            ctx.restore(self.id)?;
            return Ok(distribution);
        }
        let start = self.start(ctx);
        drive(self, ctx, start)
    }

    /// Continuation of the next particle to run.
    ///
    /// For callers that drive the engine through their own handler; the engine
    /// must already be installed.
    pub fn start(&mut self, ctx: &mut Context) -> Resume {
        self.launch(ctx)
    }

    /// Reinstalls the engine, raises the budget by `extra` particles and runs
    /// again, keeping the buffer, factor statistics and exited particles.
    pub fn resume(
        &mut self,
        ctx: &mut Context,
        extra: usize,
    ) -> Result<EmpiricalDistribution, PplError> {
        if extra == 0 {
            return Err(PplError::Config(
                ErrorInfo::new("zero-count", "count must be positive")
                    .with_context("field", "extra")
                    .with_context("algorithm", "async-smc"),
            ));
        }
        self.id = ctx.install("async-smc");
        self.target += extra;
        debug!(target_particles = self.target, extra, "async smc resumed");
        self.run(ctx)
    }

    /// Particles that have exited so far.
    pub fn exited(&self) -> usize {
        self.exited.len()
    }

    /// Current particle budget.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Particles waiting in the buffer, never more than `buffer_size`.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Fresh particles started from the program entry, across every resume.
    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Statistics for factor index `index`.
    pub fn factor_stats(&self, index: usize) -> Option<&FactorStats> {
        self.stats.get(&index)
    }

    /// Counters recorded so far.
    pub fn metrics(&self) -> &InferenceMetrics {
        &self.metrics
    }

    /// Picks the next particle: a fresh one with probability `1 / (len + 1)`,
    /// otherwise a uniformly chosen buffered particle.
    fn launch(&mut self, ctx: &mut Context) -> Resume {
        let i = ctx.rng().index(self.buffer.len() + 1);
        let particle = if i == self.buffer.len() {
            self.metrics.executions += 1;
            self.metrics.particles_spawned += 1;
            AsyncParticle::fresh(self.entry.clone(), self.store.clone())
        } else if self.buffer[i].children > 1 {
            self.buffer[i].children -= 1;
            self.buffer[i].child()
        } else {
            self.buffer.remove(i)
        };
        if particle.factor_index.is_none() {
            self.launched += 1;
        }
        self.activate(particle)
    }

    fn activate(&mut self, particle: AsyncParticle) -> Resume {
        let resume = Resume::Continue {
            k: particle.continuation.clone(),
            store: particle.store.clone(),
        };
        self.active = Some(particle);
        resume
    }

    fn take_active(&mut self) -> Result<AsyncParticle, PplError> {
        self.active.take().ok_or_else(|| {
            PplError::Handler(
                ErrorInfo::new("no-active-particle", "effect arrived with no particle running")
                    .with_context("algorithm", "async-smc"),
            )
        })
    }

    /// Children, reset weight and updated running mean for a non-first arrival.
    fn offspring(
        &self,
        ctx: &mut Context,
        stats: &FactorStats,
        weight: f64,
        multiplicity: f64,
    ) -> (usize, f64, f64) {
        let arrivals = stats.arrivals as f64;
        let ldenom = (arrivals + multiplicity).ln();
        let wbar = logsumexp(&[
            arrivals.ln() - ldenom + stats.wbar,
            multiplicity.ln() - ldenom + weight,
        ]);
        let log_ratio = weight - wbar;
        if log_ratio < 0.0 {
            if ctx.rng().uniform().ln() < log_ratio {
                (1, wbar, wbar)
            } else {
                (0, f64::NEG_INFINITY, wbar)
            }
        } else {
            let min_k = self.buffer_size.min(stats.arrivals);
            let ratio = log_ratio.exp();
            let rounded = if stats.total_children <= min_k {
                ratio.ceil()
            } else {
                ratio.floor()
            };
            let children = rounded.clamp(1.0, self.target.max(1) as f64);
            (children as usize, weight - children.ln(), wbar)
        }
    }

    fn finish(&mut self, ctx: &mut Context) -> Result<Control<EmpiricalDistribution>, PplError> {
        let distribution = self.distribution()?;
        ctx.restore(self.id)?;
        Ok(Control::Done(distribution))
    }

    fn distribution(&self) -> Result<EmpiricalDistribution, PplError> {
        let weights: Vec<f64> = self.exited.iter().map(|p| p.weight).collect();
        let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut histogram = Histogram::new();
        for particle in &self.exited {
            if let Some(value) = &particle.value {
                histogram.add(value.clone(), (particle.weight - max).exp());
            }
        }
        let log_normalizer = match self.normalization {
            Normalization::FinalWeights => {
                logsumexp(&weights) - (self.launched.max(1) as f64).ln()
            }
            Normalization::LastFactorMean => self
                .stats
                .values()
                .next_back()
                .map_or(0.0, |stats| stats.wbar),
        };
        debug!(
            exited = self.exited.len(),
            buffered = self.buffer.len(),
            factor_indices = self.stats.len(),
            log_normalizer,
            "async smc finished"
        );
        Ok(EmpiricalDistribution::from_histogram(&histogram)?.with_log_normalizer(log_normalizer))
    }
}

impl Handler for AsyncSmc {
    type Output = EmpiricalDistribution;

    fn id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "async-smc"
    }

    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<Self::Output>, PplError> {
        let value = request.dist.draw(&request.params, ctx.rng())?;
        Ok(Control::Resume(Resume::Deliver {
            k: request.k,
            store: request.store,
            value,
        }))
    }

    fn factor(
        &mut self,
        ctx: &mut Context,
        request: FactorRequest,
    ) -> Result<Control<Self::Output>, PplError> {
        let mut particle = self.take_active()?;
        particle.weight += request.log_weight;
        particle.continuation = request.k;
        particle.store = request.store;
        let index = particle.factor_index.map_or(0, |fi| fi + 1);
        particle.factor_index = Some(index);

        if particle.weight == f64::NEG_INFINITY {
            self.metrics.particles_dropped += 1;
            trace!(factor = index, "dropped impossible particle");
            return Ok(Control::Resume(self.launch(ctx)));
        }

        let full = self.buffer.len() >= self.buffer_size;
        match self.stats.get(&index).cloned() {
            None => {
                self.stats.insert(
                    index,
                    FactorStats {
                        arrivals: 1,
                        wbar: particle.weight,
                        total_children: 1,
                    },
                );
                particle.children = 1;
            }
            Some(stats) => {
                let (children, weight, wbar) =
                    self.offspring(ctx, &stats, particle.weight, particle.multiplicity);
                self.stats.insert(
                    index,
                    FactorStats {
                        arrivals: stats.arrivals + 1,
                        wbar,
                        total_children: stats.total_children + children,
                    },
                );
                trace!(factor = index, children, wbar, "factor arrival");
                if children == 0 {
                    self.metrics.particles_dropped += 1;
                    return Ok(Control::Resume(self.launch(ctx)));
                }
                if full {
                    particle.multiplicity *= children as f64;
                    particle.children = 1;
                } else {
                    particle.children = children;
                }
                particle.weight = weight;
            }
        }
        particle.final_weight = particle.multiplicity.ln() + particle.weight;
        if full {
            trace!(factor = index, "buffer full, particle keeps running");
            return Ok(Control::Resume(self.activate(particle)));
        }
        self.buffer.push(particle);
        Ok(Control::Resume(self.launch(ctx)))
    }

    fn exit(
        &mut self,
        ctx: &mut Context,
        store: Store,
        value: Value,
    ) -> Result<Control<Self::Output>, PplError> {
        let mut particle = self.take_active()?;
        particle.value = Some(value);
        particle.store = store;
        particle.weight = particle.final_weight;
        self.exited.push(particle);
        if self.exited.len() < self.target {
            return Ok(Control::Resume(self.launch(ctx)));
        }
        self.finish(ctx)
    }
}

/// Runs asynchronous anytime SMC on `program` and returns its marginal.
pub fn run_async_smc(
    ctx: &mut Context,
    program: &Program,
    address: &Address,
    store: Store,
    config: &AsyncSmcConfig,
) -> Result<Inference, PplError> {
    let mut engine = AsyncSmc::install(ctx, program, address, store, config)?;
    let distribution = engine.run(ctx)?;
    Ok(Inference {
        distribution,
        metrics: engine.metrics().clone(),
    })
}
