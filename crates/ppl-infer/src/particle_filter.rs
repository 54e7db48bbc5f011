//! Synchronous particle filter.
//!
//! Factors are synchronization points: a particle that reaches one parks its
//! continuation and control passes to the next running particle. When the
//! last running particle of the round arrives, the population is resampled
//! and the round starts over from the first running particle.

use ppl_core::{
    drive, Address, Context, Control, EmpiricalDistribution, FactorRequest, Handler, HandlerId,
    PplError, Program, Resume, SampleRequest, Store, Value,
};
use tracing::debug;

use crate::config::ParticleFilterConfig;
use crate::metrics::InferenceMetrics;
use crate::outcome::Inference;
use crate::particle::{Particle, Population};

/// Synchronous particle filter engine.
#[derive(Debug)]
pub struct ParticleFilter {
    id: HandlerId,
    population: Population,
    strict: bool,
    metrics: InferenceMetrics,
}

impl ParticleFilter {
    /// Validates `config`, creates the population and installs the engine on `ctx`.
    pub fn install(
        ctx: &mut Context,
        program: &Program,
        address: &Address,
        store: Store,
        config: &ParticleFilterConfig,
    ) -> Result<Self, PplError> {
        config.validate()?;
        let entry = program.entry(address);
        let metrics = InferenceMetrics {
            executions: config.particles,
            particles_spawned: config.particles,
            ..InferenceMetrics::default()
        };
        Ok(Self {
            id: ctx.install("particle-filter"),
            population: Population::new(config.particles, &entry, &store),
            strict: config.strict,
            metrics,
        })
    }

    /// Continuation of the first particle.
    pub fn start(&mut self) -> Resume {
        self.population.active = 0;
        self.population.resume_active()
    }

    /// Current population.
    pub fn particles(&self) -> &[Particle] {
        &self.population.particles
    }

    /// Counters recorded so far.
    pub fn metrics(&self) -> &InferenceMetrics {
        &self.metrics
    }

    /// Consumes the engine, returning its counters.
    pub fn into_metrics(self) -> InferenceMetrics {
        self.metrics
    }

    fn barrier(&mut self, ctx: &mut Context) -> Result<(), PplError> {
        let index = self.metrics.barriers.len();
        let sample = self
            .population
            .resample(ctx, self.strict, "particle-filter", index)?;
        self.metrics.push_barrier(sample);
        Ok(())
    }

    fn finish(&mut self, ctx: &mut Context) -> Result<Control<EmpiricalDistribution>, PplError> {
        let log_normalizer = self.population.log_normalizer();
        let distribution = EmpiricalDistribution::from_histogram(&self.population.histogram())?
            .with_log_normalizer(log_normalizer);
        debug!(
            particles = self.population.particles.len(),
            barriers = self.metrics.barriers.len(),
            log_normalizer,
            "particle filter finished"
        );
        ctx.restore(self.id)?;
        Ok(Control::Done(distribution))
    }
}

impl Handler for ParticleFilter {
    type Output = EmpiricalDistribution;

    fn id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "particle-filter"
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
        let particle = self.population.active_mut();
        particle.weight += request.log_weight;
        particle.continuation = request.k;
        particle.store = request.store;
        particle.factor_count += 1;

        if self.population.at_barrier() {
            self.barrier(ctx)?;
            match self.population.first_running() {
                Some(first) => self.population.active = first,
                None => return self.finish(ctx),
            }
        } else if let Some(next) = self.population.next_running() {
            self.population.active = next;
        }
        Ok(Control::Resume(self.population.resume_active()))
    }

    fn exit(
        &mut self,
        ctx: &mut Context,
        store: Store,
        value: Value,
    ) -> Result<Control<Self::Output>, PplError> {
        let closes_round = self.population.at_barrier();
        let particle = self.population.active_mut();
        particle.completed = true;
        particle.value = Some(value);
        particle.store = store;

        let Some(next) = self.population.next_running() else {
            return self.finish(ctx);
        };
        if closes_round {
            // The others are parked at a factor this particle never reached.
            self.barrier(ctx)?;
            match self.population.first_running() {
                Some(first) => self.population.active = first,
                None => return self.finish(ctx),
            }
        } else {
            self.population.active = next;
        }
        Ok(Control::Resume(self.population.resume_active()))
    }
}

/// Runs the synchronous particle filter on `program` and returns its marginal.
pub fn run_particle_filter(
    ctx: &mut Context,
    program: &Program,
    address: &Address,
    store: Store,
    config: &ParticleFilterConfig,
) -> Result<Inference, PplError> {
    let mut engine = ParticleFilter::install(ctx, program, address, store, config)?;
    let start = engine.start();
    let distribution = drive(&mut engine, ctx, start)?;
    Ok(Inference {
        distribution,
        metrics: engine.into_metrics(),
    })
}
