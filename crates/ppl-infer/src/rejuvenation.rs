//! Particle filter with Metropolis-Hastings rejuvenation.
//!
//! Particles keep a full trace of their random choices. After every
//! resampling barrier each running particle is handed to an embedded MH
//! chain that re-executes it up to its own frontier factor,
//! and once every particle has exited a final unrestricted pass runs over the
//! whole trace.

use ppl_core::numeric::ensure_not_nan;
use ppl_core::{
    drive, Address, Context, Continuation, Control, EmpiricalDistribution, FactorRequest, Handler,
    HandlerId, Histogram, PplError, Program, Resume, SampleRequest, Store, Value,
};
use tracing::{debug, trace};

use crate::config::RejuvenationConfig;
use crate::metrics::InferenceMetrics;
use crate::mh::{ChainState, SiteOutcome};
use crate::outcome::Inference;
use crate::particle::{Particle, Population};
use crate::trace::TraceEntry;

/// Particle filter that rejuvenates its population after each barrier.
#[derive(Debug)]
pub struct RejuvenatingFilter {
    id: HandlerId,
    population: Population,
    steps: usize,
    restricted: bool,
    collect_all_iterations: bool,
    metrics: InferenceMetrics,
}

impl RejuvenatingFilter {
    /// Validates `config`, creates the population and installs the engine on `ctx`.
    pub fn install(
        ctx: &mut Context,
        program: &Program,
        address: &Address,
        store: Store,
        config: &RejuvenationConfig,
    ) -> Result<Self, PplError> {
        config.validate()?;
        let entry = program.entry(address);
        let metrics = InferenceMetrics {
            executions: config.particles,
            particles_spawned: config.particles,
            ..InferenceMetrics::default()
        };
        Ok(Self {
            id: ctx.install("rejuvenation"),
            population: Population::new(config.particles, &entry, &store),
            steps: config.rejuvenation_steps,
            restricted: config.restricted,
            collect_all_iterations: config.collect_all_iterations,
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

    /// Consumes the engine, returning its counters.
    pub fn into_metrics(self) -> InferenceMetrics {
        self.metrics
    }

    /// Resamples, then rejuvenates every running particle up to its frontier.
    fn barrier(&mut self, ctx: &mut Context) -> Result<(), PplError> {
        let index = self.metrics.barriers.len();
        let sample = self.population.resample(ctx, false, "rejuvenation", index)?;
        self.metrics.push_barrier(sample);

        for idx in 0..self.population.particles.len() {
            if self.population.particles[idx].completed {
                continue;
            }
            ctx.ensure_active(self.id)?;
            let particle = self.population.particles[idx].clone();
            let limit = Some(particle.factor_count);
            let mut updated = self.rejuvenate(ctx, particle, limit, None)?;
            if self.restricted {
                updated.regen_floor = updated.trace.len();
            }
            self.population.particles[idx] = updated;
        }
        Ok(())
    }

    fn rejuvenate(
        &mut self,
        ctx: &mut Context,
        particle: Particle,
        limit: Option<usize>,
        histogram: Option<&mut Histogram>,
    ) -> Result<Particle, PplError> {
        let outcome = rejuvenate(ctx, particle, limit, self.steps, histogram)?;
        self.metrics.rejuvenation_moves += outcome.proposals;
        self.metrics.rejuvenation_accepted += outcome.accepted;
        Ok(outcome.particle)
    }

    fn finish(&mut self, ctx: &mut Context) -> Result<Control<EmpiricalDistribution>, PplError> {
        let collect = self.collect_all_iterations && self.steps > 0;
        let mut all_steps = Histogram::new();
        for idx in 0..self.population.particles.len() {
            ctx.ensure_active(self.id)?;
            let mut particle = self.population.particles[idx].clone();
            particle.regen_floor = 0;
            let sink = if collect { Some(&mut all_steps) } else { None };
            self.population.particles[idx] = self.rejuvenate(ctx, particle, None, sink)?;
        }

        let histogram = if collect {
            all_steps
        } else {
            self.population.histogram()
        };
        let log_normalizer = self.population.log_normalizer();
        let distribution =
            EmpiricalDistribution::from_histogram(&histogram)?.with_log_normalizer(log_normalizer);
        debug!(
            particles = self.population.particles.len(),
            barriers = self.metrics.barriers.len(),
            rejuvenation_rate = self.metrics.rejuvenation_rate(),
            log_normalizer,
            "rejuvenating filter finished"
        );
        ctx.restore(self.id)?;
        Ok(Control::Done(distribution))
    }

    fn next_round(
        &mut self,
        ctx: &mut Context,
    ) -> Result<Control<EmpiricalDistribution>, PplError> {
        self.barrier(ctx)?;
        match self.population.first_running() {
            Some(first) => {
                self.population.active = first;
                Ok(Control::Resume(self.population.resume_active()))
            }
            None => self.finish(ctx),
        }
    }
}

impl Handler for RejuvenatingFilter {
    type Output = EmpiricalDistribution;

    fn id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "rejuvenation"
    }

    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<Self::Output>, PplError> {
        let value = request.dist.draw(&request.params, ctx.rng())?;
        let choice_score = ensure_not_nan(
            request.dist.score(&request.params, &value)?,
            "score-nan",
            "choice score",
        )?;
        let particle = self.population.active_mut();
        particle.trace.push(TraceEntry {
            address: request.address,
            dist: request.dist,
            params: request.params,
            score_before: particle.score,
            choice_score,
            value: value.clone(),
            reused: false,
            factors_before: particle.factor_count,
            k: request.k.clone(),
            store: request.store.clone(),
        })?;
        particle.score += choice_score;
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
        particle.score += request.log_weight;
        particle.continuation = request.k;
        particle.store = request.store;
        particle.factor_count += 1;

        if self.population.at_barrier() {
            return self.next_round(ctx);
        }
        if let Some(next) = self.population.next_running() {
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
            return self.next_round(ctx);
        }
        self.population.active = next;
        Ok(Control::Resume(self.population.resume_active()))
    }
}

/// Outcome of rejuvenating one particle.
#[derive(Debug, Clone)]
pub struct Rejuvenated {
    /// The particle after its final MH step.
    pub particle: Particle,
    /// Proposals made.
    pub proposals: usize,
    /// Proposals accepted, unchanged redraws included.
    pub accepted: usize,
}

/// Runs `steps` MH steps on `particle`, regenerating only choices at or past
/// its `regen_floor`.
///
/// With a `limit`, every re-execution stops at the factor that brings its
/// factor count to `limit` and the particle adopts that continuation and store
/// when the step is accepted; a re-execution that exits before reaching it is
/// rejected. Without a limit re-executions run to program exit. Every step's
/// value is recorded into `histogram` when one is supplied.
///
/// Particles with score `-inf`, with nothing to regenerate, or with zero
/// steps come back untouched.
pub fn rejuvenate(
    ctx: &mut Context,
    particle: Particle,
    limit: Option<usize>,
    steps: usize,
    mut histogram: Option<&mut Histogram>,
) -> Result<Rejuvenated, PplError> {
    let prefix_len = particle.regen_floor.min(particle.trace.len());
    let segment = particle.trace.suffix(prefix_len);
    if particle.score == f64::NEG_INFINITY || segment.is_empty() || steps == 0 {
        if let (Some(histogram), Some(value)) = (histogram.as_deref_mut(), &particle.value) {
            for _ in 0..steps {
                histogram.observe(value.clone());
            }
        }
        return Ok(Rejuvenated {
            particle,
            proposals: 0,
            accepted: 0,
        });
    }

    let mut engine = Rejuvenator {
        id: ctx.install("rejuvenator"),
        chain: ChainState::from_parts(segment, particle.score, particle.value.clone()),
        prefix_len,
        limit,
        remaining: steps,
        frontier: Frontier {
            continuation: particle.continuation.clone(),
            store: particle.store.clone(),
        },
        pending: None,
        histogram,
        proposals: 0,
        accepted: 0,
    };
    match engine.step(ctx, None) {
        Ok(Some(start)) => drive(&mut engine, ctx, start)?,
        Ok(None) => ctx.restore(engine.id)?,
        Err(err) => {
            ctx.unwind(engine.id);
            return Err(err);
        }
    }

    trace!(
        proposals = engine.proposals,
        accepted = engine.accepted,
        score = engine.chain.score,
        "particle rejuvenated"
    );
    let trace = particle.trace.spliced(prefix_len, &engine.chain.trace)?;
    Ok(Rejuvenated {
        particle: Particle {
            continuation: engine.frontier.continuation,
            store: engine.frontier.store,
            weight: particle.weight,
            score: engine.chain.score,
            trace,
            regen_floor: particle.regen_floor,
            factor_count: particle.factor_count,
            completed: particle.completed,
            value: engine.chain.value,
        },
        proposals: engine.proposals,
        accepted: engine.accepted,
    })
}

#[derive(Debug, Clone)]
struct Frontier {
    continuation: Continuation,
    store: Store,
}

enum Settle {
    Finished(Option<Value>),
    Unchanged,
}

/// Single-particle MH chain installed on top of the filter.
struct Rejuvenator<'h> {
    id: HandlerId,
    chain: ChainState,
    prefix_len: usize,
    limit: Option<usize>,
    remaining: usize,
    frontier: Frontier,
    pending: Option<Frontier>,
    histogram: Option<&'h mut Histogram>,
    proposals: usize,
    accepted: usize,
}

impl Rejuvenator<'_> {
    /// Settles the execution that just ended (if any) and starts the next
    /// proposal. Returns `None` once every step has been taken.
    fn step(
        &mut self,
        ctx: &mut Context,
        mut event: Option<Settle>,
    ) -> Result<Option<Resume>, PplError> {
        loop {
            if let Some(settle) = event.take() {
                match settle {
                    Settle::Finished(value) => {
                        let pending = self.pending.take();
                        if self.chain.decide(ctx, self.prefix_len, value)? {
                            self.accepted += 1;
                            if let Some(frontier) = pending {
                                self.frontier = frontier;
                            }
                        }
                    }
                    Settle::Unchanged => self.accepted += 1,
                }
                if let (Some(histogram), Some(value)) =
                    (self.histogram.as_deref_mut(), &self.chain.value)
                {
                    histogram.observe(value.clone());
                }
                self.remaining -= 1;
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.proposals += 1;
            event = Some(match self.chain.propose(ctx)? {
                SiteOutcome::Resume(resume) => return Ok(Some(resume)),
                SiteOutcome::Halt => Settle::Finished(None),
                SiteOutcome::Unchanged => Settle::Unchanged,
            });
        }
    }

    fn settle(&mut self, ctx: &mut Context, event: Settle) -> Result<Control<()>, PplError> {
        match self.step(ctx, Some(event))? {
            Some(resume) => Ok(Control::Resume(resume)),
            None => {
                ctx.restore(self.id)?;
                Ok(Control::Done(()))
            }
        }
    }
}

impl Handler for Rejuvenator<'_> {
    type Output = ();

    fn id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "rejuvenator"
    }

    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<()>, PplError> {
        match self.chain.site(ctx, request, false)? {
            SiteOutcome::Resume(resume) => Ok(Control::Resume(resume)),
            SiteOutcome::Halt => self.settle(ctx, Settle::Finished(None)),
            SiteOutcome::Unchanged => self.settle(ctx, Settle::Unchanged),
        }
    }

    fn factor(
        &mut self,
        ctx: &mut Context,
        request: FactorRequest,
    ) -> Result<Control<()>, PplError> {
        if !self.chain.factor(request.log_weight) {
            return self.settle(ctx, Settle::Finished(None));
        }
        if self.limit == Some(self.chain.factors) {
            self.pending = Some(Frontier {
                continuation: request.k,
                store: request.store,
            });
            let value = self.chain.value.clone();
            return self.settle(ctx, Settle::Finished(value));
        }
        Ok(Control::Resume(Resume::Continue {
            k: request.k,
            store: request.store,
        }))
    }

    fn exit(
        &mut self,
        ctx: &mut Context,
        store: Store,
        value: Value,
    ) -> Result<Control<()>, PplError> {
        if self.limit.is_some() {
            // Exited before the frontier the particle is parked at.
            self.chain.score = f64::NEG_INFINITY;
            return self.settle(ctx, Settle::Finished(None));
        }
        self.pending = Some(Frontier {
            continuation: self.frontier.continuation.clone(),
            store,
        });
        self.settle(ctx, Settle::Finished(Some(value)))
    }
}

/// Runs the particle filter with rejuvenation on `program` and returns its marginal.
pub fn run_rejuvenation(
    ctx: &mut Context,
    program: &Program,
    address: &Address,
    store: Store,
    config: &RejuvenationConfig,
) -> Result<Inference, PplError> {
    let mut engine = RejuvenatingFilter::install(ctx, program, address, store, config)?;
    let start = engine.start();
    let distribution = drive(&mut engine, ctx, start)?;
    Ok(Inference {
        distribution,
        metrics: engine.into_metrics(),
    })
}
