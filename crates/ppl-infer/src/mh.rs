//! Lightweight single-site Metropolis-Hastings.
//!
//! Every random choice is recorded in a [`Trace`]. A proposal picks one entry
//! uniformly, rewinds the trace to it, and re-executes the program from that
//! entry's continuation with the choice forced to redraw; downstream choices
//! whose addresses reappear reuse their previous values. The state machine
//! shared with rejuvenation lives in [`ChainState`].

use ppl_core::errors::ErrorInfo;
use ppl_core::numeric::ensure_not_nan;
use ppl_core::{
    drive, Address, Context, Control, EmpiricalDistribution, FactorRequest, Handler, HandlerId,
    Histogram, PplError, Program, Resume, SampleRequest, Store, Value,
};
use tracing::{debug, trace};

use crate::config::MhConfig;
use crate::metrics::InferenceMetrics;
use crate::outcome::Inference;
use crate::trace::{Trace, TraceEntry};

/// Metropolis-Hastings acceptance probability.
///
/// `fw = fwd_lp - ln(old_trace_len)` and `bw = bwd_lp - ln(trace_len)`; the
/// result is `min(1, exp(curr - old + bw - fw))`. An uninitialized previous
/// state (`old_score == -inf` or an empty previous trace) always accepts and a
/// current score of `-inf` always rejects.
pub fn accept_prob(
    curr_score: f64,
    old_score: f64,
    trace_len: usize,
    old_trace_len: usize,
    bwd_lp: f64,
    fwd_lp: f64,
) -> Result<f64, PplError> {
    if old_score == f64::NEG_INFINITY || old_trace_len == 0 {
        return Ok(1.0);
    }
    if curr_score == f64::NEG_INFINITY {
        return Ok(0.0);
    }
    let fw = fwd_lp - (old_trace_len as f64).ln();
    let bw = bwd_lp - (trace_len as f64).ln();
    let p = (curr_score - old_score + bw - fw).exp();
    if p.is_nan() {
        return Err(PplError::Numeric(
            ErrorInfo::new("acceptance-nan", "acceptance probability is NaN")
                .with_context("curr_score", curr_score)
                .with_context("old_score", old_score)
                .with_context("fwd_lp", fwd_lp)
                .with_context("bwd_lp", bwd_lp),
        ));
    }
    Ok(p.min(1.0))
}

/// Result of handling one random choice.
#[derive(Debug)]
pub(crate) enum SiteOutcome {
    /// Continue the execution.
    Resume(Resume),
    /// The score reached `-inf`; the execution ends without a value.
    Halt,
    /// The forced redraw matched the previous value; the chain is back in its
    /// pre-proposal state.
    Unchanged,
}

/// Trace, score and proposal bookkeeping of one MH chain.
#[derive(Debug, Clone)]
pub(crate) struct ChainState {
    pub(crate) trace: Trace,
    old_trace: Option<Trace>,
    pub(crate) score: f64,
    old_score: f64,
    fwd_lp: f64,
    bwd_lp: f64,
    regen_from: usize,
    pub(crate) value: Option<Value>,
    old_value: Option<Value>,
    /// Factors passed by the current execution.
    pub(crate) factors: usize,
}

impl ChainState {
    /// Chain that has not executed the program yet.
    pub(crate) fn fresh() -> Self {
        Self::from_parts(Trace::new(), 0.0, None)
    }

    /// Chain resuming an existing execution.
    pub(crate) fn from_parts(trace: Trace, score: f64, value: Option<Value>) -> Self {
        Self {
            trace,
            old_trace: None,
            score,
            old_score: f64::NEG_INFINITY,
            fwd_lp: 0.0,
            bwd_lp: 0.0,
            regen_from: 0,
            value,
            old_value: None,
            factors: 0,
        }
    }

    /// Records a random choice, drawing it when `forced` or when its address
    /// has no previous value, reusing the previous value otherwise.
    pub(crate) fn site(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
        forced: bool,
    ) -> Result<SiteOutcome, PplError> {
        let prev = self
            .old_trace
            .as_ref()
            .and_then(|old| old.get(&request.address))
            .map(|entry| (entry.value.clone(), entry.choice_score));
        let reused = prev.is_some() && !forced;
        let value = match &prev {
            Some((value, _)) if reused => value.clone(),
            _ => request.dist.draw(&request.params, ctx.rng())?,
        };
        if forced {
            if let Some((prev_value, _)) = &prev {
                if *prev_value == value {
                    trace!(address = %request.address, "redraw matched previous value");
                    self.roll_back();
                    return Ok(SiteOutcome::Unchanged);
                }
            }
        }

        let choice_score = ensure_not_nan(
            request.dist.score(&request.params, &value)?,
            "score-nan",
            "choice score",
        )?;
        self.trace.push(TraceEntry {
            address: request.address.clone(),
            dist: request.dist.clone(),
            params: request.params.clone(),
            score_before: self.score,
            choice_score,
            value: value.clone(),
            reused,
            factors_before: self.factors,
            k: request.k.clone(),
            store: request.store.clone(),
        })?;
        self.score += choice_score;
        match prev {
            None => self.fwd_lp += choice_score,
            Some((_, prev_score)) if forced => {
                self.fwd_lp += choice_score;
                self.bwd_lp += prev_score;
            }
            Some(_) => {}
        }

        if self.score == f64::NEG_INFINITY {
            return Ok(SiteOutcome::Halt);
        }
        Ok(SiteOutcome::Resume(Resume::Deliver {
            k: request.k,
            store: request.store,
            value,
        }))
    }

    /// Adds a factor to the score. Returns `false` once the execution is impossible.
    pub(crate) fn factor(&mut self, log_weight: f64) -> bool {
        self.score += log_weight;
        self.factors += 1;
        self.score != f64::NEG_INFINITY
    }

    /// Starts a proposal: picks a regeneration point uniformly, snapshots the
    /// chain, rewinds the trace and redraws the chosen choice.
    ///
    /// An empty trace has nothing to propose and reports [`SiteOutcome::Unchanged`].
    pub(crate) fn propose(&mut self, ctx: &mut Context) -> Result<SiteOutcome, PplError> {
        if self.trace.is_empty() {
            return Ok(SiteOutcome::Unchanged);
        }
        self.regen_from = ctx.rng().index(self.trace.len());
        let regen = self.trace.entry(self.regen_from).cloned().ok_or_else(|| {
            PplError::Trace(
                ErrorInfo::new("regen-out-of-range", "regeneration index outside the trace")
                    .with_context("index", self.regen_from)
                    .with_context("len", self.trace.len()),
            )
        })?;
        trace!(
            regen_from = self.regen_from,
            address = %regen.address,
            len = self.trace.len(),
            "propose"
        );

        self.old_trace = Some(self.trace.clone());
        self.trace.truncate(self.regen_from);
        self.old_score = self.score;
        self.old_value = self.value.clone();
        self.score = regen.score_before;
        self.factors = regen.factors_before;
        self.fwd_lp = 0.0;
        self.bwd_lp = 0.0;

        let request = SampleRequest {
            store: regen.store,
            k: regen.k,
            address: regen.address,
            dist: regen.dist,
            params: regen.params,
        };
        self.site(ctx, request, true)
    }

    /// Accepts or rejects the execution that just ended with `value`.
    ///
    /// Entries of the previous trace past the regeneration point that the new
    /// execution never reached count toward the backward probability. On
    /// rejection the trace, score and value roll back to the snapshot.
    /// `prefix_len` is the number of frozen choices preceding the chain's trace.
    pub(crate) fn decide(
        &mut self,
        ctx: &mut Context,
        prefix_len: usize,
        value: Option<Value>,
    ) -> Result<bool, PplError> {
        if let Some(old) = &self.old_trace {
            if self.score != f64::NEG_INFINITY {
                for entry in old.iter().skip(self.regen_from) {
                    if !self.trace.contains(&entry.address) {
                        self.bwd_lp += entry.choice_score;
                    }
                }
            }
        }
        let old_len = self
            .old_trace
            .as_ref()
            .map_or(0, |old| old.len() + prefix_len);
        let p = accept_prob(
            self.score,
            self.old_score,
            self.trace.len() + prefix_len,
            old_len,
            self.bwd_lp,
            self.fwd_lp,
        )?;
        let accepted = ctx.rng().uniform() < p;
        if accepted {
            self.value = value;
            self.old_trace = None;
        } else {
            self.roll_back();
        }
        Ok(accepted)
    }

    fn roll_back(&mut self) {
        if let Some(old) = self.old_trace.take() {
            self.trace = old;
        }
        self.score = self.old_score;
        self.value = self.old_value.clone();
    }
}

enum Settle {
    Finished(Option<Value>),
    Unchanged,
}

/// Metropolis-Hastings engine.
///
/// The first execution counts as an accepted step; each later step is one
/// proposal. The histogram holds exactly `iterations` samples.
#[derive(Debug)]
pub struct MetropolisHastings {
    id: HandlerId,
    program: Program,
    address: Address,
    store: Store,
    iterations: usize,
    steps: usize,
    chain: ChainState,
    histogram: Histogram,
    metrics: InferenceMetrics,
}

impl MetropolisHastings {
    /// Validates `config` and installs the engine on `ctx`.
    pub fn install(
        ctx: &mut Context,
        program: &Program,
        address: &Address,
        store: Store,
        config: &MhConfig,
    ) -> Result<Self, PplError> {
        config.validate()?;
        Ok(Self {
            id: ctx.install("mh"),
            program: program.clone(),
            address: address.clone(),
            store,
            iterations: config.iterations,
            steps: 0,
            chain: ChainState::fresh(),
            histogram: Histogram::new(),
            metrics: InferenceMetrics::new(),
        })
    }

    /// Continuation running the program from the start with an empty trace.
    pub fn start(&mut self) -> Resume {
        self.chain = ChainState::fresh();
        self.metrics.executions += 1;
        Resume::Continue {
            k: self.program.entry(&self.address),
            store: self.store.clone(),
        }
    }

    /// Trace of the current chain state.
    pub fn trace(&self) -> &Trace {
        &self.chain.trace
    }

    /// Log-joint score of the current chain state.
    pub fn score(&self) -> f64 {
        self.chain.score
    }

    /// Counters recorded so far.
    pub fn metrics(&self) -> &InferenceMetrics {
        &self.metrics
    }

    /// Consumes the engine, returning its counters.
    pub fn into_metrics(self) -> InferenceMetrics {
        self.metrics
    }

    fn settle(
        &mut self,
        ctx: &mut Context,
        mut event: Settle,
    ) -> Result<Control<EmpiricalDistribution>, PplError> {
        loop {
            match event {
                Settle::Finished(value) => {
                    if self.steps == 0 && self.chain.score == f64::NEG_INFINITY {
                        debug!(
                            executions = self.metrics.executions,
                            "initial execution impossible, restarting"
                        );
                        return Ok(Control::Resume(self.start()));
                    }
                    if self.chain.decide(ctx, 0, value)? {
                        self.metrics.accepted += 1;
                    }
                }
                Settle::Unchanged => self.metrics.accepted += 1,
            }
            self.metrics.proposals += 1;
            self.record()?;
            if self.steps == self.iterations {
                return self.finish(ctx);
            }
            event = match self.chain.propose(ctx)? {
                SiteOutcome::Resume(resume) => return Ok(Control::Resume(resume)),
                SiteOutcome::Halt => Settle::Finished(None),
                SiteOutcome::Unchanged => Settle::Unchanged,
            };
        }
    }

    fn record(&mut self) -> Result<(), PplError> {
        let value = self.chain.value.clone().ok_or_else(|| {
            PplError::Trace(
                ErrorInfo::new("missing-return-value", "chain state has no return value")
                    .with_context("algorithm", "mh")
                    .with_context("iteration", self.steps),
            )
        })?;
        self.histogram.observe(value);
        self.steps += 1;
        Ok(())
    }

    fn finish(&mut self, ctx: &mut Context) -> Result<Control<EmpiricalDistribution>, PplError> {
        let ratio = self.metrics.accepted as f64 / self.iterations as f64;
        let distribution =
            EmpiricalDistribution::from_histogram(&self.histogram)?.with_acceptance_ratio(ratio);
        debug!(
            iterations = self.iterations,
            acceptance_ratio = ratio,
            distinct = distribution.support().len(),
            "mh finished"
        );
        ctx.restore(self.id)?;
        Ok(Control::Done(distribution))
    }
}

impl Handler for MetropolisHastings {
    type Output = EmpiricalDistribution;

    fn id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "mh"
    }

    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<Self::Output>, PplError> {
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
    ) -> Result<Control<Self::Output>, PplError> {
        if self.chain.factor(request.log_weight) {
            Ok(Control::Resume(Resume::Continue {
                k: request.k,
                store: request.store,
            }))
        } else {
            self.settle(ctx, Settle::Finished(None))
        }
    }

    fn exit(
        &mut self,
        ctx: &mut Context,
        _store: Store,
        value: Value,
    ) -> Result<Control<Self::Output>, PplError> {
        self.settle(ctx, Settle::Finished(Some(value)))
    }
}

/// Runs Metropolis-Hastings on `program` and returns its marginal.
pub fn run_mh(
    ctx: &mut Context,
    program: &Program,
    address: &Address,
    store: Store,
    config: &MhConfig,
) -> Result<Inference, PplError> {
    let mut engine = MetropolisHastings::install(ctx, program, address, store, config)?;
    let start = engine.start();
    let distribution = drive(&mut engine, ctx, start)?;
    Ok(Inference {
        distribution,
        metrics: engine.into_metrics(),
    })
}
