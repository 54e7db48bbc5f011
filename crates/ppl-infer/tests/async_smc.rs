mod common;

use ppl_core::{
    drive, Address, Context, Control, EmpiricalDistribution, FactorRequest, Handler, HandlerId,
    PplError, SampleRequest, Store, Value,
};
use ppl_infer::{run_async_smc, AsyncSmc, AsyncSmcConfig, Normalization};

fn config(particles: usize, buffer_size: usize) -> AsyncSmcConfig {
    AsyncSmcConfig {
        particles,
        buffer_size,
        normalization: Normalization::FinalWeights,
    }
}

/// Forwards every effect to the engine and records the largest buffer seen.
struct BufferWatch<'a> {
    engine: &'a mut AsyncSmc,
    peak: usize,
}

impl BufferWatch<'_> {
    fn observe<T>(&mut self, control: T) -> T {
        self.peak = self.peak.max(self.engine.buffered());
        control
    }
}

impl Handler for BufferWatch<'_> {
    type Output = EmpiricalDistribution;

    fn id(&self) -> HandlerId {
        self.engine.id()
    }

    fn name(&self) -> &'static str {
        "buffer-watch"
    }

    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<Self::Output>, PplError> {
        let control = self.engine.sample(ctx, request)?;
        Ok(self.observe(control))
    }

    fn factor(
        &mut self,
        ctx: &mut Context,
        request: FactorRequest,
    ) -> Result<Control<Self::Output>, PplError> {
        let control = self.engine.factor(ctx, request)?;
        Ok(self.observe(control))
    }

    fn exit(
        &mut self,
        ctx: &mut Context,
        store: Store,
        value: Value,
    ) -> Result<Control<Self::Output>, PplError> {
        let control = self.engine.exit(ctx, store, value)?;
        Ok(self.observe(control))
    }
}

fn final_weights_estimate(observations: &[bool], seed: u64) -> f64 {
    let mut ctx = Context::from_seed(seed);
    let mut engine = AsyncSmc::install(
        &mut ctx,
        &common::noisy_observations(observations),
        &Address::root(),
        Store::new(),
        &config(3000, 20),
    )
    .unwrap();
    engine.run(&mut ctx).unwrap();
    engine.resume(&mut ctx, 3000).unwrap().log_normalizer()
}

#[test]
fn final_weights_estimate_known_evidence_across_resume() {
    for (observations, seed) in [(&[true][..], 7), (&[true, false, true][..], 8)] {
        let evidence = observations.len() as f64 * 0.5f64.ln();
        let estimate = final_weights_estimate(observations, seed);
        assert!(
            (estimate - evidence).abs() < 0.15,
            "log Z estimate {estimate}, expected {evidence}"
        );
    }
}

#[test]
fn launches_count_fresh_starts_only() {
    let mut ctx = Context::from_seed(13);
    let mut engine = AsyncSmc::install(
        &mut ctx,
        &common::coin(),
        &Address::root(),
        Store::new(),
        &config(25, 10),
    )
    .unwrap();
    engine.run(&mut ctx).unwrap();
    assert_eq!(engine.launched(), 25);
    engine.resume(&mut ctx, 5).unwrap();
    assert_eq!(engine.launched(), 30);
}

#[test]
fn buffer_never_exceeds_its_size() {
    let mut ctx = Context::from_seed(41);
    let observations = [true, false, true, true, false, true, true, false, true, true];
    let mut engine = AsyncSmc::install(
        &mut ctx,
        &common::noisy_observations(&observations),
        &Address::root(),
        Store::new(),
        &config(300, 4),
    )
    .unwrap();
    let mut watch = BufferWatch {
        engine: &mut engine,
        peak: 0,
    };
    let start = watch.engine.start(&mut ctx);
    let out = drive(&mut watch, &mut ctx, start).unwrap();
    let peak = watch.peak;
    assert!(peak <= 4, "buffer grew to {peak}");
    assert!(peak > 0);
    assert_eq!(out.samples(), 300);
    assert_eq!(engine.exited(), 300);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn resume_extends_the_particle_budget() {
    let mut ctx = Context::from_seed(10);
    let mut engine = AsyncSmc::install(
        &mut ctx,
        &common::noisy_observations(&[true, false]),
        &Address::root(),
        Store::new(),
        &config(10, 5),
    )
    .unwrap();
    let first = engine.run(&mut ctx).unwrap();
    assert_eq!(engine.exited(), 10);
    assert_eq!(first.samples(), 10);
    assert_eq!(ctx.depth(), 0);

    let second = engine.resume(&mut ctx, 5).unwrap();
    assert_eq!(engine.target(), 15);
    assert_eq!(engine.exited(), 15);
    assert_eq!(second.samples(), 15);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn resume_with_zero_particles_is_rejected() {
    let mut ctx = Context::from_seed(10);
    let mut engine = AsyncSmc::install(
        &mut ctx,
        &common::coin(),
        &Address::root(),
        Store::new(),
        &config(4, 5),
    )
    .unwrap();
    engine.run(&mut ctx).unwrap();
    let err = engine.resume(&mut ctx, 0).unwrap_err();
    assert_eq!(err.code(), "zero-count");
    assert_eq!(engine.exited(), 4);
}

#[test]
fn unconditioned_program_has_zero_log_normalizer() {
    let mut ctx = Context::from_seed(3);
    let out = run_async_smc(
        &mut ctx,
        &common::coin(),
        &Address::root(),
        Store::new(),
        &config(200, 20),
    )
    .unwrap();
    assert_eq!(out.distribution.log_normalizer(), 0.0);
    let heads = out.distribution.probability(&Value::Bool(true));
    assert!((heads - 0.5).abs() < 0.12, "P(true) = {heads}");
}

#[test]
fn factor_statistics_follow_arrivals() {
    let mut ctx = Context::from_seed(12);
    let mut engine = AsyncSmc::install(
        &mut ctx,
        &common::noisy_observations(&[true, true]),
        &Address::root(),
        Store::new(),
        &config(50, 10),
    )
    .unwrap();
    engine.run(&mut ctx).unwrap();
    let first = engine.factor_stats(0).unwrap();
    let second = engine.factor_stats(1).unwrap();
    assert!(first.arrivals >= 1);
    assert!(second.arrivals >= 1);
    assert!(first.total_children >= 1);
    assert!(first.wbar.is_finite());
    assert!(engine.factor_stats(2).is_none());
}

#[test]
fn impossible_particles_are_dropped() {
    let mut ctx = Context::from_seed(6);
    let out = run_async_smc(
        &mut ctx,
        &common::hard_constraint(),
        &Address::root(),
        Store::new(),
        &config(30, 10),
    )
    .unwrap();
    assert_eq!(out.distribution.probability(&Value::Bool(true)), 1.0);
    assert!(out.metrics.particles_dropped > 0);
}

#[test]
fn both_normalizations_are_finite_for_soft_factors() {
    let program = common::noisy_observations(&[true, false, true]);
    for normalization in [Normalization::FinalWeights, Normalization::LastFactorMean] {
        let mut ctx = Context::from_seed(99);
        let out = run_async_smc(
            &mut ctx,
            &program,
            &Address::root(),
            Store::new(),
            &AsyncSmcConfig {
                normalization,
                ..config(300, 20)
            },
        )
        .unwrap();
        let estimate = out.distribution.log_normalizer();
        assert!(estimate.is_finite(), "{normalization:?}: {estimate}");
        assert_eq!(out.distribution.samples(), 300);
    }
}

#[test]
fn same_seed_same_marginal() {
    let run = || {
        let mut ctx = Context::from_seed(31);
        run_async_smc(
            &mut ctx,
            &common::noisy_observations(&[false, true]),
            &Address::root(),
            Store::new(),
            &config(40, 8),
        )
        .unwrap()
    };
    assert_eq!(run(), run());
}
