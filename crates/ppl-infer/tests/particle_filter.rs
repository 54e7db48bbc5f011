mod common;

use ppl_core::dist::discrete;
use ppl_core::{exit, sample_with_factor, Address, Context, Program, Store, Value};
use ppl_infer::{run_particle_filter, ParticleFilterConfig};

fn config(particles: usize, strict: bool) -> ParticleFilterConfig {
    ParticleFilterConfig { particles, strict }
}

fn linear_die() -> Program {
    Program::new(|store, address| {
        let weights = Value::List(vec![Value::Real(1.0); 4]);
        sample_with_factor(
            store,
            address.child("die"),
            discrete(),
            vec![weights],
            |value| (value.as_int().unwrap_or(0) as f64 + 1.0).ln(),
            exit,
        )
    })
}

#[test]
fn unconditioned_coin_is_balanced() {
    let mut ctx = Context::from_seed(5);
    let out = run_particle_filter(
        &mut ctx,
        &common::coin(),
        &Address::root(),
        Store::new(),
        &config(100, true),
    )
    .unwrap();
    let heads = out.distribution.probability(&Value::Bool(true));
    assert!((heads - 0.5).abs() < 0.15, "P(true) = {heads}");
    assert_eq!(out.distribution.samples(), 100);
    assert_eq!(out.distribution.log_normalizer(), 0.0);
    assert!(out.metrics.barriers.is_empty());
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn strict_mode_rejects_impossible_population() {
    let mut ctx = Context::from_seed(9);
    let err = run_particle_filter(
        &mut ctx,
        &common::impossible(),
        &Address::root(),
        Store::new(),
        &config(20, true),
    )
    .unwrap_err();
    assert_eq!(err.code(), "all-weights-impossible");
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn lenient_mode_reports_degenerate_barrier() {
    let mut ctx = Context::from_seed(9);
    let out = run_particle_filter(
        &mut ctx,
        &common::impossible(),
        &Address::root(),
        Store::new(),
        &config(20, false),
    )
    .unwrap();
    assert_eq!(out.distribution.log_normalizer(), f64::NEG_INFINITY);
    assert_eq!(out.metrics.barriers.len(), 1);
    assert!(out.metrics.barriers[0].degenerate);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn noisy_observations_posterior_and_evidence() {
    let observations = [true, true, true, false];
    let mut ctx = Context::from_seed(123);
    let out = run_particle_filter(
        &mut ctx,
        &common::noisy_observations(&observations),
        &Address::root(),
        Store::new(),
        &config(1000, true),
    )
    .unwrap();

    let mean = common::mean(&out.distribution);
    assert!((mean - 2.8).abs() < 0.25, "posterior mean {mean}");

    let evidence = 4.0 * 0.5f64.ln();
    let estimate = out.distribution.log_normalizer();
    assert!((estimate - evidence).abs() < 0.3, "log Z estimate {estimate}");

    assert_eq!(out.metrics.barriers.len(), observations.len());
    for (idx, barrier) in out.metrics.barriers.iter().enumerate() {
        assert_eq!(barrier.barrier, idx);
        assert!(!barrier.degenerate);
        assert!(barrier.distinct_ancestors >= 1);
        assert!(barrier.effective_sample_size <= 1000.0 + 1e-9);
    }
}

#[test]
fn sample_with_factor_reweights_draws() {
    let mut ctx = Context::from_seed(44);
    let out = run_particle_filter(
        &mut ctx,
        &linear_die(),
        &Address::root(),
        Store::new(),
        &config(2000, true),
    )
    .unwrap();
    for face in 0..4i64 {
        let expected = (face as f64 + 1.0) / 10.0;
        let observed = out.distribution.probability(&Value::Int(face));
        assert!(
            (observed - expected).abs() < 0.05,
            "P({face}) = {observed}, expected {expected}"
        );
    }
}

#[test]
fn same_seed_same_marginal() {
    let run = || {
        let mut ctx = Context::from_seed(2);
        run_particle_filter(
            &mut ctx,
            &common::noisy_observations(&[false, true]),
            &Address::root(),
            Store::new(),
            &config(64, true),
        )
        .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn zero_particles_is_a_config_error() {
    let mut ctx = Context::from_seed(1);
    let err = run_particle_filter(
        &mut ctx,
        &common::coin(),
        &Address::root(),
        Store::new(),
        &config(0, true),
    )
    .unwrap_err();
    assert_eq!(err.code(), "zero-count");
}
