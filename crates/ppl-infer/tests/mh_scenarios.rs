mod common;

use std::collections::HashSet;

use ppl_core::{drive, Address, Context, Store, Value};
use ppl_infer::{run_mh, MetropolisHastings, MhConfig};

#[test]
fn hard_constraint_retains_only_true() {
    let mut ctx = Context::from_seed(2024);
    let out = run_mh(
        &mut ctx,
        &common::hard_constraint(),
        &Address::root(),
        Store::new(),
        &MhConfig { iterations: 50 },
    )
    .unwrap();
    assert_eq!(out.distribution.samples(), 50);
    assert_eq!(out.distribution.probability(&Value::Bool(true)), 1.0);
    assert_eq!(out.distribution.probability(&Value::Bool(false)), 0.0);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn repeated_runs_with_same_seed_match() {
    let config = MhConfig { iterations: 300 };
    let program = common::conditioned_geometric();
    let mut traces = Vec::new();
    let mut dists = Vec::new();
    for _ in 0..2 {
        let mut ctx = Context::from_seed(77);
        let mut engine =
            MetropolisHastings::install(&mut ctx, &program, &Address::root(), Store::new(), &config)
                .unwrap();
        let start = engine.start();
        let dist = drive(&mut engine, &mut ctx, start).unwrap();
        let trace: Vec<_> = engine
            .trace()
            .iter()
            .map(|entry| (entry.address.clone(), entry.value.clone(), entry.reused))
            .collect();
        traces.push(trace);
        dists.push(dist);
    }
    assert_eq!(traces[0], traces[1]);
    assert_eq!(dists[0], dists[1]);
}

#[test]
fn variable_structure_posterior_is_recovered() {
    let mut ctx = Context::from_seed(31);
    let mut engine = MetropolisHastings::install(
        &mut ctx,
        &common::conditioned_geometric(),
        &Address::root(),
        Store::new(),
        &MhConfig { iterations: 6000 },
    )
    .unwrap();
    let start = engine.start();
    let dist = drive(&mut engine, &mut ctx, start).unwrap();

    assert_eq!(dist.probability(&Value::Int(0)), 0.0);
    assert_eq!(dist.probability(&Value::Int(1)), 0.0);
    let p2 = dist.probability(&Value::Int(2));
    assert!((p2 - 0.5).abs() < 0.1, "P(n = 2) = {p2}");

    let live: HashSet<_> = engine.trace().addresses().cloned().collect();
    assert_eq!(live.len(), engine.trace().len());
    let ratio = dist.acceptance_ratio().unwrap();
    assert!((0.0..=1.0).contains(&ratio));
}

#[test]
fn zero_iterations_is_a_config_error() {
    let mut ctx = Context::from_seed(1);
    let err = run_mh(
        &mut ctx,
        &common::coin(),
        &Address::root(),
        Store::new(),
        &MhConfig { iterations: 0 },
    )
    .unwrap_err();
    assert_eq!(err.code(), "zero-count");
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn metrics_count_every_step() {
    let mut ctx = Context::from_seed(8);
    let out = run_mh(
        &mut ctx,
        &common::noisy_observations(&[true, false, true]),
        &Address::root(),
        Store::new(),
        &MhConfig { iterations: 400 },
    )
    .unwrap();
    assert_eq!(out.metrics.proposals, 400);
    assert!(out.metrics.accepted <= 400);
    let expected = out.metrics.accepted as f64 / 400.0;
    assert_eq!(out.distribution.acceptance_ratio(), Some(expected));
}
