mod common;

use ppl_core::{Address, Context, Store, Value};
use ppl_infer::{run_rejuvenation, RejuvenationConfig};

fn config(particles: usize, steps: usize) -> RejuvenationConfig {
    RejuvenationConfig {
        particles,
        rejuvenation_steps: steps,
        restricted: false,
        collect_all_iterations: false,
    }
}

#[test]
fn recovers_noisy_observation_posterior() {
    let mut ctx = Context::from_seed(17);
    let out = run_rejuvenation(
        &mut ctx,
        &common::noisy_observations(&[true, true, true, false]),
        &Address::root(),
        Store::new(),
        &config(300, 5),
    )
    .unwrap();
    let mean = common::mean(&out.distribution);
    assert!((mean - 2.8).abs() < 0.3, "posterior mean {mean}");
    assert_eq!(out.distribution.samples(), 300);
    assert_eq!(out.metrics.barriers.len(), 4);
    assert!(out.metrics.rejuvenation_moves > 0);
    assert!(out.metrics.rejuvenation_accepted <= out.metrics.rejuvenation_moves);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn restricted_mode_still_targets_posterior() {
    let mut ctx = Context::from_seed(18);
    let out = run_rejuvenation(
        &mut ctx,
        &common::noisy_observations(&[false, true, true]),
        &Address::root(),
        Store::new(),
        &RejuvenationConfig {
            restricted: true,
            ..config(300, 3)
        },
    )
    .unwrap();
    let mean = common::mean(&out.distribution);
    let expected = 0.1 + 0.9 + 0.9;
    assert!((mean - expected).abs() < 0.3, "posterior mean {mean}");
}

#[test]
fn variable_structure_program_is_conditioned() {
    let mut ctx = Context::from_seed(4);
    let out = run_rejuvenation(
        &mut ctx,
        &common::conditioned_geometric(),
        &Address::root(),
        Store::new(),
        &config(200, 4),
    )
    .unwrap();
    assert_eq!(out.distribution.probability(&Value::Int(0)), 0.0);
    assert_eq!(out.distribution.probability(&Value::Int(1)), 0.0);
}

#[test]
fn collect_all_iterations_records_every_step() {
    let mut ctx = Context::from_seed(21);
    let out = run_rejuvenation(
        &mut ctx,
        &common::noisy_observations(&[true, false]),
        &Address::root(),
        Store::new(),
        &RejuvenationConfig {
            collect_all_iterations: true,
            ..config(40, 6)
        },
    )
    .unwrap();
    assert_eq!(out.distribution.samples(), 40 * 6);
}

#[test]
fn zero_steps_behaves_like_plain_filter() {
    let mut ctx = Context::from_seed(22);
    let out = run_rejuvenation(
        &mut ctx,
        &common::noisy_observations(&[true]),
        &Address::root(),
        Store::new(),
        &RejuvenationConfig {
            collect_all_iterations: true,
            ..config(50, 0)
        },
    )
    .unwrap();
    assert_eq!(out.distribution.samples(), 50);
    assert_eq!(out.metrics.rejuvenation_moves, 0);
}

#[test]
fn impossible_population_does_not_abort() {
    let mut ctx = Context::from_seed(23);
    let out = run_rejuvenation(
        &mut ctx,
        &common::impossible(),
        &Address::root(),
        Store::new(),
        &config(10, 3),
    )
    .unwrap();
    assert!(out.metrics.barriers[0].degenerate);
    assert_eq!(out.distribution.log_normalizer(), f64::NEG_INFINITY);
    assert_eq!(out.metrics.rejuvenation_moves, 0);
}
