use ppl_core::numeric::{effective_sample_size, log_mean_exp, logsumexp};
use proptest::prelude::*;

proptest! {
    #[test]
    fn log_mean_lies_between_min_and_max(weights in prop::collection::vec(-50.0f64..50.0, 1..40)) {
        let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = log_mean_exp(&weights);
        prop_assert!(mean <= max + 1e-9);
        prop_assert!(mean >= min - 1e-9);
        prop_assert!(logsumexp(&weights) >= max - 1e-9);
    }

    #[test]
    fn effective_sample_size_is_bounded(weights in prop::collection::vec(-20.0f64..20.0, 1..40)) {
        let ess = effective_sample_size(&weights);
        prop_assert!(ess >= 1.0 - 1e-9);
        prop_assert!(ess <= weights.len() as f64 + 1e-9);
    }

    #[test]
    fn impossible_entries_do_not_shift_the_sum(
        weights in prop::collection::vec(-20.0f64..20.0, 1..20),
        extra in 1usize..5,
    ) {
        let mut padded = weights.clone();
        padded.extend(std::iter::repeat(f64::NEG_INFINITY).take(extra));
        prop_assert!((logsumexp(&padded) - logsumexp(&weights)).abs() < 1e-12);
    }
}

#[test]
fn all_impossible_weights_collapse() {
    let weights = [f64::NEG_INFINITY; 4];
    assert_eq!(logsumexp(&weights), f64::NEG_INFINITY);
    assert_eq!(log_mean_exp(&weights), f64::NEG_INFINITY);
    assert_eq!(effective_sample_size(&weights), 0.0);
    assert_eq!(log_mean_exp(&[]), f64::NEG_INFINITY);
}
