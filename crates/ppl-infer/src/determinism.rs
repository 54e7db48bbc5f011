use ppl_core::derive_substream_seed;

use crate::config::SeedPolicy;

/// Derives the deterministic seed used for a replicate chain.
///
/// The label, when present, is folded into the master seed first so that two
/// policies sharing a master seed but carrying different labels diverge.
pub fn chain_seed(policy: &SeedPolicy, chain_index: usize) -> u64 {
    let base = match &policy.label {
        Some(label) => label_seed(policy.master_seed, label),
        None => policy.master_seed,
    };
    derive_substream_seed(base, chain_index as u64)
}

fn label_seed(master_seed: u64, label: &str) -> u64 {
    label.bytes().fold(master_seed ^ 0xA5A5_A5A5_A5A5_A5A5, |acc, byte| {
        derive_substream_seed(acc, byte as u64)
    })
}
