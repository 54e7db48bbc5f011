use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Population statistics recorded at one resampling barrier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BarrierSample {
    /// Zero-based barrier index (the factor index every particle reached).
    pub barrier: usize,
    /// Log-mean particle weight before resampling.
    #[serde(with = "ppl_core::numeric::log_weight")]
    pub log_mean_weight: f64,
    /// Effective sample size of the pre-resampling weights.
    pub effective_sample_size: f64,
    /// Number of distinct parents that survived resampling.
    pub distinct_ancestors: usize,
    /// Whether every particle had weight `-inf` and resampling was skipped.
    pub degenerate: bool,
}

/// Counters collected while an engine runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InferenceMetrics {
    /// Executions started from the program entry, restarts included.
    pub executions: usize,
    /// MH steps taken, the initial execution included.
    pub proposals: usize,
    /// MH steps whose outcome was kept.
    pub accepted: usize,
    /// Rejuvenation proposals across all particles.
    pub rejuvenation_moves: usize,
    /// Rejuvenation proposals that were accepted.
    pub rejuvenation_accepted: usize,
    /// Particles launched from the program start.
    pub particles_spawned: usize,
    /// Particles discarded before reaching exit.
    pub particles_dropped: usize,
    /// One entry per resampling barrier.
    pub barriers: Vec<BarrierSample>,
}

impl InferenceMetrics {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of MH steps that were kept, if any were taken.
    pub fn acceptance_rate(&self) -> Option<f64> {
        (self.proposals > 0).then(|| self.accepted as f64 / self.proposals as f64)
    }

    /// Fraction of rejuvenation proposals that were accepted.
    pub fn rejuvenation_rate(&self) -> Option<f64> {
        (self.rejuvenation_moves > 0)
            .then(|| self.rejuvenation_accepted as f64 / self.rejuvenation_moves as f64)
    }

    /// Records a barrier sample.
    pub fn push_barrier(&mut self, sample: BarrierSample) {
        self.barriers.push(sample);
    }

    /// Writes the barrier samples to a CSV file.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(
            file,
            "barrier,log_mean_weight,effective_sample_size,distinct_ancestors,degenerate"
        )?;
        for sample in &self.barriers {
            writeln!(
                file,
                "{},{:.6},{:.6},{},{}",
                sample.barrier,
                sample.log_mean_weight,
                sample.effective_sample_size,
                sample.distinct_ancestors,
                sample.degenerate
            )?;
        }
        Ok(())
    }
}
