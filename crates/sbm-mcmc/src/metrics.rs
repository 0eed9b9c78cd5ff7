use serde::{Deserialize, Serialize};

use crate::kernel::SweepResult;

/// One recorded observation of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Sweep index the sample was taken after.
    pub sweep: usize,
    /// Moves proposed during that sweep.
    pub proposed: usize,
    /// Moves accepted during that sweep.
    pub accepted: usize,
    /// Description-length change applied during that sweep.
    pub delta_s: f64,
    /// Description length after the sweep.
    pub entropy: f64,
    /// Number of occupied blocks after the sweep.
    pub actual_b: usize,
    /// Partition hash after the sweep.
    pub partition_hash: String,
}

/// Collects per-sweep samples and summarises acceptance behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecorder {
    samples: Vec<MetricSample>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sweep's observation.
    pub fn push(
        &mut self,
        sweep: usize,
        result: &SweepResult,
        entropy: f64,
        actual_b: usize,
        partition_hash: String,
    ) {
        self.samples.push(MetricSample {
            sweep,
            proposed: result.proposed,
            accepted: result.accepted,
            delta_s: result.delta_s,
            entropy,
            actual_b,
            partition_hash,
        });
    }

    /// All recorded samples, in sweep order.
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Overall acceptance rate across the recorded sweeps.
    pub fn acceptance_rate(&self) -> f64 {
        let proposed: usize = self.samples.iter().map(|s| s.proposed).sum();
        let accepted: usize = self.samples.iter().map(|s| s.accepted).sum();
        if proposed == 0 {
            0.0
        } else {
            accepted as f64 / proposed as f64
        }
    }

    /// Best (lowest) description length observed.
    pub fn best_entropy(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|s| s.entropy)
            .min_by(|a, b| a.total_cmp(b))
    }
}
