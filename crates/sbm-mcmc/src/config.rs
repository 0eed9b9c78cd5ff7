use serde::{Deserialize, Serialize};

use sbm_state::EntropyArgs;

/// Parameters governing one Metropolis–Hastings sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOpts {
    /// Proposal mixing strength: larger values propose more uniformly
    /// across occupied blocks; `inf` degenerates to uniform proposals.
    #[serde(default = "default_c")]
    pub c: f64,
    /// Probability of proposing a (possibly fresh) empty block.
    #[serde(default = "default_d")]
    pub d: f64,
    /// Inverse temperature multiplying the description-length delta.
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Number of full passes over the vertices.
    #[serde(default = "default_niter")]
    pub niter: usize,
    /// Terms included when scoring moves.
    #[serde(default)]
    pub entropy_args: EntropyArgs,
}

fn default_c() -> f64 {
    1.0
}

fn default_d() -> f64 {
    0.01
}

fn default_beta() -> f64 {
    1.0
}

fn default_niter() -> usize {
    1
}

impl Default for SweepOpts {
    fn default() -> Self {
        Self {
            c: 1.0,
            d: 0.01,
            beta: 1.0,
            niter: 1,
            entropy_args: EntropyArgs::default(),
        }
    }
}
