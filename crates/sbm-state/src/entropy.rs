use serde::{Deserialize, Serialize};

/// Prior used for the degree sequence inside each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeDlKind {
    /// Uniform prior over bounded degree sequences.
    Uniform,
    /// Two-stage prior through restricted integer partitions.
    Distributed,
    /// Plain entropy of the within-block degree histogram.
    Entropy,
}

/// Selects which description-length terms an entropy or delta computation
/// includes, and how the adjacency likelihood is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyArgs {
    /// Include the data-likelihood (adjacency) term.
    #[serde(default = "default_true")]
    pub adjacency: bool,
    /// Use the dense (per-block-pair binomial) formulation.
    #[serde(default)]
    pub dense: bool,
    /// Include the parallel-edge correction.
    #[serde(default = "default_true")]
    pub multigraph: bool,
    /// Use `lgamma` throughout instead of the Stirling forms.
    #[serde(default = "default_true")]
    pub exact: bool,
    /// Include the per-vertex degree factorials (degree-corrected states).
    #[serde(default = "default_true")]
    pub deg_entropy: bool,
    /// Include the partition description length.
    #[serde(default = "default_true")]
    pub partition_dl: bool,
    /// Include the degree-sequence description length.
    #[serde(default = "default_true")]
    pub degree_dl: bool,
    /// Prior used by the degree-sequence description length.
    #[serde(default = "default_deg_dl_kind")]
    pub degree_dl_kind: DegreeDlKind,
    /// Include the number-of-edges description length.
    #[serde(default = "default_true")]
    pub edges_dl: bool,
    /// Include the edge-covariate terms.
    #[serde(default = "default_true")]
    pub recs: bool,
    /// Include the per-vertex and block-count priors.
    #[serde(default = "default_true")]
    pub bfield: bool,
    /// Scalar applied to every description-length contribution relative to
    /// the data term.
    #[serde(default = "default_beta")]
    pub beta_dl: f64,
}

fn default_true() -> bool {
    true
}

fn default_beta() -> f64 {
    1.0
}

fn default_deg_dl_kind() -> DegreeDlKind {
    DegreeDlKind::Distributed
}

impl Default for EntropyArgs {
    fn default() -> Self {
        Self {
            adjacency: true,
            dense: false,
            multigraph: true,
            exact: true,
            deg_entropy: true,
            partition_dl: true,
            degree_dl: true,
            degree_dl_kind: DegreeDlKind::Distributed,
            edges_dl: true,
            recs: true,
            bfield: true,
            beta_dl: 1.0,
        }
    }
}

impl EntropyArgs {
    /// Every term switched off; useful as a base for selective tests.
    pub fn none() -> Self {
        Self {
            adjacency: false,
            dense: false,
            multigraph: false,
            exact: false,
            deg_entropy: false,
            partition_dl: false,
            degree_dl: false,
            degree_dl_kind: DegreeDlKind::Distributed,
            edges_dl: false,
            recs: false,
            bfield: false,
            beta_dl: 1.0,
        }
    }

    /// Exact adjacency likelihood only.
    pub fn adjacency_exact() -> Self {
        Self {
            adjacency: true,
            exact: true,
            ..Self::none()
        }
    }
}
