use serde::{Deserialize, Serialize};

use sbm_core::numeric::lgamma;

/// Sampling model assumed for one edge covariate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecType {
    /// Positive weights with an exponential likelihood and conjugate gamma
    /// prior.
    RealExponential,
    /// Signed weights with a normal likelihood and conjugate
    /// normal-inverse-gamma prior.
    RealNormal,
}

/// Hyperparameters for one covariate's prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecParams {
    /// Shape of the gamma / inverse-gamma component.
    pub alpha: f64,
    /// Rate of the gamma / inverse-gamma component.
    pub beta: f64,
    /// Prior mean of the normal component.
    pub m0: f64,
    /// Prior precision scale of the normal component.
    pub k0: f64,
}

impl Default for RecParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            m0: 0.0,
            k0: 1.0,
        }
    }
}

/// Description-length contribution of one block-pair covariate class,
/// summarised by `(count, sum, sum of squares)`.
///
/// Returns `-ln P(x_1..x_N)` under the conjugate marginal; zero for empty
/// classes so that vanished block pairs drop out cleanly.
pub fn rec_term(ty: RecType, params: &RecParams, count: f64, x: f64, x2: f64) -> f64 {
    if count <= 0.0 {
        return 0.0;
    }
    match ty {
        RecType::RealExponential => {
            let alpha = params.alpha;
            let beta = params.beta;
            -(lgamma(count + alpha) - lgamma(alpha) + alpha * beta.ln()
                - (count + alpha) * (x + beta).ln())
        }
        RecType::RealNormal => {
            let RecParams { alpha, beta, m0, k0 } = *params;
            let kn = k0 + count;
            let an = alpha + count / 2.0;
            let mean = x / count;
            let ss = (x2 - x * mean).max(0.0);
            let bn = beta + 0.5 * ss + (k0 * count * (mean - m0) * (mean - m0)) / (2.0 * kn);
            -(lgamma(an) - lgamma(alpha) + alpha * beta.ln() - an * bn.ln()
                + 0.5 * (k0.ln() - kn.ln())
                - (count / 2.0) * (2.0 * std::f64::consts::PI).ln())
        }
    }
}
