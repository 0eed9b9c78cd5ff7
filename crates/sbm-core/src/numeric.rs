//! Cached special functions used by the description-length terms.
//!
//! The `lgamma` table is initialised once through [`init_cache`] and is
//! immutable afterwards; arguments beyond the table fall back to the exact
//! function without touching the cache, so concurrent readers never observe
//! a mutation during inference.

use std::sync::OnceLock;

use statrs::function::gamma::ln_gamma;

static LGAMMA_CACHE: OnceLock<Vec<f64>> = OnceLock::new();

/// Initialises the process-wide numeric caches up to argument `n`.
///
/// The first call wins; later calls are no-ops regardless of `n`. Arguments
/// outside the cached range are served by the exact formulas.
pub fn init_cache(n: usize) {
    LGAMMA_CACHE.get_or_init(|| {
        let mut table = Vec::with_capacity(n + 1);
        table.push(0.0);
        for x in 1..=n {
            table.push(ln_gamma(x as f64));
        }
        table
    });
    crate::partitions::init_q_cache(n);
}

/// Natural log of the gamma function.
pub fn lgamma(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    ln_gamma(x)
}

/// Cached `ln Γ(x)` for integer arguments; exact fallback past the table.
pub fn lgamma_fast(x: usize) -> f64 {
    match LGAMMA_CACHE.get().and_then(|table| table.get(x)) {
        Some(value) => *value,
        None => lgamma(x as f64),
    }
}

/// `x · ln x`, defined as 0 when `x <= 0`.
pub fn xlogx(x: f64) -> f64 {
    if x > 0.0 {
        x * x.ln()
    } else {
        0.0
    }
}

/// `ln x`, defined as 0 when `x <= 0`.
pub fn safelog(x: f64) -> f64 {
    if x > 0.0 {
        x.ln()
    } else {
        0.0
    }
}

/// `ln(1 + e^x)` without overflow for large `x`.
pub fn log1p_exp(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// `ln(e^a + e^b)` evaluated stably.
pub fn log_sum(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    a.max(b) + log1p_exp(-(a - b).abs())
}

/// Log of the binomial coefficient `C(n, k)`.
///
/// Returns `-inf` when `k > n` (no ways) and 0 when `k == 0`.
pub fn lbinom(n: f64, k: f64) -> f64 {
    if k <= 0.0 {
        return 0.0;
    }
    if k > n {
        return f64::NEG_INFINITY;
    }
    lgamma(n + 1.0) - lgamma(n - k + 1.0) - lgamma(k + 1.0)
}

/// Cached variant of [`lbinom`] for integer arguments.
pub fn lbinom_fast(n: usize, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    if k > n {
        return f64::NEG_INFINITY;
    }
    lgamma_fast(n + 1) - lgamma_fast(n - k + 1) - lgamma_fast(k + 1)
}
