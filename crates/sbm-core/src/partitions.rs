//! Restricted integer partitions: `log q(n, k)`, the log-number of
//! partitions of `n` into at most `k` parts.
//!
//! Inside the cached range the exact recurrence
//! `q(n, k) = q(n, k-1) + q(n-k, k)` is evaluated in log space; outside it
//! the saddle-point asymptotics take over. The table is initialised once via
//! [`crate::init_cache`] and never mutated afterwards.

use std::f64::consts::PI;
use std::sync::OnceLock;

use crate::numeric::{lbinom_fast, lgamma_fast, log_sum};

static Q_CACHE: OnceLock<Vec<Vec<f64>>> = OnceLock::new();

/// Fills the `log q` table for all `n <= n_max`. Called by
/// [`crate::init_cache`]; the first call wins.
pub(crate) fn init_q_cache(n_max: usize) {
    Q_CACHE.get_or_init(|| {
        let mut table: Vec<Vec<f64>> = Vec::with_capacity(n_max + 1);
        table.push(vec![0.0]);
        for n in 1..=n_max {
            let mut row = vec![f64::NEG_INFINITY; n + 1];
            row[1] = 0.0;
            for k in 2..=n {
                let rest = {
                    let m = n - k;
                    if m == 0 {
                        0.0
                    } else {
                        table[m][k.min(m)]
                    }
                };
                row[k] = log_sum(row[k - 1], rest);
            }
            table.push(row);
        }
        table
    });
}

/// `log q(n, k)`: log-number of partitions of `n` into at most `k` parts.
///
/// Defined as 0 when `n == 0` or `k == 0`; `k` saturates at `n`.
pub fn log_q(n: usize, k: usize) -> f64 {
    if n == 0 || k == 0 {
        return 0.0;
    }
    let k = k.min(n);
    if let Some(row) = Q_CACHE.get().and_then(|table| table.get(n)) {
        return row[k];
    }
    log_q_approx(n, k)
}

fn log_q_approx(n: usize, k: usize) -> f64 {
    if (k as f64) < (n as f64).powf(0.25) {
        return log_q_approx_small(n, k);
    }
    let nf = n as f64;
    let u = k as f64 / nf.sqrt();
    let v = solve_v(u);
    let lf = v.ln() - (-(-v).exp() * (1.0 + u * u / 2.0)).ln_1p() / 2.0
        - 2f64.ln() * 3.0 / 2.0
        - u.ln()
        - PI.ln();
    let g = 2.0 * v / u - u * (-(-v).exp()).ln_1p();
    lf - nf.ln() + nf.sqrt() * g
}

fn log_q_approx_small(n: usize, k: usize) -> f64 {
    lbinom_fast(n - 1, k - 1) - lgamma_fast(k + 1)
}

/// Fixed point `v = u * sqrt(Li2(1 - e^-v))` driving the saddle-point form.
fn solve_v(u: f64) -> f64 {
    let mut v = u;
    let mut delta = 1.0;
    while delta > 1e-8 {
        let next = u * dilog(-(-v).exp_m1()).sqrt();
        delta = (next - v).abs();
        v = next;
    }
    v
}

/// Dilogarithm `Li2(x)` for `x` in `[0, 1]`.
fn dilog(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x > 0.5 {
        if x >= 1.0 {
            return PI * PI / 6.0;
        }
        return PI * PI / 6.0 - x.ln() * (1.0 - x).ln() - dilog(1.0 - x);
    }
    let mut sum = 0.0;
    let mut term = 1.0;
    for j in 1..200 {
        term *= x;
        let inc = term / (j * j) as f64;
        sum += inc;
        if inc < 1e-16 * sum {
            break;
        }
    }
    sum
}
