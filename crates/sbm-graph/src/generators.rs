use sbm_core::errors::{ErrorInfo, SbmError};
use sbm_core::RngHandle;

use crate::graph::Multigraph;

/// Samples an Erdős–Rényi graph `G(n, p)` without self-loops.
///
/// Vertex pairs are visited in a fixed order so the outcome depends only on
/// the RNG stream.
pub fn gen_erdos_renyi(
    n: usize,
    p: f64,
    directed: bool,
    rng: &mut RngHandle,
) -> Result<Multigraph, SbmError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(SbmError::Rng(
            ErrorInfo::new("bad-probability", "edge probability must lie in [0, 1]")
                .with_context("p", p),
        ));
    }
    let mut graph = Multigraph::with_vertices(n, directed);
    for u in 0..n {
        let start = if directed { 0 } else { u + 1 };
        for v in start..n {
            if u == v {
                continue;
            }
            if rng.bernoulli(p) {
                graph.add_edge(u, v)?;
            }
        }
    }
    Ok(graph)
}

/// Samples a planted-partition graph: vertices carry the labels in `b`,
/// same-label pairs connect with probability `p_in`, cross-label pairs
/// with `p_out`. No self-loops.
pub fn gen_planted_partition(
    b: &[usize],
    p_in: f64,
    p_out: f64,
    directed: bool,
    rng: &mut RngHandle,
) -> Result<Multigraph, SbmError> {
    for &p in [p_in, p_out].iter() {
        if !(0.0..=1.0).contains(&p) {
            return Err(SbmError::Rng(
                ErrorInfo::new("bad-probability", "edge probability must lie in [0, 1]")
                    .with_context("p", p),
            ));
        }
    }
    let n = b.len();
    let mut graph = Multigraph::with_vertices(n, directed);
    for u in 0..n {
        let start = if directed { 0 } else { u + 1 };
        for v in start..n {
            if u == v {
                continue;
            }
            let p = if b[u] == b[v] { p_in } else { p_out };
            if rng.bernoulli(p) {
                graph.add_edge(u, v)?;
            }
        }
    }
    Ok(graph)
}

/// Builds a ring of `n` vertices, each connected to its successor.
pub fn gen_ring(n: usize, directed: bool) -> Result<Multigraph, SbmError> {
    let mut graph = Multigraph::with_vertices(n, directed);
    for u in 0..n {
        let v = (u + 1) % n;
        if !directed && n == 2 && u == 1 {
            break;
        }
        if n > 1 {
            graph.add_edge(u, v)?;
        }
    }
    Ok(graph)
}
