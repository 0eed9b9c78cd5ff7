use sha2::{Digest, Sha256};

use sbm_core::errors::SbmError;

use crate::graph::Multigraph;

/// Canonical SHA-256 hash of a graph's structure.
///
/// The hash covers the directedness flag, the vertex count and the sorted
/// multiset of edges (undirected endpoints canonicalised low-high), so it is
/// independent of slot layout and insertion order.
pub fn canonical_hash(graph: &Multigraph) -> Result<String, SbmError> {
    let mut edges: Vec<(usize, usize)> = Vec::with_capacity(graph.num_edges());
    for edge in graph.edges() {
        let (u, v) = graph.endpoints(edge)?;
        if graph.is_directed() || u <= v {
            edges.push((u, v));
        } else {
            edges.push((v, u));
        }
    }
    edges.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update([graph.is_directed() as u8]);
    hasher.update((graph.num_vertices() as u64).to_le_bytes());
    hasher.update((edges.len() as u64).to_le_bytes());
    for (u, v) in edges {
        hasher.update((u as u64).to_le_bytes());
        hasher.update((v as u64).to_le_bytes());
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}
