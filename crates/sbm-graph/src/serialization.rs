use serde::{Deserialize, Serialize};

use sbm_core::errors::{ErrorInfo, SbmError};

use crate::graph::Multigraph;

const PAYLOAD_VERSION: u32 = 1;

/// Canonical serialization payload: alive edges only, in slot order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphPayload {
    version: u32,
    directed: bool,
    num_vertices: usize,
    edges: Vec<(usize, usize)>,
}

impl GraphPayload {
    fn capture(graph: &Multigraph) -> Self {
        let mut edges = Vec::with_capacity(graph.num_edges());
        for edge in graph.edges() {
            let (u, v) = graph.endpoints(edge).expect("alive edge");
            edges.push((u, v));
        }
        Self {
            version: PAYLOAD_VERSION,
            directed: graph.is_directed(),
            num_vertices: graph.num_vertices(),
            edges,
        }
    }

    fn restore(self) -> Result<Multigraph, SbmError> {
        if self.version != PAYLOAD_VERSION {
            return Err(SbmError::Serde(
                ErrorInfo::new("bad-version", "unsupported graph payload version")
                    .with_context("found", self.version)
                    .with_context("expected", PAYLOAD_VERSION),
            ));
        }
        let mut graph = Multigraph::with_vertices(self.num_vertices, self.directed);
        for (u, v) in self.edges {
            graph.add_edge(u, v)?;
        }
        Ok(graph)
    }
}

/// Serializes a graph to a compact binary payload.
pub fn graph_to_bytes(graph: &Multigraph) -> Result<Vec<u8>, SbmError> {
    bincode::serialize(&GraphPayload::capture(graph)).map_err(|err| {
        SbmError::Serde(ErrorInfo::new("encode-bytes", err.to_string()))
    })
}

/// Restores a graph from [`graph_to_bytes`] output.
///
/// The restored graph has a compacted slot layout; edge indices from the
/// original are not preserved.
pub fn graph_from_bytes(bytes: &[u8]) -> Result<Multigraph, SbmError> {
    let payload: GraphPayload = bincode::deserialize(bytes).map_err(|err| {
        SbmError::Serde(ErrorInfo::new("decode-bytes", err.to_string()))
    })?;
    payload.restore()
}

/// Serializes a graph to a JSON string.
pub fn graph_to_json(graph: &Multigraph) -> Result<String, SbmError> {
    serde_json::to_string(&GraphPayload::capture(graph)).map_err(|err| {
        SbmError::Serde(ErrorInfo::new("encode-json", err.to_string()))
    })
}

/// Restores a graph from [`graph_to_json`] output.
pub fn graph_from_json(text: &str) -> Result<Multigraph, SbmError> {
    let payload: GraphPayload = serde_json::from_str(text).map_err(|err| {
        SbmError::Serde(ErrorInfo::new("decode-json", err.to_string()))
    })?;
    payload.restore()
}
