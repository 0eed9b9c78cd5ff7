use serde::{Deserialize, Serialize};

use sbm_core::errors::SbmError;
use sbm_core::{EdgeIx, Vertex};

use crate::graph::Multigraph;

/// Half-edge expansion of a multigraph, used by the overlapping model.
///
/// Each endpoint of each original edge becomes its own vertex; the two
/// halves of an edge are joined by a single expansion edge. The expansion
/// remembers, per half-edge, its owning original node and its source edge,
/// so a labelling of half-edges induces a multiset of labels per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfEdgeExpansion {
    graph: Multigraph,
    owner: Vec<Vertex>,
    source_edge: Vec<EdgeIx>,
    halves: Vec<Vec<Vertex>>,
    expansion_edge: Vec<EdgeIx>,
}

impl HalfEdgeExpansion {
    /// Builds the expansion of `original`. Edge slots of the original graph
    /// index `expansion_edge`; dead slots map to `usize::MAX`.
    pub fn build(original: &Multigraph) -> Result<Self, SbmError> {
        let mut graph = Multigraph::new(original.is_directed());
        let mut owner = Vec::new();
        let mut source_edge = Vec::new();
        let mut halves = vec![Vec::new(); original.num_vertices()];
        let mut expansion_edge = vec![usize::MAX; original.edge_slots()];

        for edge in original.edges() {
            let (u, v) = original.endpoints(edge)?;
            let hu = graph.add_vertex();
            owner.push(u);
            source_edge.push(edge);
            halves[u].push(hu);
            let hv = graph.add_vertex();
            owner.push(v);
            source_edge.push(edge);
            halves[v].push(hv);
            expansion_edge[edge] = graph.add_edge(hu, hv)?;
        }

        Ok(Self {
            graph,
            owner,
            source_edge,
            halves,
            expansion_edge,
        })
    }

    /// The half-edge graph itself.
    pub fn graph(&self) -> &Multigraph {
        &self.graph
    }

    /// Original node owning the half-edge `h`.
    pub fn owner(&self, h: Vertex) -> Vertex {
        self.owner[h]
    }

    /// Original edge that produced the half-edge `h`.
    pub fn source_edge(&self, h: Vertex) -> EdgeIx {
        self.source_edge[h]
    }

    /// All half-edges owned by original node `u`.
    pub fn halves(&self, u: Vertex) -> &[Vertex] {
        &self.halves[u]
    }

    /// Number of original nodes.
    pub fn num_nodes(&self) -> usize {
        self.halves.len()
    }

    /// Number of half-edges.
    pub fn num_half_edges(&self) -> usize {
        self.owner.len()
    }

    /// Expansion edge corresponding to an original edge slot, when alive.
    pub fn expansion_edge(&self, original_edge: EdgeIx) -> Option<EdgeIx> {
        match self.expansion_edge.get(original_edge) {
            Some(&slot) if slot != usize::MAX => Some(slot),
            _ => None,
        }
    }

    /// The half-edge on the far side of `h`'s expansion edge.
    pub fn opposite(&self, h: Vertex) -> Result<Vertex, SbmError> {
        let edge = self
            .expansion_edge(self.source_edge[h])
            .expect("half-edge has an alive expansion edge");
        let (a, b) = self.graph.endpoints(edge)?;
        Ok(if a == h { b } else { a })
    }
}
