use serde::{Deserialize, Serialize};

use sbm_core::errors::{ErrorInfo, SbmError};
use sbm_core::{EdgeIx, Vertex};

/// One adjacency slot: the neighbour reached and the edge used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjEntry {
    /// Vertex on the far side of the edge (equal to the owner for loops).
    pub neighbour: Vertex,
    /// Slot index of the connecting edge.
    pub edge: EdgeIx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct EdgeRecord {
    source: Vertex,
    target: Vertex,
    alive: bool,
}

/// Directed or undirected multigraph with stable edge slots.
///
/// Edge slots are recycled through a free list so that parallel property
/// vectors (weights, covariates) can stay index-aligned across removals.
/// Self-loops appear once in the adjacency of their vertex; callers that
/// need degree-mass semantics count them twice on undirected graphs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Multigraph {
    directed: bool,
    out: Vec<Vec<AdjEntry>>,
    inc: Vec<Vec<AdjEntry>>,
    edges: Vec<EdgeRecord>,
    free_slots: Vec<EdgeIx>,
    alive_edges: usize,
}

impl Multigraph {
    /// Creates an empty graph.
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            out: Vec::new(),
            inc: Vec::new(),
            edges: Vec::new(),
            free_slots: Vec::new(),
            alive_edges: 0,
        }
    }

    /// Creates an empty graph with `n` vertices.
    pub fn with_vertices(n: usize, directed: bool) -> Self {
        let mut graph = Self::new(directed);
        graph.add_vertices(n);
        graph
    }

    /// Whether edges carry an orientation.
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.out.len()
    }

    /// Number of alive edges.
    pub fn num_edges(&self) -> usize {
        self.alive_edges
    }

    /// Total number of edge slots, alive or dead; parallel property
    /// vectors must have this length.
    pub fn edge_slots(&self) -> usize {
        self.edges.len()
    }

    /// Appends a fresh vertex and returns its index.
    pub fn add_vertex(&mut self) -> Vertex {
        self.out.push(Vec::new());
        if self.directed {
            self.inc.push(Vec::new());
        }
        self.out.len() - 1
    }

    /// Appends `n` fresh vertices.
    pub fn add_vertices(&mut self, n: usize) {
        for _ in 0..n {
            self.add_vertex();
        }
    }

    /// Inserts an edge between `u` and `v`, reusing a dead slot when one is
    /// available, and returns the slot index.
    pub fn add_edge(&mut self, u: Vertex, v: Vertex) -> Result<EdgeIx, SbmError> {
        self.ensure_vertex(u)?;
        self.ensure_vertex(v)?;
        let record = EdgeRecord {
            source: u,
            target: v,
            alive: true,
        };
        let edge = match self.free_slots.pop() {
            Some(slot) => {
                self.edges[slot] = record;
                slot
            }
            None => {
                self.edges.push(record);
                self.edges.len() - 1
            }
        };
        self.out[u].push(AdjEntry { neighbour: v, edge });
        if self.directed {
            self.inc[v].push(AdjEntry { neighbour: u, edge });
        } else if u != v {
            self.out[v].push(AdjEntry { neighbour: u, edge });
        }
        self.alive_edges += 1;
        Ok(edge)
    }

    /// Removes an edge by slot; the slot becomes reusable.
    pub fn remove_edge(&mut self, edge: EdgeIx) -> Result<(), SbmError> {
        let record = *self.edge_record(edge)?;
        self.edges[edge].alive = false;
        detach(&mut self.out[record.source], edge);
        if self.directed {
            detach(&mut self.inc[record.target], edge);
        } else if record.source != record.target {
            detach(&mut self.out[record.target], edge);
        }
        self.free_slots.push(edge);
        self.alive_edges -= 1;
        Ok(())
    }

    /// Returns the `(source, target)` endpoints of an alive edge.
    pub fn endpoints(&self, edge: EdgeIx) -> Result<(Vertex, Vertex), SbmError> {
        let record = self.edge_record(edge)?;
        Ok((record.source, record.target))
    }

    /// Whether the edge slot currently holds an alive edge.
    pub fn is_alive(&self, edge: EdgeIx) -> bool {
        self.edges.get(edge).map(|r| r.alive).unwrap_or(false)
    }

    /// Iterates all vertices.
    pub fn vertices(&self) -> impl Iterator<Item = Vertex> {
        0..self.out.len()
    }

    /// Iterates the slots of all alive edges.
    pub fn edges(&self) -> impl Iterator<Item = EdgeIx> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, record)| record.alive)
            .map(|(slot, _)| slot)
    }

    /// Outgoing adjacency of `v` (all incident edges on undirected graphs;
    /// loops appear once).
    pub fn out_neighbours(&self, v: Vertex) -> &[AdjEntry] {
        &self.out[v]
    }

    /// Incoming adjacency of `v`; aliases the outgoing adjacency on
    /// undirected graphs.
    pub fn in_neighbours(&self, v: Vertex) -> &[AdjEntry] {
        if self.directed {
            &self.inc[v]
        } else {
            &self.out[v]
        }
    }

    /// Out-degree of `v` counted in edges.
    pub fn out_degree(&self, v: Vertex) -> usize {
        self.out[v].len()
    }

    /// In-degree of `v` counted in edges.
    pub fn in_degree(&self, v: Vertex) -> usize {
        if self.directed {
            self.inc[v].len()
        } else {
            self.out[v].len()
        }
    }

    fn ensure_vertex(&self, v: Vertex) -> Result<(), SbmError> {
        if v >= self.out.len() {
            return Err(graph_error("unknown-vertex", "vertex does not exist")
                .with_context("vertex", v)
                .with_context("num_vertices", self.out.len()));
        }
        Ok(())
    }

    fn edge_record(&self, edge: EdgeIx) -> Result<&EdgeRecord, SbmError> {
        self.edges
            .get(edge)
            .filter(|record| record.alive)
            .ok_or_else(|| graph_error("unknown-edge", "edge does not exist").with_context("edge", edge))
    }
}

fn detach(adjacency: &mut Vec<AdjEntry>, edge: EdgeIx) {
    if let Some(pos) = adjacency.iter().position(|entry| entry.edge == edge) {
        adjacency.swap_remove(pos);
    }
}

fn graph_error(code: &str, message: &str) -> SbmError {
    SbmError::Graph(ErrorInfo::new(code, message))
}

trait ContextExt {
    fn with_context(self, key: &str, value: impl ToString) -> SbmError;
}

impl ContextExt for SbmError {
    fn with_context(self, key: &str, value: impl ToString) -> SbmError {
        match self {
            SbmError::Graph(info) => SbmError::Graph(info.with_context(key, value)),
            other => other,
        }
    }
}
