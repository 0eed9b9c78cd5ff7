use serde::{Deserialize, Serialize};

use sbm_core::errors::{ErrorInfo, SbmError};
use sbm_core::{Block, EdgeIx, RngHandle, Vertex};
use sbm_graph::Multigraph;

/// Weighted sampler over removable items, backed by a Fenwick tree.
///
/// Weights are integers so draws are exactly reproducible under a seeded
/// RNG. Slots are recycled through a free list; removal zeroes the weight
/// in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicSampler {
    items: Vec<(EdgeIx, u8)>,
    weights: Vec<u64>,
    tree: Vec<i64>,
    free: Vec<usize>,
    total: u64,
}

impl DynamicSampler {
    /// Creates an empty sampler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total weight currently stored.
    pub fn total(&self) -> u64 {
        self.total
    }

    fn update(&mut self, slot: usize, delta: i64) {
        let mut i = slot + 1;
        while i <= self.tree.len() {
            self.tree[i - 1] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Inserts an item with the given weight, returning its slot.
    pub fn insert(&mut self, item: (EdgeIx, u8), weight: u64) -> usize {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.items[slot] = item;
                self.weights[slot] = weight;
                slot
            }
            None => {
                self.items.push(item);
                self.weights.push(weight);
                self.tree.push(0);
                self.items.len() - 1
            }
        };
        self.update(slot, weight as i64);
        self.total += weight;
        slot
    }

    /// Removes the item at `slot`; the slot becomes reusable.
    pub fn remove(&mut self, slot: usize) {
        let weight = self.weights[slot];
        self.update(slot, -(weight as i64));
        self.total -= weight;
        self.weights[slot] = 0;
        self.free.push(slot);
    }

    /// Draws an item with probability proportional to its weight.
    pub fn sample(&self, rng: &mut RngHandle) -> Option<(EdgeIx, u8)> {
        if self.total == 0 {
            return None;
        }
        let mut remaining = rng.below(self.total as usize) as i64;
        let mut pos = 0usize;
        let mut mask = self.tree.len().next_power_of_two();
        while mask > 0 {
            let next = pos + mask;
            if next <= self.tree.len() && self.tree[next - 1] <= remaining {
                remaining -= self.tree[next - 1];
                pos = next;
            }
            mask >>= 1;
        }
        Some(self.items[pos])
    }
}

/// Per-block weighted samplers over edge endpoints, used to propose
/// informed moves.
///
/// Each edge is registered once per endpoint, under the endpoint's current
/// block, with its edge weight. Sampling an entry of block `t` and crossing
/// to the opposite endpoint draws a neighbouring block `s` with probability
/// `m_ts / m_t`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EGroups {
    samplers: Vec<DynamicSampler>,
    positions: Vec<Vec<(EdgeIx, u8, usize)>>,
}

impl EGroups {
    /// Builds the samplers from scratch for the given assignment.
    pub fn build(g: &Multigraph, b: &[Block], eweight: &[u64], num_blocks: usize) -> Self {
        let mut groups = Self {
            samplers: (0..num_blocks).map(|_| DynamicSampler::new()).collect(),
            positions: vec![Vec::new(); g.num_vertices()],
        };
        for edge in g.edges() {
            let (u, v) = g.endpoints(edge).expect("alive edge");
            let weight = eweight[edge];
            groups.register(u, edge, 0, b[u], weight);
            groups.register(v, edge, 1, b[v], weight);
        }
        groups
    }

    fn register(&mut self, vertex: Vertex, edge: EdgeIx, end: u8, block: Block, weight: u64) {
        let slot = self.samplers[block].insert((edge, end), weight);
        self.positions[vertex].push((edge, end, slot));
    }

    /// Extends the samplers after the block count has grown by one.
    pub fn add_block(&mut self) {
        self.samplers.push(DynamicSampler::new());
    }

    /// Re-registers every endpoint of `v` after its move from `r` to `nr`.
    pub fn move_vertex(&mut self, v: Vertex, r: Block, nr: Block, eweight: &[u64]) {
        let entries = std::mem::take(&mut self.positions[v]);
        let mut updated = Vec::with_capacity(entries.len());
        for (edge, end, slot) in entries {
            self.samplers[r].remove(slot);
            let new_slot = self.samplers[nr].insert((edge, end), eweight[edge]);
            updated.push((edge, end, new_slot));
        }
        self.positions[v] = updated;
    }

    /// Samples an `(edge, endpoint)` incident to block `t`, weighted by
    /// edge weight; `None` when the block touches no edge.
    pub fn sample_edge(&self, t: Block, rng: &mut RngHandle) -> Option<(EdgeIx, u8)> {
        self.samplers[t].sample(rng)
    }

    /// Verifies that each block's stored weight matches the given totals.
    pub fn check(&self, expected: &[u64]) -> Result<(), SbmError> {
        for (block, sampler) in self.samplers.iter().enumerate() {
            let want = expected.get(block).copied().unwrap_or(0);
            if sampler.total() != want {
                return Err(SbmError::Invariant(
                    ErrorInfo::new("egroups-total", "sampler weight diverged from edge counts")
                        .with_context("block", block)
                        .with_context("sampler", sampler.total())
                        .with_context("expected", want),
                ));
            }
        }
        Ok(())
    }
}
