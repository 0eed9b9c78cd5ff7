use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use sbm_core::Block;

/// Per-covariate deltas attached to one block-pair entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecDelta {
    /// Change of the covariate sum.
    pub dx: f64,
    /// Change of the squared-covariate sum.
    pub dx2: f64,
}

/// Sparse accumulator of the `(r, s) -> delta m_rs` changes induced by one
/// tentative vertex move.
///
/// The structure is reused across virtual moves without reallocation:
/// [`MEntries::set_move`] clears the previous proposal while keeping every
/// buffer's capacity. Exclusive access is enforced through `&mut` borrows
/// on the owning state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MEntries {
    directed: bool,
    n_recs: usize,
    source: Block,
    target: Block,
    index: IndexMap<(Block, Block), usize>,
    delta: Vec<i64>,
    rec_delta: Vec<RecDelta>,
}

impl MEntries {
    /// Creates an empty accumulator for graphs of the given directedness
    /// carrying `n_recs` covariates per edge.
    pub fn new(directed: bool, n_recs: usize) -> Self {
        Self {
            directed,
            n_recs,
            source: 0,
            target: 0,
            index: IndexMap::new(),
            delta: Vec::new(),
            rec_delta: Vec::new(),
        }
    }

    /// Resets the accumulator and declares the proposal `r -> nr`.
    pub fn set_move(&mut self, r: Block, nr: Block) {
        self.source = r;
        self.target = nr;
        self.index.clear();
        self.delta.clear();
        self.rec_delta.clear();
    }

    /// Block the proposal moves out of.
    pub fn source(&self) -> Block {
        self.source
    }

    /// Block the proposal moves into.
    pub fn target(&self) -> Block {
        self.target
    }

    /// Number of covariates carried per entry.
    pub fn n_recs(&self) -> usize {
        self.n_recs
    }

    fn key(&self, r: Block, s: Block) -> (Block, Block) {
        if self.directed || r <= s {
            (r, s)
        } else {
            (s, r)
        }
    }

    /// Accumulates a `(r, s) -> delta` entry without covariate changes.
    pub fn insert_delta(&mut self, r: Block, s: Block, delta: i64) {
        self.insert_delta_rec(r, s, delta, &[]);
    }

    /// Accumulates a `(r, s) -> delta` entry along with per-covariate
    /// deltas; `recs` is either empty or one slot per covariate.
    pub fn insert_delta_rec(&mut self, r: Block, s: Block, delta: i64, recs: &[RecDelta]) {
        debug_assert!(recs.is_empty() || recs.len() == self.n_recs);
        let key = self.key(r, s);
        let pos = match self.index.get(&key) {
            Some(&pos) => pos,
            None => {
                let pos = self.delta.len();
                self.index.insert(key, pos);
                self.delta.push(0);
                self.rec_delta
                    .resize(self.rec_delta.len() + self.n_recs, RecDelta::default());
                pos
            }
        };
        self.delta[pos] += delta;
        if !recs.is_empty() {
            let base = pos * self.n_recs;
            for (slot, rec) in self.rec_delta[base..base + self.n_recs].iter_mut().zip(recs) {
                slot.dx += rec.dx;
                slot.dx2 += rec.dx2;
            }
        }
    }

    /// Accumulated delta for `(r, s)`, zero when no entry exists.
    pub fn get_delta(&self, r: Block, s: Block) -> i64 {
        let key = self.key(r, s);
        match self.index.get(&key) {
            Some(&pos) => self.delta[pos],
            None => 0,
        }
    }

    /// Number of distinct block pairs touched by the proposal.
    pub fn len(&self) -> usize {
        self.delta.len()
    }

    /// Whether the proposal touches no block pair.
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    /// Iterates the accumulated entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Block, Block, i64, &[RecDelta])> + '_ {
        self.index.iter().map(move |(&(r, s), &pos)| {
            let base = pos * self.n_recs;
            (r, s, self.delta[pos], &self.rec_delta[base..base + self.n_recs])
        })
    }

    /// Copies the `(r, s, delta)` triples into a plain vector, for
    /// consumption by a coupled level.
    pub fn to_entry_list(&self) -> Vec<(Block, Block, i64)> {
        self.iter().map(|(r, s, d, _)| (r, s, d)).collect()
    }
}
