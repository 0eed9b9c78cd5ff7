use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use sbm_core::{Block, EdgeIx};

/// Bidirectional lookup between block pairs `(r, s)` and the corresponding
/// edge slot of the block multigraph.
///
/// Two representations behave identically from the caller's viewpoint: a
/// dense `B x B` table when the allocated block count stays small, and an
/// insertion-ordered hash map otherwise. Undirected lookups canonicalise
/// the pair low-high.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPairIndex {
    directed: bool,
    repr: Repr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Repr {
    Dense(Vec<Vec<Option<EdgeIx>>>),
    Hash(IndexMap<(Block, Block), EdgeIx>),
}

impl BlockPairIndex {
    /// Chooses the dense table when `num_blocks <= dense_threshold`.
    pub fn new(num_blocks: usize, directed: bool, dense_threshold: usize) -> Self {
        let repr = if num_blocks <= dense_threshold {
            Repr::Dense(vec![vec![None; num_blocks]; num_blocks])
        } else {
            Repr::Hash(IndexMap::new())
        };
        Self { directed, repr }
    }

    fn key(&self, r: Block, s: Block) -> (Block, Block) {
        if self.directed || r <= s {
            (r, s)
        } else {
            (s, r)
        }
    }

    /// Returns the block-graph edge slot for `(r, s)`, when one exists.
    pub fn get_me(&self, r: Block, s: Block) -> Option<EdgeIx> {
        let (r, s) = self.key(r, s);
        match &self.repr {
            Repr::Dense(table) => table.get(r).and_then(|row| row.get(s)).copied().flatten(),
            Repr::Hash(map) => map.get(&(r, s)).copied(),
        }
    }

    /// Records a freshly created block-graph edge.
    pub fn put_me(&mut self, r: Block, s: Block, edge: EdgeIx) {
        let (r, s) = self.key(r, s);
        match &mut self.repr {
            Repr::Dense(table) => table[r][s] = Some(edge),
            Repr::Hash(map) => {
                map.insert((r, s), edge);
            }
        }
    }

    /// Invalidates the `(r, s)` entry; physical removal from the block
    /// graph is the caller's decision.
    pub fn remove_me(&mut self, r: Block, s: Block) {
        let (r, s) = self.key(r, s);
        match &mut self.repr {
            Repr::Dense(table) => table[r][s] = None,
            Repr::Hash(map) => {
                map.swap_remove(&(r, s));
            }
        }
    }

    /// Extends the structure after the block count has grown by one.
    pub fn add_block(&mut self) {
        if let Repr::Dense(table) = &mut self.repr {
            let n = table.len() + 1;
            for row in table.iter_mut() {
                row.push(None);
            }
            table.push(vec![None; n]);
        }
    }
}
