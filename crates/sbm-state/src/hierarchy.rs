use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sbm_core::errors::{ErrorInfo, SbmError};
use sbm_core::{Block, RngHandle, Vertex};

use crate::block_state::{BlockState, BlockStateOpts, MoveLog};
use crate::entropy::EntropyArgs;

/// Stack of coupled block states: each level's graph is the block
/// multigraph of the level below, and every authoritative change at the
/// base replays upward.
///
/// The stack is an arena — levels refer to each other by position, never by
/// pointer — so lifetimes are owned in one place and deep copies stay
/// trivial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedBlockState {
    levels: Vec<BlockState>,
    leas: Vec<EntropyArgs>,
}

impl NestedBlockState {
    /// Builds a hierarchy from a base state and one assignment per upper
    /// level (`bs[k]` labels the blocks of level `k`). `leas[k]` selects
    /// the entropy terms level `k + 1` contributes during propagation.
    pub fn new(
        base: BlockState,
        bs: &[Vec<Block>],
        leas: &[EntropyArgs],
    ) -> Result<Self, SbmError> {
        Self::with_labels(base, bs, &[], leas)
    }

    /// [`NestedBlockState::new`] with explicit constraint colours for each
    /// upper level's blocks; pass an empty slice for all-default colours.
    pub fn with_labels(
        base: BlockState,
        bs: &[Vec<Block>],
        bclabels: &[Vec<usize>],
        leas: &[EntropyArgs],
    ) -> Result<Self, SbmError> {
        if bs.len() != leas.len() {
            return Err(SbmError::Shape(
                ErrorInfo::new("levels-mismatch", "one entropy-args set per upper level")
                    .with_context("assignments", bs.len())
                    .with_context("entropy_args", leas.len()),
            ));
        }
        if !bclabels.is_empty() && bclabels.len() != bs.len() {
            return Err(SbmError::Shape(
                ErrorInfo::new("levels-mismatch", "one colour set per upper level")
                    .with_context("assignments", bs.len())
                    .with_context("bclabels", bclabels.len()),
            ));
        }
        let mut levels = vec![base];
        for (k, assignment) in bs.iter().enumerate() {
            let lower = levels.last().expect("at least the base level");
            let labels = bclabels.get(k).filter(|l| !l.is_empty());
            let upper = Self::lift(lower, assignment, labels)?;
            levels.push(upper);
        }
        let mut all_leas = vec![EntropyArgs::default()];
        all_leas.extend_from_slice(leas);
        Ok(Self {
            levels,
            leas: all_leas,
        })
    }

    /// Builds the state one level above `lower` under `assignment`.
    fn lift(
        lower: &BlockState,
        assignment: &[Block],
        bclabel: Option<&Vec<usize>>,
    ) -> Result<BlockState, SbmError> {
        let bg = lower.block_graph().clone();
        if assignment.len() != lower.num_blocks() {
            return Err(SbmError::Shape(
                ErrorInfo::new("assignment", "upper assignment must label every lower block")
                    .with_context("found", assignment.len())
                    .with_context("expected", lower.num_blocks()),
            ));
        }
        let mut eweight = vec![0u64; bg.edge_slots()];
        for slot in bg.edges() {
            let (r, s) = bg.endpoints(slot)?;
            eweight[slot] = plain_mass(lower, r, s);
        }
        let vweight: Vec<u64> = (0..lower.num_blocks())
            .map(|r| u64::from(lower.block_weight(r) > 0))
            .collect();
        BlockState::new(
            bg,
            assignment.to_vec(),
            BlockStateOpts {
                eweight: Some(eweight),
                vweight: Some(vweight),
                bclabel: bclabel.cloned(),
                ..BlockStateOpts::default()
            },
        )
    }

    /// Number of levels, including the base.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Read access to one level.
    pub fn level(&self, k: usize) -> &BlockState {
        &self.levels[k]
    }

    /// Mutable access to the base level, for proposal bookkeeping.
    pub fn base_mut(&mut self) -> &mut BlockState {
        &mut self.levels[0]
    }

    /// Whether every level admits moving base vertex `v` into `nr`.
    pub fn allow_move(&self, v: Vertex, nr: Block) -> bool {
        let mut r = self.levels[0].block_of(v);
        let mut t = nr;
        if t >= self.levels[0].num_blocks() {
            return true;
        }
        if !self.levels[0].allow_move(r, t) {
            return false;
        }
        for level in &self.levels[1..] {
            // Blocks not yet mirrored upward inherit the mover's labels.
            if r >= level.graph().num_vertices() || t >= level.graph().num_vertices() {
                return true;
            }
            r = level.block_of(r);
            t = level.block_of(t);
            if r != t && !level.allow_move(r, t) {
                return false;
            }
        }
        true
    }

    /// Grows every upper level until it covers the blocks allocated below,
    /// assigning fresh vertices along `v`'s current label chain.
    fn sync_capacity(&mut self, v: Vertex) {
        let mut chain = self.levels[0].block_of(v);
        for k in 1..self.levels.len() {
            while self.levels[k].graph().num_vertices() < self.levels[k - 1].num_blocks() {
                let target = self.levels[k].block_of(chain);
                self.levels[k].add_frozen_vertex(target);
            }
            chain = self.levels[k].block_of(chain);
        }
    }

    /// Samples a proposal for base vertex `v`, allocating blocks (and the
    /// matching upper vertices) as needed.
    pub fn sample_block(&mut self, v: Vertex, c: f64, d: f64, rng: &mut RngHandle) -> Block {
        let proposal = self.levels[0].sample_block(v, c, d, rng);
        self.sync_capacity(v);
        proposal
    }

    /// Exact proposal log-probability at the base level.
    pub fn get_move_prob(&self, v: Vertex, r: Block, s: Block, c: f64, d: f64, reverse: bool) -> f64 {
        self.levels[0].get_move_prob(v, r, s, c, d, reverse)
    }

    /// Moves base vertex `v` into `nr` and replays the induced changes
    /// through every level.
    pub fn move_vertex(&mut self, v: Vertex, nr: Block) -> Result<(), SbmError> {
        if !self.allow_move(v, nr) {
            return Err(SbmError::Constraint(
                ErrorInfo::new("coupled-barrier", "a coupled level rejected the move")
                    .with_context("vertex", v)
                    .with_context("to", nr),
            ));
        }
        self.sync_capacity(v);
        let mut log = self.levels[0].move_vertex(v, nr)?;
        self.sync_capacity(v);
        for k in 1..self.levels.len() {
            log = self.replay(k, log)?;
        }
        Ok(())
    }

    /// Applies one level's move log to the level above, returning the
    /// changes it produced in turn.
    fn replay(&mut self, k: usize, log: MoveLog) -> Result<MoveLog, SbmError> {
        let lower_directed = self.levels[k - 1].block_graph().is_directed();
        let mut next = MoveLog::default();
        if let Some(nb) = log.occupied {
            self.levels[k].set_vertex_weight(nb, 1);
            let target = self.levels[k].block_of(nb);
            next = next_merge(next, self.levels[k].add_partition_node(nb, target));
        }
        for &(r, s, dm) in &log.edge_deltas {
            let plain = plain_delta(lower_directed, r, s, dm);
            if plain == 0 {
                continue;
            }
            match self.levels[k].find_graph_edge(r, s) {
                Some(edge) => {
                    next = next_merge(next, self.levels[k].modify_edge_weight(edge, plain)?);
                }
                None => {
                    if plain < 0 {
                        return Err(SbmError::Invariant(
                            ErrorInfo::new("missing-mirror-edge", "no upper edge to decrement")
                                .with_context("r", r)
                                .with_context("s", s),
                        ));
                    }
                    let (_, l) = self.levels[k].add_edge(r, s, plain as u64)?;
                    next = next_merge(next, l);
                }
            }
        }
        if let Some(eb) = log.emptied {
            next = next_merge(next, self.levels[k].remove_partition_node(eb));
            self.levels[k].set_vertex_weight(eb, 0);
        }
        Ok(next)
    }

    /// Signed description-length delta of moving base vertex `v` from `r`
    /// to `nr`, including every coupled level's contribution; pure.
    pub fn virtual_move(&mut self, v: Vertex, r: Block, nr: Block, ea: &EntropyArgs) -> f64 {
        if r == nr {
            return 0.0;
        }
        if !self.allow_move(v, nr) {
            return f64::INFINITY;
        }
        self.sync_capacity(v);
        let mut ds = self.levels[0].virtual_move(v, r, nr, ea);
        if !ds.is_finite() {
            return ds;
        }
        let mut entries = self.levels[0].move_entries().to_entry_list();
        let mut du = self.levels[0].block_weight(r) == self.levels[0].vertex_weight(v);
        let mut dv = self.levels[0].block_weight(nr) == 0;
        let (mut lu, mut lv) = (r, nr);
        for k in 1..self.levels.len() {
            let lea = self.leas[k];
            ds += self.levels[k].propagate_entries_ds(lu, lv, du, dv, &entries, &lea);
            if k + 1 < self.levels.len() {
                let lvl = &self.levels[k];
                let (next_entries, ndu, ndv, nlu, nlv) =
                    aggregate_up(lvl, &entries, du, dv, lu, lv);
                entries = next_entries;
                du = ndu;
                dv = ndv;
                lu = nlu;
                lv = nlv;
            }
        }
        ds
    }

    /// Description length of the hierarchy; with `propagate`, every level
    /// contributes under its own entropy arguments.
    pub fn entropy(&self, ea: &EntropyArgs, propagate: bool) -> Result<f64, SbmError> {
        let mut s = self.levels[0].entropy(ea)?;
        if propagate {
            for k in 1..self.levels.len() {
                s += self.levels[k].entropy(&self.leas[k])?;
            }
        }
        Ok(s)
    }

    /// Fully independent copy of the whole stack.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Concatenated per-level partition hashes; equal stacks hash equal.
    pub fn partition_hash(&self) -> String {
        self.levels
            .iter()
            .map(|level| level.partition_hash())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Verifies per-level counters and the cross-level invariants: upper
    /// graphs mirror lower block graphs, upper weights mirror occupation.
    pub fn check_consistency(&self) -> bool {
        let mut ok = true;
        for level in &self.levels {
            ok &= level.check_edge_counts();
            ok &= level.check_node_counts();
        }
        for k in 1..self.levels.len() {
            let lower = &self.levels[k - 1];
            let upper = &self.levels[k];
            for r in 0..lower.num_blocks() {
                ok &= (lower.block_weight(r) > 0) == (upper.vertex_weight(r) > 0);
            }
            let mut expected: BTreeMap<(Block, Block), u64> = BTreeMap::new();
            let bg = lower.block_graph();
            for slot in bg.edges() {
                let (r, s) = match bg.endpoints(slot) {
                    Ok(pair) => pair,
                    Err(_) => return false,
                };
                expected.insert((r, s), plain_mass(lower, r, s));
            }
            let upper_g = upper.graph();
            let mut seen = 0usize;
            for slot in upper_g.edges() {
                let (r, s) = match upper_g.endpoints(slot) {
                    Ok(pair) => pair,
                    Err(_) => return false,
                };
                seen += 1;
                ok &= expected.get(&(r, s)).copied() == Some(upper.edge_weight(slot));
            }
            ok &= seen == expected.len();
        }
        ok
    }
}

/// Maps one level's entry list through the next level's assignment,
/// converting between plain and matrix-convention masses on the way.
fn aggregate_up(
    lvl: &BlockState,
    entries: &[(Vertex, Vertex, i64)],
    du: bool,
    dv: bool,
    lu: Vertex,
    lv: Vertex,
) -> (Vec<(Block, Block, i64)>, bool, bool, Block, Block) {
    let directed = lvl.graph().is_directed();
    let mut merged: BTreeMap<(Block, Block), i64> = BTreeMap::new();
    for &(a, c, delta) in entries {
        let plain = plain_delta(directed, a, c, delta);
        let (ra, rc) = (lvl.block_of(a), lvl.block_of(c));
        let key = if directed || ra <= rc { (ra, rc) } else { (rc, ra) };
        let dm = if !directed && ra == rc { 2 * plain } else { plain };
        *merged.entry(key).or_insert(0) += dm;
    }
    let next_entries: Vec<(Block, Block, i64)> = merged
        .into_iter()
        .filter(|&(_, dm)| dm != 0)
        .map(|((r, s), dm)| (r, s, dm))
        .collect();
    let du_next = du && lvl.block_weight(lvl.block_of(lu)) == lvl.vertex_weight(lu);
    let dv_next = dv && lvl.block_weight(lvl.block_of(lv)) == 0;
    (
        next_entries,
        du_next,
        dv_next,
        lvl.block_of(lu),
        lvl.block_of(lv),
    )
}

/// Plain (edge-count) mass of a lower-level block pair; diagonal entries
/// halve the matrix convention on undirected graphs.
fn plain_mass(lower: &BlockState, r: Block, s: Block) -> u64 {
    let mass = lower.pair_mass(r, s);
    if !lower.block_graph().is_directed() && r == s {
        mass / 2
    } else {
        mass
    }
}

fn plain_delta(directed: bool, r: Block, s: Block, dm: i64) -> i64 {
    if !directed && r == s {
        dm / 2
    } else {
        dm
    }
}

fn next_merge(acc: MoveLog, other: MoveLog) -> MoveLog {
    let mut acc = acc;
    acc.edge_deltas.extend(other.edge_deltas);
    acc.emptied = acc.emptied.or(other.emptied);
    acc.occupied = acc.occupied.or(other.occupied);
    acc
}
