use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sbm_core::errors::{ErrorInfo, SbmError};
use sbm_core::numeric::lgamma_fast;
use sbm_core::{Block, RngHandle, Vertex};
use sbm_graph::{HalfEdgeExpansion, Multigraph};

use crate::block_state::{eterm, vterm};
use crate::emat::BlockPairIndex;
use crate::entropy::EntropyArgs;
use crate::mentries::MEntries;
use crate::pstats::PartitionStats;

/// Construction options for [`OverlapBlockState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlapOpts {
    /// Whether owner degrees are model parameters.
    pub deg_corr: bool,
    /// Constraint colour per block; default all 0.
    pub bclabel: Option<Vec<usize>>,
    /// Log-prior over the occupied block count; empty disables it.
    pub bprior: Vec<f64>,
    /// Block counts up to this bound use the dense pair index.
    pub dense_threshold: usize,
}

impl Default for OverlapOpts {
    fn default() -> Self {
        Self {
            deg_corr: false,
            bclabel: None,
            bprior: Vec::new(),
            dense_threshold: 512,
        }
    }
}

/// Overlapping SBM state: block labels live on half-edges, so an original
/// node belongs to the union of its half-edges' blocks.
///
/// `w_r` counts distinct owners represented in `r`; the per-owner label
/// multiset is tracked so membership transitions are O(log B). The move and
/// delta machinery mirrors [`crate::BlockState`] over the half-edge graph,
/// where every vertex has exactly one incident edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlapBlockState {
    he: HalfEdgeExpansion,
    eweight: Vec<u64>,
    b: Vec<Block>,
    bclabel: Vec<usize>,
    bprior: Vec<f64>,
    deg_corr: bool,
    bg: Multigraph,
    mrs: Vec<u64>,
    mrp: Vec<u64>,
    mrm: Vec<u64>,
    wr: Vec<u64>,
    emat: BlockPairIndex,
    empty_blocks: Vec<Block>,
    candidate_blocks: Vec<Block>,
    block_pos: Vec<usize>,
    node_blocks: Vec<BTreeMap<Block, u64>>,
    stats: PartitionStats,
    owner_stats: PartitionStats,
    m_entries: MEntries,
}

impl OverlapBlockState {
    /// Builds the state from an original graph, expanding it to half-edges
    /// internally; `b` labels the half-edges in expansion order.
    pub fn from_graph(
        original: &Multigraph,
        b: Vec<Block>,
        eweight: Option<Vec<u64>>,
        opts: OverlapOpts,
    ) -> Result<Self, SbmError> {
        let he = HalfEdgeExpansion::build(original)?;
        let slots = he.graph().edge_slots();
        let eweight = match eweight {
            Some(w) => {
                // Weights arrive per original edge slot; re-index them to
                // the expansion's edges.
                let mut expanded = vec![1u64; slots];
                for original_edge in original.edges() {
                    if let Some(slot) = he.expansion_edge(original_edge) {
                        expanded[slot] = *w.get(original_edge).ok_or_else(|| {
                            SbmError::Shape(
                                ErrorInfo::new("eweight", "weight vector too short")
                                    .with_context("edge", original_edge),
                            )
                        })?;
                    }
                }
                expanded
            }
            None => vec![1; slots],
        };
        Self::new(he, b, eweight, opts)
    }

    /// Builds the state from a prepared expansion.
    pub fn new(
        he: HalfEdgeExpansion,
        b: Vec<Block>,
        eweight: Vec<u64>,
        opts: OverlapOpts,
    ) -> Result<Self, SbmError> {
        let n = he.num_half_edges();
        if b.len() != n {
            return Err(SbmError::Shape(
                ErrorInfo::new("assignment", "one label per half-edge")
                    .with_context("found", b.len())
                    .with_context("expected", n),
            ));
        }
        let directed = he.graph().is_directed();
        let num_blocks = b.iter().map(|&r| r + 1).max().unwrap_or(1);
        let bclabel = match opts.bclabel {
            Some(l) if l.len() != num_blocks => {
                return Err(SbmError::Shape(
                    ErrorInfo::new("bclabel", "one colour per block")
                        .with_context("found", l.len())
                        .with_context("expected", num_blocks),
                ))
            }
            Some(l) => l,
            None => vec![0; num_blocks],
        };
        let mut state = Self {
            bg: Multigraph::with_vertices(num_blocks, directed),
            mrs: Vec::new(),
            mrp: vec![0; num_blocks],
            mrm: if directed { vec![0; num_blocks] } else { Vec::new() },
            wr: vec![0; num_blocks],
            emat: BlockPairIndex::new(num_blocks, directed, opts.dense_threshold),
            empty_blocks: Vec::new(),
            candidate_blocks: Vec::new(),
            block_pos: vec![0; num_blocks],
            node_blocks: vec![BTreeMap::new(); he.num_nodes()],
            stats: PartitionStats::new(directed, false),
            owner_stats: PartitionStats::new(directed, opts.deg_corr),
            m_entries: MEntries::new(directed, 0),
            deg_corr: opts.deg_corr,
            bprior: opts.bprior,
            bclabel,
            he,
            eweight,
            b,
        };
        state.rebuild_counters();
        Ok(state)
    }

    fn rebuild_counters(&mut self) {
        for h in 0..self.he.num_half_edges() {
            let r = self.b[h];
            let (kin, kout) = self.half_edge_degrees(h);
            self.stats.add_vertex(r, 1, kin, kout);
            let owner = self.he.owner(h);
            let count = self.node_blocks[owner].entry(r).or_insert(0);
            *count += 1;
            if *count == 1 {
                self.wr[r] += 1;
                let (okin, okout) = self.owner_degrees(owner);
                self.owner_stats.add_vertex(r, 1, okin, okout);
            }
        }
        let expansion = self.he.graph().clone();
        for edge in expansion.edges() {
            let (hu, hv) = expansion.endpoints(edge).expect("alive edge");
            let w = self.eweight[edge];
            let (r, s) = (self.b[hu], self.b[hv]);
            let dm = if !expansion.is_directed() && r == s {
                2 * w as i64
            } else {
                w as i64
            };
            self.apply_pair_delta(r, s, dm);
            if expansion.is_directed() {
                self.mrp[r] += w;
                self.mrm[s] += w;
            } else {
                self.mrp[r] += w;
                self.mrp[s] += w;
            }
            self.stats.change_e(w as i64);
        }
        for r in 0..self.wr.len() {
            self.block_pos[r] = if self.wr[r] > 0 {
                self.candidate_blocks.push(r);
                self.candidate_blocks.len() - 1
            } else {
                self.empty_blocks.push(r);
                self.empty_blocks.len() - 1
            };
        }
    }

    /// Weighted degrees of one half-edge: its single edge's weight, on the
    /// side it occupies.
    fn half_edge_degrees(&self, h: Vertex) -> (u64, u64) {
        let edge = self
            .he
            .expansion_edge(self.he.source_edge(h))
            .expect("half-edge has an edge");
        let w = self.eweight[edge];
        if !self.he.graph().is_directed() {
            return (w, w);
        }
        if h % 2 == 0 {
            (0, w)
        } else {
            (w, 0)
        }
    }

    /// Weighted degrees of an original node, summed over its half-edges.
    fn owner_degrees(&self, owner: Vertex) -> (u64, u64) {
        let mut kin = 0;
        let mut kout = 0;
        for &h in self.he.halves(owner) {
            let (i, o) = self.half_edge_degrees(h);
            kin += i;
            kout += o;
        }
        if self.he.graph().is_directed() {
            (kin, kout)
        } else {
            (kout, kout)
        }
    }

    fn apply_pair_delta(&mut self, r: Block, s: Block, dm: i64) {
        let directed = self.bg.is_directed();
        let (cr, cs) = if directed || r <= s { (r, s) } else { (s, r) };
        let slot = match self.emat.get_me(cr, cs) {
            Some(slot) => slot,
            None => {
                debug_assert!(dm > 0);
                let slot = self.bg.add_edge(cr, cs).expect("block exists");
                if slot >= self.mrs.len() {
                    self.mrs.resize(slot + 1, 0);
                }
                self.mrs[slot] = 0;
                self.emat.put_me(cr, cs, slot);
                slot
            }
        };
        self.mrs[slot] = add_signed(self.mrs[slot], dm);
        if self.mrs[slot] == 0 {
            self.bg.remove_edge(slot).expect("alive block edge");
            self.emat.remove_me(cr, cs);
        }
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    /// The half-edge expansion the state labels.
    pub fn expansion(&self) -> &HalfEdgeExpansion {
        &self.he
    }

    /// Current block of half-edge `h`.
    pub fn block_of(&self, h: Vertex) -> Block {
        self.b[h]
    }

    /// Number of allocated blocks.
    pub fn num_blocks(&self) -> usize {
        self.wr.len()
    }

    /// Number of occupied blocks.
    pub fn actual_b(&self) -> usize {
        self.candidate_blocks.len()
    }

    /// Distinct owners represented in block `r`.
    pub fn block_weight(&self, r: Block) -> u64 {
        self.wr[r]
    }

    /// Edge mass between the blocks `(r, s)`.
    pub fn pair_mass(&self, r: Block, s: Block) -> u64 {
        match self.emat.get_me(r, s) {
            Some(slot) => self.mrs[slot],
            None => 0,
        }
    }

    /// Currently empty block labels.
    pub fn empty_blocks(&self) -> &[Block] {
        &self.empty_blocks
    }

    /// Currently occupied block labels.
    pub fn candidate_blocks(&self) -> &[Block] {
        &self.candidate_blocks
    }

    /// Label multiset of the owner of `h` (block -> half-edge count).
    pub fn owner_blocks(&self, owner: Vertex) -> &BTreeMap<Block, u64> {
        &self.node_blocks[owner]
    }

    /// Whether removing half-edge `h` from its block leaves its owner
    /// still represented there.
    pub fn virtual_remove_size(&self, h: Vertex) -> bool {
        let owner = self.he.owner(h);
        self.node_blocks[owner]
            .get(&self.b[h])
            .map(|&count| count > 1)
            .unwrap_or(false)
    }

    /// Uniform half-edge of `u`, crossed to the far side of its edge.
    pub fn random_neighbour(&self, u: Vertex, rng: &mut RngHandle) -> Result<Vertex, SbmError> {
        let halves = self.he.halves(u);
        if halves.is_empty() {
            return Err(SbmError::Graph(
                ErrorInfo::new("isolated-node", "node owns no half-edges").with_context("node", u),
            ));
        }
        let h = halves[rng.below(halves.len())];
        self.he.opposite(h)
    }

    fn total_block_mass(&self, r: Block) -> u64 {
        if self.bg.is_directed() {
            self.mrp[r] + self.mrm[r]
        } else {
            self.mrp[r]
        }
    }

    fn block_in_mass(&self, r: Block) -> u64 {
        if self.bg.is_directed() {
            self.mrm[r]
        } else {
            self.mrp[r]
        }
    }

    fn pair_mass_hat(&self, t: Block, s: Block) -> u64 {
        if self.bg.is_directed() {
            if t == s {
                2 * self.pair_mass(t, t)
            } else {
                self.pair_mass(t, s) + self.pair_mass(s, t)
            }
        } else {
            self.pair_mass(t, s)
        }
    }

    fn pair_delta_hat(&self, t: Block, s: Block) -> i64 {
        if self.bg.is_directed() {
            if t == s {
                2 * self.m_entries.get_delta(t, t)
            } else {
                self.m_entries.get_delta(t, s) + self.m_entries.get_delta(s, t)
            }
        } else {
            self.m_entries.get_delta(t, s)
        }
    }

    /// The block pair of `h`'s edge when `h` carries label `hr` and the
    /// opposite half carries its current label, oriented source-target.
    fn edge_pair(&self, h: Vertex, hr: Block) -> (Block, Block) {
        let opposite = self.he.opposite(h).expect("expansion edge");
        let t = self.b[opposite];
        if !self.bg.is_directed() || h % 2 == 0 {
            (hr, t)
        } else {
            (t, hr)
        }
    }

    // ------------------------------------------------------------------
    // moves
    // ------------------------------------------------------------------

    /// Allocates a fresh block carrying colour `label`.
    pub fn add_block(&mut self, label: usize) -> Block {
        let r = self.bg.add_vertex();
        self.mrp.push(0);
        if self.bg.is_directed() {
            self.mrm.push(0);
        }
        self.wr.push(0);
        self.bclabel.push(label);
        self.emat.add_block();
        self.empty_blocks.push(r);
        self.block_pos.push(self.empty_blocks.len() - 1);
        r
    }

    /// Whether `bclabel` admits the move.
    pub fn allow_move(&self, r: Block, nr: Block) -> bool {
        self.bclabel[r] == self.bclabel[nr]
    }

    /// Moves half-edge `h` into block `nr`.
    pub fn move_vertex(&mut self, h: Vertex, nr: Block) -> Result<(), SbmError> {
        let r = self.b[h];
        let nr = if nr >= self.num_blocks() {
            let label = self.bclabel[r];
            while nr >= self.num_blocks() {
                self.add_block(label);
            }
            nr
        } else {
            nr
        };
        if r == nr {
            return Ok(());
        }
        if !self.allow_move(r, nr) {
            return Err(SbmError::Constraint(
                ErrorInfo::new("bclabel", "blocks carry different constraint colours")
                    .with_context("half_edge", h)
                    .with_context("from", r)
                    .with_context("to", nr),
            ));
        }
        let edge = self
            .he
            .expansion_edge(self.he.source_edge(h))
            .expect("half-edge has an edge");
        let w = self.eweight[edge] as i64;
        let directed = self.bg.is_directed();

        let (or_, os) = self.edge_pair(h, r);
        let dm_old = if !directed && or_ == os { 2 * w } else { w };
        self.apply_pair_delta(or_, os, -dm_old);
        self.b[h] = nr;
        let (np, ns) = self.edge_pair(h, nr);
        let dm_new = if !directed && np == ns { 2 * w } else { w };
        self.apply_pair_delta(np, ns, dm_new);

        let (kin, kout) = self.half_edge_degrees(h);
        if directed {
            if h % 2 == 0 {
                self.mrp[r] -= w as u64;
                self.mrp[nr] += w as u64;
            } else {
                self.mrm[r] -= w as u64;
                self.mrm[nr] += w as u64;
            }
        } else {
            self.mrp[r] -= w as u64;
            self.mrp[nr] += w as u64;
        }
        self.stats.remove_vertex(r, 1, kin, kout);
        self.stats.add_vertex(nr, 1, kin, kout);

        let owner = self.he.owner(h);
        let (okin, okout) = self.owner_degrees(owner);
        let leaving = {
            let count = self.node_blocks[owner].get_mut(&r).expect("member");
            *count -= 1;
            if *count == 0 {
                self.node_blocks[owner].remove(&r);
                true
            } else {
                false
            }
        };
        if leaving {
            self.wr[r] -= 1;
            self.owner_stats.remove_vertex(r, 1, okin, okout);
            if self.wr[r] == 0 {
                self.demote_block(r);
            }
        }
        let entering = {
            let count = self.node_blocks[owner].entry(nr).or_insert(0);
            *count += 1;
            *count == 1
        };
        if entering {
            if self.wr[nr] == 0 {
                self.promote_block(nr);
            }
            self.wr[nr] += 1;
            self.owner_stats.add_vertex(nr, 1, okin, okout);
        }
        Ok(())
    }

    fn promote_block(&mut self, r: Block) {
        let pos = self.block_pos[r];
        let last = self.empty_blocks.len() - 1;
        self.empty_blocks.swap(pos, last);
        let moved = self.empty_blocks[pos];
        self.block_pos[moved] = pos;
        self.empty_blocks.pop();
        self.candidate_blocks.push(r);
        self.block_pos[r] = self.candidate_blocks.len() - 1;
    }

    fn demote_block(&mut self, r: Block) {
        let pos = self.block_pos[r];
        let last = self.candidate_blocks.len() - 1;
        self.candidate_blocks.swap(pos, last);
        let moved = self.candidate_blocks[pos];
        self.block_pos[moved] = pos;
        self.candidate_blocks.pop();
        self.empty_blocks.push(r);
        self.block_pos[r] = self.empty_blocks.len() - 1;
    }

    // ------------------------------------------------------------------
    // deltas and entropy
    // ------------------------------------------------------------------

    /// Signed description-length delta of moving half-edge `h` from `r` to
    /// `nr` without mutating state; `+inf` when disallowed.
    pub fn virtual_move(&mut self, h: Vertex, r: Block, nr: Block, ea: &EntropyArgs) -> f64 {
        debug_assert_eq!(self.b[h], r);
        if r == nr {
            return 0.0;
        }
        if nr >= self.num_blocks() || !self.allow_move(r, nr) || ea.dense {
            return f64::INFINITY;
        }
        let edge = self
            .he
            .expansion_edge(self.he.source_edge(h))
            .expect("half-edge has an edge");
        let w = self.eweight[edge] as i64;
        let directed = self.bg.is_directed();

        let mut entries = std::mem::replace(&mut self.m_entries, MEntries::new(true, 0));
        entries.set_move(r, nr);
        let (or_, os) = self.edge_pair(h, r);
        entries.insert_delta(or_, os, if !directed && or_ == os { -2 * w } else { -w });
        let (np, ns) = {
            let opposite = self.he.opposite(h).expect("expansion edge");
            let t = self.b[opposite];
            if !directed || h % 2 == 0 {
                (nr, t)
            } else {
                (t, nr)
            }
        };
        entries.insert_delta(np, ns, if !directed && np == ns { 2 * w } else { w });
        self.m_entries = entries;

        let owner = self.he.owner(h);
        let leaving = !self.virtual_remove_size(h);
        let entering = !self.node_blocks[owner].contains_key(&nr);
        let db = -i64::from(leaving && self.wr[r] == 1) + i64::from(self.wr[nr] == 0);

        let mut ds = 0.0;
        if ea.adjacency {
            for (x, y, delta, _) in self.m_entries.iter() {
                let m_old = self.pair_mass(x, y);
                let m_new = add_signed(m_old, delta);
                ds += eterm(x, y, m_new, directed, ea.exact)
                    - eterm(x, y, m_old, directed, ea.exact);
            }
            let (kin, kout) = self.half_edge_degrees(h);
            let (dout, din) = if directed { (kout, kin) } else { (kout, kout) };
            let transitions = [(r, -1i64, leaving), (nr, 1i64, entering)];
            for (block, sign, toggles) in transitions {
                let mrp_new = add_signed(self.mrp[block], sign * dout as i64);
                let mrm_new = add_signed(self.block_in_mass(block), sign * din as i64);
                let wr_new = if toggles {
                    add_signed(self.wr[block], sign)
                } else {
                    self.wr[block]
                };
                ds += vterm(mrp_new, mrm_new, wr_new, self.deg_corr, directed, ea.exact)
                    - vterm(
                        self.mrp[block],
                        self.block_in_mass(block),
                        self.wr[block],
                        self.deg_corr,
                        directed,
                        ea.exact,
                    );
            }
        }

        let mut dl = 0.0;
        if ea.partition_dl {
            dl += self.stats.get_delta_partition_dl(r, nr, 1);
        }
        if ea.degree_dl && self.deg_corr {
            let (okin, okout) = self.owner_degrees(owner);
            if leaving {
                dl += self
                    .owner_stats
                    .get_delta_deg_dl_change(r, -1, okin, okout, ea.degree_dl_kind);
            }
            if entering {
                dl += self
                    .owner_stats
                    .get_delta_deg_dl_change(nr, 1, okin, okout, ea.degree_dl_kind);
            }
        }
        if ea.edges_dl {
            dl += self.stats.get_delta_edges_dl(db, self.actual_b());
        }
        if ea.bfield && !self.bprior.is_empty() && db != 0 {
            let idx = |actual: usize| actual.saturating_sub(1).min(self.bprior.len() - 1);
            dl -= self.bprior[idx(add_signed(self.actual_b() as u64, db) as usize)]
                - self.bprior[idx(self.actual_b())];
        }
        ds + ea.beta_dl * dl
    }

    /// Full description length. Dense entropy is undefined for the
    /// overlapping model.
    pub fn entropy(&self, ea: &EntropyArgs) -> Result<f64, SbmError> {
        if ea.dense {
            return Err(SbmError::Unsupported(ErrorInfo::new(
                "dense-overlap",
                "dense entropy is undefined for overlapping states",
            )));
        }
        let directed = self.bg.is_directed();
        let mut s = 0.0;
        if ea.adjacency {
            for slot in self.bg.edges() {
                let (r, sb) = self.bg.endpoints(slot)?;
                s += eterm(r, sb, self.mrs[slot], directed, ea.exact);
            }
            for r in 0..self.num_blocks() {
                s += vterm(
                    self.mrp[r],
                    self.block_in_mass(r),
                    self.wr[r],
                    self.deg_corr,
                    directed,
                    ea.exact,
                );
            }
            if self.deg_corr && ea.deg_entropy {
                for owner in 0..self.he.num_nodes() {
                    let (okin, okout) = self.owner_degrees(owner);
                    s -= lgamma_fast(okout as usize + 1);
                    if directed {
                        s -= lgamma_fast(okin as usize + 1);
                    }
                }
            }
            if ea.multigraph {
                for edge in self.he.graph().edges() {
                    s += lgamma_fast(self.eweight[edge] as usize + 1);
                }
            }
        }
        let mut dl = 0.0;
        if ea.partition_dl {
            dl += self.stats.get_partition_dl();
        }
        if ea.degree_dl && self.deg_corr {
            dl += self.owner_stats.get_deg_dl(ea.degree_dl_kind);
        }
        if ea.edges_dl {
            dl += self.stats.get_edges_dl(self.actual_b());
        }
        if ea.bfield && !self.bprior.is_empty() {
            let idx = self.actual_b().saturating_sub(1).min(self.bprior.len() - 1);
            dl -= self.bprior[idx];
        }
        Ok(s + ea.beta_dl * dl)
    }

    // ------------------------------------------------------------------
    // proposals
    // ------------------------------------------------------------------

    /// Samples a proposal block for half-edge `h`, mirroring the
    /// non-overlapping proposal over the block adjacency.
    pub fn sample_block(&mut self, h: Vertex, c: f64, d: f64, rng: &mut RngHandle) -> Block {
        let r = self.b[h];
        if d > 0.0
            && self.candidate_blocks.len() < self.he.num_half_edges()
            && rng.uniform_f64() < d
        {
            if self.empty_blocks.is_empty() {
                let label = self.bclabel[r];
                return self.add_block(label);
            }
            return self.empty_blocks[rng.below(self.empty_blocks.len())];
        }
        let big_b = self.candidate_blocks.len();
        if c.is_infinite() {
            return self.candidate_blocks[rng.below(big_b)];
        }
        let opposite = self.he.opposite(h).expect("expansion edge");
        let t = self.b[opposite];
        let m_t = self.total_block_mass(t);
        let p_uniform = c * big_b as f64 / (m_t as f64 + c * big_b as f64);
        if rng.uniform_f64() < p_uniform {
            return self.candidate_blocks[rng.below(big_b)];
        }
        self.sample_block_neighbour(t, m_t, rng)
    }

    /// Draws `s` with probability `m_ts / m_t` from the block adjacency.
    fn sample_block_neighbour(&self, t: Block, m_t: u64, rng: &mut RngHandle) -> Block {
        let mut remaining = rng.below(m_t as usize) as i64;
        for entry in self.bg.out_neighbours(t) {
            remaining -= self.mrs[entry.edge] as i64;
            if remaining < 0 {
                return entry.neighbour;
            }
        }
        if self.bg.is_directed() {
            for entry in self.bg.in_neighbours(t) {
                remaining -= self.mrs[entry.edge] as i64;
                if remaining < 0 {
                    return entry.neighbour;
                }
            }
        }
        t
    }

    /// Exact proposal log-probability, mirroring
    /// [`crate::BlockState::get_move_prob`] for the single incident edge.
    pub fn get_move_prob(&self, h: Vertex, r: Block, s: Block, c: f64, d: f64, reverse: bool) -> f64 {
        let owner = self.he.owner(h);
        let leaving = !self.virtual_remove_size(h);
        let emptied_r = leaving && self.wr[r] == 1;
        let occupied_s = self.wr[s] == 0;
        let b_now = self.candidate_blocks.len();
        let (target, b_eff, n_empty, target_empty) = if reverse {
            let b_post = b_now - usize::from(emptied_r) + usize::from(occupied_s);
            let n_empty_post =
                self.empty_blocks.len() + usize::from(emptied_r) - usize::from(occupied_s);
            (r, b_post, n_empty_post, emptied_r)
        } else {
            (s, b_now, self.empty_blocks.len(), occupied_s)
        };
        let can_alloc = b_eff < self.he.num_half_edges();
        if target_empty {
            if d <= 0.0 || !can_alloc {
                return f64::NEG_INFINITY;
            }
            return d.ln() - (n_empty.max(1) as f64).ln();
        }
        let stage_rest = if d > 0.0 && can_alloc {
            (-d).ln_1p()
        } else {
            0.0
        };
        if c.is_infinite() {
            return stage_rest - (b_eff as f64).ln();
        }
        let edge = self
            .he
            .expansion_edge(self.he.source_edge(h))
            .expect("half-edge has an edge");
        let w = self.eweight[edge];
        let opposite = self.he.opposite(h).expect("expansion edge");
        let t = self.b[opposite];
        let mut m_t = self.total_block_mass(t) as i64;
        let mut m_ts = self.pair_mass_hat(t, target) as i64;
        if reverse {
            if t == r {
                m_t -= w as i64;
            } else if t == s {
                m_t += w as i64;
            }
            m_ts += self.pair_delta_hat(t, target);
        }
        let p = (m_ts as f64 + c) / (m_t as f64 + c * b_eff as f64);
        stage_rest + p.ln()
    }

    // ------------------------------------------------------------------
    // checks and copies
    // ------------------------------------------------------------------

    /// Fully independent copy.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Recomputes the pair masses from the half-edge labelling; `true`
    /// when every counter agrees.
    pub fn check_edge_counts(&self) -> bool {
        let directed = self.bg.is_directed();
        let mut expected: BTreeMap<(Block, Block), u64> = BTreeMap::new();
        let mut out_mass = vec![0u64; self.num_blocks()];
        let mut in_mass = vec![0u64; self.num_blocks()];
        let expansion = self.he.graph();
        for edge in expansion.edges() {
            let (hu, hv) = expansion.endpoints(edge).expect("alive edge");
            let w = self.eweight[edge];
            let (r, s) = (self.b[hu], self.b[hv]);
            let key = if directed || r <= s { (r, s) } else { (s, r) };
            let dm = if !directed && r == s { 2 * w } else { w };
            *expected.entry(key).or_insert(0) += dm;
            if directed {
                out_mass[r] += w;
                in_mass[s] += w;
            } else {
                out_mass[r] += w;
                out_mass[s] += w;
            }
        }
        let mut ok = true;
        let mut seen = 0usize;
        for slot in self.bg.edges() {
            let (r, s) = match self.bg.endpoints(slot) {
                Ok(pair) => pair,
                Err(_) => return false,
            };
            seen += 1;
            ok &= expected.get(&(r, s)).copied() == Some(self.mrs[slot]);
        }
        ok &= seen == expected.len();
        for r in 0..self.num_blocks() {
            ok &= self.mrp[r] == out_mass[r];
            if directed {
                ok &= self.mrm[r] == in_mass[r];
            }
        }
        ok
    }

    /// Recomputes owner representation counts; `true` when `w_r` and the
    /// empty/candidate split agree (the overlap invariant).
    pub fn check_node_counts(&self) -> bool {
        let mut expected = vec![0u64; self.num_blocks()];
        let mut seen: Vec<BTreeMap<Block, u64>> = vec![BTreeMap::new(); self.he.num_nodes()];
        for h in 0..self.he.num_half_edges() {
            *seen[self.he.owner(h)].entry(self.b[h]).or_insert(0) += 1;
        }
        for owner_map in &seen {
            for &r in owner_map.keys() {
                expected[r] += 1;
            }
        }
        let mut ok = self.wr == expected;
        ok &= seen == self.node_blocks;
        for r in 0..self.num_blocks() {
            let in_candidates = self
                .candidate_blocks
                .get(self.block_pos[r])
                .map(|&x| x == r)
                .unwrap_or(false);
            let in_empty = self
                .empty_blocks
                .get(self.block_pos[r])
                .map(|&x| x == r)
                .unwrap_or(false);
            ok &= (self.wr[r] > 0 && in_candidates) || (self.wr[r] == 0 && in_empty);
        }
        ok
    }
}

fn add_signed(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value + delta as u64
    } else {
        value - delta.unsigned_abs()
    }
}
