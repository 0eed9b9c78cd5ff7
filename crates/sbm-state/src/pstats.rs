use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sbm_core::numeric::{lbinom_fast, lgamma_fast, safelog, xlogx};
use sbm_core::partitions::log_q;
use sbm_core::Block;

use crate::entropy::DegreeDlKind;

/// Rolling counters for one constraint class of the partition.
///
/// The counters support exact delta queries for the partition, degree and
/// edge-count description lengths; none of the delta queries mutates state,
/// and each one equals `new - old` of the corresponding static term for any
/// legal move.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionStats {
    directed: bool,
    deg_corr: bool,
    n: u64,
    e: u64,
    nr: BTreeMap<Block, u64>,
    ep: BTreeMap<Block, u64>,
    em: BTreeMap<Block, u64>,
    hist: BTreeMap<Block, BTreeMap<(u64, u64), u64>>,
}

impl PartitionStats {
    /// Creates empty counters.
    pub fn new(directed: bool, deg_corr: bool) -> Self {
        Self {
            directed,
            deg_corr,
            ..Self::default()
        }
    }

    /// Registers vertex mass `vw` with weighted degrees `(kin, kout)` in
    /// block `r`. Undirected callers pass the total degree in both slots.
    pub fn add_vertex(&mut self, r: Block, vw: u64, kin: u64, kout: u64) {
        if vw == 0 {
            return;
        }
        self.n += vw;
        *self.nr.entry(r).or_insert(0) += vw;
        *self.ep.entry(r).or_insert(0) += vw * kout;
        if self.directed {
            *self.em.entry(r).or_insert(0) += vw * kin;
        }
        if self.deg_corr {
            *self
                .hist
                .entry(r)
                .or_default()
                .entry((kin, kout))
                .or_insert(0) += vw;
        }
    }

    /// Removes vertex mass registered by [`PartitionStats::add_vertex`].
    pub fn remove_vertex(&mut self, r: Block, vw: u64, kin: u64, kout: u64) {
        if vw == 0 {
            return;
        }
        self.n -= vw;
        decrement(&mut self.nr, r, vw);
        decrement(&mut self.ep, r, vw * kout);
        if self.directed {
            decrement(&mut self.em, r, vw * kin);
        }
        if self.deg_corr {
            if let Some(block_hist) = self.hist.get_mut(&r) {
                decrement(block_hist, (kin, kout), vw);
                if block_hist.is_empty() {
                    self.hist.remove(&r);
                }
            }
        }
    }

    /// Accounts for an edge-mass change attributed to this class.
    pub fn change_e(&mut self, dm: i64) {
        self.e = add_signed(self.e, dm);
    }

    /// Number of non-empty blocks in this class.
    pub fn get_actual_b(&self) -> usize {
        self.nr.len()
    }

    /// Total vertex mass of the class.
    pub fn total_n(&self) -> u64 {
        self.n
    }

    /// Total edge mass attributed to the class.
    pub fn total_e(&self) -> u64 {
        self.e
    }

    fn nr_of(&self, r: Block) -> u64 {
        self.nr.get(&r).copied().unwrap_or(0)
    }

    fn ep_of(&self, r: Block) -> u64 {
        self.ep.get(&r).copied().unwrap_or(0)
    }

    fn em_of(&self, r: Block) -> u64 {
        self.em.get(&r).copied().unwrap_or(0)
    }

    fn hist_of(&self, r: Block, key: (u64, u64)) -> u64 {
        self.hist
            .get(&r)
            .and_then(|block_hist| block_hist.get(&key))
            .copied()
            .unwrap_or(0)
    }

    /// Static partition description length of this class.
    pub fn get_partition_dl(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let b = self.get_actual_b();
        let mut dl = lbinom_fast(self.n as usize - 1, b.saturating_sub(1))
            + lgamma_fast(self.n as usize + 1)
            + safelog(self.n as f64);
        for &mass in self.nr.values() {
            dl -= lgamma_fast(mass as usize + 1);
        }
        dl
    }

    /// Static degree-sequence description length of this class.
    pub fn get_deg_dl(&self, kind: DegreeDlKind) -> f64 {
        if !self.deg_corr {
            return 0.0;
        }
        let mut dl = 0.0;
        for (&r, &mass) in &self.nr {
            dl += self.deg_dl_block(kind, r, mass);
        }
        dl
    }

    fn deg_dl_block(&self, kind: DegreeDlKind, r: Block, mass: u64) -> f64 {
        let ep = self.ep_of(r);
        let em = self.em_of(r);
        match kind {
            DegreeDlKind::Uniform => {
                let mut dl = lbinom_fast((mass + ep) as usize - 1, ep as usize);
                if self.directed {
                    dl += lbinom_fast((mass + em) as usize - 1, em as usize);
                }
                dl
            }
            DegreeDlKind::Distributed => {
                let mut dl = log_q(ep as usize, mass as usize);
                if self.directed {
                    dl += log_q(em as usize, mass as usize);
                }
                dl += lgamma_fast(mass as usize + 1);
                if let Some(block_hist) = self.hist.get(&r) {
                    for &count in block_hist.values() {
                        dl -= lgamma_fast(count as usize + 1);
                    }
                }
                dl
            }
            DegreeDlKind::Entropy => {
                let mut dl = xlogx(mass as f64);
                if let Some(block_hist) = self.hist.get(&r) {
                    for &count in block_hist.values() {
                        dl -= xlogx(count as f64);
                    }
                }
                dl
            }
        }
    }

    /// Static number-of-edges description length, given the occupied block
    /// count to price against.
    pub fn get_edges_dl(&self, actual_b: usize) -> f64 {
        let nb = if self.directed {
            actual_b * actual_b
        } else {
            actual_b * (actual_b + 1) / 2
        };
        if nb + self.e as usize == 0 {
            return 0.0;
        }
        lbinom_fast(nb + self.e as usize - 1, self.e as usize)
    }

    /// Delta of the partition description length for moving mass `vw` from
    /// block `r` to block `nr`.
    pub fn get_delta_partition_dl(&self, r: Block, nr: Block, vw: u64) -> f64 {
        if r == nr || vw == 0 {
            return 0.0;
        }
        let mass_r = self.nr_of(r);
        let mass_nr = self.nr_of(nr);
        let b = self.get_actual_b();
        let b_after = b - usize::from(mass_r == vw) + usize::from(mass_nr == 0);
        let mut delta = 0.0;
        if b_after != b {
            delta += lbinom_fast(self.n as usize - 1, b_after.saturating_sub(1))
                - lbinom_fast(self.n as usize - 1, b.saturating_sub(1));
        }
        delta += lgamma_fast(mass_r as usize + 1) - lgamma_fast((mass_r - vw) as usize + 1);
        delta += lgamma_fast(mass_nr as usize + 1) - lgamma_fast((mass_nr + vw) as usize + 1);
        delta
    }

    /// Delta of the partition description length for adding (`dvw > 0`) or
    /// removing (`dvw < 0`) vertex mass at block `r`, changing the class
    /// total. Used when a coupled level gains or loses a node.
    pub fn get_delta_partition_dl_change(&self, r: Block, dvw: i64) -> f64 {
        if dvw == 0 {
            return 0.0;
        }
        let mass_r = self.nr_of(r);
        let n_new = add_signed(self.n, dvw);
        let mass_new = add_signed(mass_r, dvw);
        let b = self.get_actual_b();
        let b_after = b - usize::from(mass_new == 0 && mass_r > 0)
            + usize::from(mass_r == 0 && mass_new > 0);
        let old = partition_dl_parts(self.n, b, mass_r);
        let new = partition_dl_parts(n_new, b_after, mass_new);
        new - old
    }

    /// Delta of the degree-sequence description length for moving mass `vw`
    /// of degrees `(kin, kout)` from `r` to `nr`.
    pub fn get_delta_deg_dl(
        &self,
        r: Block,
        nr: Block,
        vw: u64,
        kin: u64,
        kout: u64,
        kind: DegreeDlKind,
    ) -> f64 {
        if !self.deg_corr || r == nr || vw == 0 {
            return 0.0;
        }
        self.delta_deg_block(r, -(vw as i64), kin, kout, kind)
            + self.delta_deg_block(nr, vw as i64, kin, kout, kind)
    }

    /// Delta of the degree-sequence description length for adding or
    /// removing vertex mass at block `r` outright.
    pub fn get_delta_deg_dl_change(
        &self,
        r: Block,
        dvw: i64,
        kin: u64,
        kout: u64,
        kind: DegreeDlKind,
    ) -> f64 {
        if !self.deg_corr || dvw == 0 {
            return 0.0;
        }
        self.delta_deg_block(r, dvw, kin, kout, kind)
    }

    fn delta_deg_block(&self, r: Block, dvw: i64, kin: u64, kout: u64, kind: DegreeDlKind) -> f64 {
        let mass = self.nr_of(r);
        let ep = self.ep_of(r);
        let em = self.em_of(r);
        let mass_new = add_signed(mass, dvw);
        let ep_new = add_signed(ep, dvw * kout as i64);
        let em_new = add_signed(em, dvw * kin as i64);
        match kind {
            DegreeDlKind::Uniform => {
                let mut delta = uniform_term(mass_new, ep_new) - uniform_term(mass, ep);
                if self.directed {
                    delta += uniform_term(mass_new, em_new) - uniform_term(mass, em);
                }
                delta
            }
            DegreeDlKind::Distributed => {
                let h = self.hist_of(r, (kin, kout));
                let h_new = add_signed(h, dvw);
                let mut delta = log_q(ep_new as usize, mass_new as usize)
                    - log_q(ep as usize, mass as usize);
                if self.directed {
                    delta +=
                        log_q(em_new as usize, mass_new as usize) - log_q(em as usize, mass as usize);
                }
                delta += lgamma_fast(mass_new as usize + 1) - lgamma_fast(mass as usize + 1);
                delta += lgamma_fast(h as usize + 1) - lgamma_fast(h_new as usize + 1);
                delta
            }
            DegreeDlKind::Entropy => {
                let h = self.hist_of(r, (kin, kout));
                let h_new = add_signed(h, dvw);
                xlogx(mass_new as f64) - xlogx(mass as f64) - (xlogx(h_new as f64) - xlogx(h as f64))
            }
        }
    }

    /// Delta of the number-of-edges description length when the occupied
    /// block count changes by `db`.
    pub fn get_delta_edges_dl(&self, db: i64, actual_b: usize) -> f64 {
        if db == 0 {
            return 0.0;
        }
        let b_after = add_signed(actual_b as u64, db) as usize;
        self.get_edges_dl(b_after) - self.get_edges_dl(actual_b)
    }
}

fn uniform_term(mass: u64, edge_mass: u64) -> f64 {
    if mass + edge_mass == 0 {
        return 0.0;
    }
    lbinom_fast((mass + edge_mass) as usize - 1, edge_mass as usize)
}

fn partition_dl_parts(n: u64, b: usize, mass_r: u64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    lbinom_fast(n as usize - 1, b.saturating_sub(1)) + lgamma_fast(n as usize + 1)
        + safelog(n as f64)
        - lgamma_fast(mass_r as usize + 1)
}

fn decrement<K: Ord>(map: &mut BTreeMap<K, u64>, key: K, amount: u64) {
    if let Some(value) = map.get_mut(&key) {
        *value -= amount;
        if *value == 0 {
            map.remove(&key);
        }
    }
}

fn add_signed(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value + delta as u64
    } else {
        value - delta.unsigned_abs()
    }
}
