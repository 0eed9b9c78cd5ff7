#![allow(dead_code)]

use sbm_core::RngHandle;
use sbm_graph::{gen_erdos_renyi, Multigraph};
use sbm_state::{BlockState, BlockStateOpts};

/// The triangle graph `{(0,1), (1,2), (2,0)}`.
pub fn triangle() -> Multigraph {
    let mut graph = Multigraph::with_vertices(3, false);
    graph.add_edge(0, 1).unwrap();
    graph.add_edge(1, 2).unwrap();
    graph.add_edge(2, 0).unwrap();
    graph
}

/// Triangle state with the assignment `[0, 0, 1]`.
pub fn triangle_state(deg_corr: bool) -> BlockState {
    BlockState::new(
        triangle(),
        vec![0, 0, 1],
        BlockStateOpts {
            deg_corr,
            ..BlockStateOpts::default()
        },
    )
    .unwrap()
}

/// Random state over an Erdős–Rényi graph with a random assignment into
/// `num_blocks` labels.
pub fn random_state(
    seed: u64,
    n: usize,
    p: f64,
    num_blocks: usize,
    directed: bool,
    deg_corr: bool,
) -> BlockState {
    let mut rng = RngHandle::from_seed(seed);
    let graph = gen_erdos_renyi(n, p, directed, &mut rng).unwrap();
    let b: Vec<usize> = (0..n).map(|_| rng.below(num_blocks)).collect();
    BlockState::new(
        graph,
        b,
        BlockStateOpts {
            deg_corr,
            ..BlockStateOpts::default()
        },
    )
    .unwrap()
}

/// `new - old` entropy difference of applying one move on a copy.
pub fn applied_delta(
    state: &BlockState,
    v: usize,
    nr: usize,
    ea: &sbm_state::EntropyArgs,
) -> f64 {
    let before = state.entropy(ea).unwrap();
    let mut copy = state.deep_copy();
    copy.move_vertex(v, nr).unwrap();
    let after = copy.entropy(ea).unwrap();
    after - before
}
