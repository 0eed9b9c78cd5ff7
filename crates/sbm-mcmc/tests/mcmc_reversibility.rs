use sbm_core::RngHandle;
use sbm_graph::gen_erdos_renyi;
use sbm_mcmc::{sweep, SweepOpts};
use sbm_state::{BlockState, BlockStateOpts, EntropyArgs};

fn er_state(seed: u64, n: usize, blocks: usize) -> BlockState {
    let mut rng = RngHandle::from_seed(seed);
    let graph = gen_erdos_renyi(n, 0.12, false, &mut rng).unwrap();
    let b: Vec<usize> = (0..n).map(|_| rng.below(blocks)).collect();
    BlockState::new(graph, b, BlockStateOpts::default()).unwrap()
}

#[test]
fn acceptance_ratios_are_coherent() {
    // Manual Metropolis-Hastings over many proposals: the acceptance
    // probability built from the virtual delta and the exact forward and
    // reverse proposal probabilities must always be a valid probability,
    // and the accumulated accepted deltas must track the true entropy.
    let mut state = er_state(50, 50, 5);
    let ea = EntropyArgs {
        adjacency: true,
        exact: true,
        multigraph: true,
        partition_dl: true,
        edges_dl: true,
        ..EntropyArgs::none()
    };
    let (c, d) = (1.0, 0.01);
    let mut rng = RngHandle::from_seed(51);
    let start = state.entropy(&ea).unwrap();
    let mut accumulated = 0.0;
    for step in 0..10_000 {
        let v = rng.below(50);
        let r = state.block_of(v);
        let s = state.sample_block(v, c, d, &mut rng);
        if s == r {
            continue;
        }
        let ds = state.virtual_move(v, r, s, &ea);
        if !ds.is_finite() {
            continue;
        }
        let forward = state.get_move_prob(v, r, s, c, d, false);
        let reverse = state.get_move_prob(v, r, s, c, d, true);
        assert!(forward.is_finite(), "step {step}: forward prob underflow");
        assert!(reverse.is_finite(), "step {step}: reverse prob underflow");
        let acceptance = (-ds + reverse - forward).exp().min(1.0);
        assert!((0.0..=1.0).contains(&acceptance), "step {step}: {acceptance}");
        if rng.uniform_f64() < acceptance {
            state.move_vertex(v, s).unwrap();
            accumulated += ds;
        }
    }
    let end = state.entropy(&ea).unwrap();
    assert!(
        (end - start - accumulated).abs() < 1e-6 * end.abs().max(1.0),
        "accumulated {accumulated} vs entropy change {}",
        end - start
    );
    assert!(state.check_edge_counts());
    assert!(state.check_node_counts());
}

#[test]
fn sweeps_descend_on_planted_structure() {
    // Two planted communities joined sparsely, swept from the planted
    // partition.
    let mut rng = RngHandle::from_seed(60);
    let n = 40;
    let b: Vec<usize> = (0..n).map(|v| usize::from(v >= n / 2)).collect();
    let graph = sbm_graph::gen_planted_partition(&b, 0.25, 0.02, false, &mut rng).unwrap();
    let mut state = BlockState::new(graph, b, BlockStateOpts::default()).unwrap();
    let ea = EntropyArgs {
        adjacency: true,
        exact: true,
        multigraph: true,
        partition_dl: true,
        edges_dl: true,
        ..EntropyArgs::none()
    };
    let opts = SweepOpts {
        c: 0.5,
        d: 0.01,
        beta: 5.0,
        niter: 10,
        entropy_args: ea,
    };
    let before = state.entropy(&ea).unwrap();
    let result = sweep(&mut state, &opts, &mut rng).unwrap();
    let after = state.entropy(&ea).unwrap();
    assert!(result.proposed > 0);
    assert!((after - before - result.delta_s).abs() < 1e-6 * after.abs().max(1.0));
    assert!(state.check_edge_counts());
    assert!(state.check_node_counts());
}
