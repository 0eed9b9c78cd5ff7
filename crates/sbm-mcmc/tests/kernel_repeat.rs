use sbm_core::RngHandle;
use sbm_graph::gen_erdos_renyi;
use sbm_mcmc::{run, sweep, sweep_nested, SweepOpts};
use sbm_state::{BlockState, BlockStateOpts, EntropyArgs, NestedBlockState};

fn build_state(seed: u64) -> BlockState {
    let mut rng = RngHandle::from_seed(seed);
    let graph = gen_erdos_renyi(30, 0.15, false, &mut rng).unwrap();
    let b: Vec<usize> = (0..30).map(|_| rng.below(4)).collect();
    BlockState::new(graph, b, BlockStateOpts::default()).unwrap()
}

#[test]
fn sweeps_replay_identically_under_the_same_seed() {
    let opts = SweepOpts::default();

    let mut state_a = build_state(123);
    let mut rng_a = RngHandle::from_seed(7);
    let result_a = sweep(&mut state_a, &opts, &mut rng_a).unwrap();

    let mut state_b = build_state(123);
    let mut rng_b = RngHandle::from_seed(7);
    let result_b = sweep(&mut state_b, &opts, &mut rng_b).unwrap();

    assert_eq!(result_a, result_b);
    assert_eq!(state_a.partition_hash(), state_b.partition_hash());
}

#[test]
fn different_seeds_explore_differently() {
    let opts = SweepOpts {
        niter: 3,
        ..SweepOpts::default()
    };
    let mut state_a = build_state(123);
    let mut state_b = build_state(123);
    let mut rng_a = RngHandle::from_seed(1);
    let mut rng_b = RngHandle::from_seed(2);
    sweep(&mut state_a, &opts, &mut rng_a).unwrap();
    sweep(&mut state_b, &opts, &mut rng_b).unwrap();
    // Not a strict guarantee, but with three passes over thirty vertices a
    // collision would indicate a seeding bug.
    assert_ne!(state_a.partition_hash(), state_b.partition_hash());
}

#[test]
fn runs_replay_identically_from_the_master_seed() {
    let opts = SweepOpts::default();
    let mut state_a = build_state(42);
    let summary_a = run(&mut state_a, &opts, 8, 2024).unwrap();
    let mut state_b = build_state(42);
    let summary_b = run(&mut state_b, &opts, 8, 2024).unwrap();

    assert_eq!(summary_a, summary_b);
    assert_eq!(summary_a.recorder.samples().len(), 8);
    assert_eq!(summary_a.final_hash, state_a.partition_hash());
    // Entropy samples are the actual description lengths along the way.
    let last = summary_a.recorder.samples().last().unwrap();
    assert_eq!(last.entropy, summary_a.final_entropy);
    assert!(summary_a.recorder.best_entropy().unwrap() <= last.entropy + 1e-12);
}

#[test]
fn nested_sweeps_preserve_the_hierarchy_invariants() {
    let base = build_state(321);
    let upper: Vec<usize> = (0..base.num_blocks()).map(|r| r % 2).collect();
    let mut nested =
        NestedBlockState::new(base, &[upper], &[EntropyArgs::default()]).unwrap();
    let mut rng = RngHandle::from_seed(11);
    let opts = SweepOpts {
        niter: 5,
        ..SweepOpts::default()
    };
    let result = sweep_nested(&mut nested, &opts, &mut rng).unwrap();
    assert!(result.proposed > 0);
    assert!(nested.check_consistency());

    // Replaying with the same seeds reproduces the whole stack.
    let base = build_state(321);
    let upper: Vec<usize> = (0..base.num_blocks()).map(|r| r % 2).collect();
    let mut replay = NestedBlockState::new(base, &[upper], &[EntropyArgs::default()]).unwrap();
    let mut rng = RngHandle::from_seed(11);
    let replay_result = sweep_nested(&mut replay, &opts, &mut rng).unwrap();
    assert_eq!(result, replay_result);
    assert_eq!(nested.partition_hash(), replay.partition_hash());
}
