mod common;

use common::triangle_state;
use sbm_core::RngHandle;

#[test]
fn forced_allocation_proposes_the_fresh_block() {
    // With d = 1 and no empty block allocated, the sampler must mint block
    // 2 for the triangle state.
    let mut state = triangle_state(false);
    let mut rng = RngHandle::from_seed(1);
    let proposal = state.sample_block(0, 1.0, 1.0, &mut rng);
    assert_eq!(proposal, 2);
    state.move_vertex(0, proposal).unwrap();
    let weights: Vec<u64> = (0..3).map(|r| state.block_weight(r)).collect();
    assert_eq!(weights, vec![1, 1, 1]);
    // All three blocks are pairwise joined by single edges.
    assert_eq!(state.pair_mass(0, 1), 1);
    assert_eq!(state.pair_mass(0, 2), 1);
    assert_eq!(state.pair_mass(1, 2), 1);
    assert_eq!(state.pair_mass(0, 0), 0);
    assert!(state.check_edge_counts());
}

#[test]
fn emptied_blocks_move_to_the_empty_set() {
    let mut state = triangle_state(false);
    state.move_vertex(2, 0).unwrap();
    assert!(state.empty_blocks().contains(&1));
    assert!(!state.candidate_blocks().contains(&1));
    assert_eq!(state.block_weight(1), 0);
    assert_eq!(state.actual_b(), 1);
    // Reoccupying flips the sets back.
    state.move_vertex(2, 1).unwrap();
    assert!(!state.empty_blocks().contains(&1));
    assert!(state.candidate_blocks().contains(&1));
    assert!(state.check_node_counts());
}

#[test]
fn zero_weight_vertices_do_not_move_counters() {
    let mut state = triangle_state(false);
    state.set_vertex_weight(2, 0);
    // The vertex was registered with weight 1; detach it first, then the
    // zero-weight removal must be a no-op.
    let log = state.remove_partition_node(2);
    assert!(log.edge_deltas.is_empty());
    assert!(log.emptied.is_none());
}
