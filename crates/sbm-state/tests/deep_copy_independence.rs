mod common;

use common::random_state;
use sbm_state::EntropyArgs;

#[test]
fn mutating_the_copy_leaves_the_original_untouched() {
    let state = random_state(13, 12, 0.3, 3, false, true);
    let hash_before = state.partition_hash();
    let entropy_before = state.entropy(&EntropyArgs::default()).unwrap();

    let mut copy = state.deep_copy();
    copy.move_vertex(0, (copy.block_of(0) + 1) % 3).unwrap();
    copy.move_vertex(5, (copy.block_of(5) + 2) % 3).unwrap();

    assert_ne!(copy.partition_hash(), hash_before);
    assert_eq!(state.partition_hash(), hash_before);
    let entropy_after = state.entropy(&EntropyArgs::default()).unwrap();
    assert_eq!(entropy_before.to_bits(), entropy_after.to_bits());
    assert!(copy.check_edge_counts());
    assert!(copy.check_node_counts());
    assert!(state.check_edge_counts());
}

#[test]
fn copies_share_no_counter_storage() {
    let state = random_state(14, 10, 0.4, 2, true, false);
    let mut copy = state.deep_copy();
    for v in 0..10 {
        copy.move_vertex(v, 0).unwrap();
    }
    assert_eq!(copy.actual_b(), 1);
    assert_ne!(state.actual_b(), 1);
    assert!(state.check_edge_counts());
    assert!(state.check_node_counts());
}
