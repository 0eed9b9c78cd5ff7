mod common;

use common::triangle;
use sbm_core::SbmError;
use sbm_state::{BlockState, BlockStateOpts, EntropyArgs};

fn constrained_state() -> BlockState {
    BlockState::new(
        triangle(),
        vec![0, 0, 1],
        BlockStateOpts {
            bclabel: Some(vec![0, 1]),
            ..BlockStateOpts::default()
        },
    )
    .unwrap()
}

#[test]
fn moves_across_colours_fail() {
    let mut state = constrained_state();
    let err = state.move_vertex(0, 1).unwrap_err();
    assert!(matches!(err, SbmError::Constraint(_)));
    // The state is untouched by the refused move.
    assert_eq!(state.block_of(0), 0);
    assert!(state.check_edge_counts());
}

#[test]
fn virtual_moves_across_colours_are_infinitely_expensive() {
    let mut state = constrained_state();
    let ds = state.virtual_move(0, 0, 1, &EntropyArgs::adjacency_exact());
    assert_eq!(ds, f64::INFINITY);
}

#[test]
fn moves_within_a_colour_still_work() {
    let mut state = constrained_state();
    // Vertex 1 shares block 0's colour with nothing else; moving it to a
    // fresh block of the same colour is fine.
    let fresh = state.add_block(0);
    state.move_vertex(1, fresh).unwrap();
    assert_eq!(state.block_of(1), fresh);
}
