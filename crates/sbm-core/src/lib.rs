#![deny(missing_docs)]

//! Shared types, structured errors, deterministic RNG and numeric
//! primitives for the SBM inference engine.

pub mod errors;
pub mod numeric;
pub mod partitions;
pub mod rng;

pub use errors::{ErrorInfo, SbmError};
pub use numeric::{init_cache, lbinom, lbinom_fast, lgamma, lgamma_fast, log1p_exp, log_sum, safelog, xlogx};
pub use partitions::log_q;
pub use rng::{derive_substream_seed, RngHandle};

/// Index of a vertex within a multigraph.
///
/// Vertices are dense indices into the per-vertex property vectors held by
/// the owning state; they are never recycled within one graph.
pub type Vertex = usize;

/// Label of a block (group) in a partition.
///
/// Block labels index the block multigraph's vertices and every per-block
/// counter vector.
pub type Block = usize;

/// Slot index of an edge within a multigraph.
///
/// Edge slots are recycled through a free list, so an `EdgeIx` is only
/// meaningful while the edge is alive.
pub type EdgeIx = usize;

/// Sentinel block label used to request auto-allocation of a fresh block.
pub const NULL_BLOCK: Block = usize::MAX;
