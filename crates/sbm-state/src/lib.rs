#![deny(missing_docs)]

//! Authoritative SBM inference state: block assignments, the contracted
//! block multigraph, incremental move deltas, description-length terms, and
//! the nested (coupled) hierarchy.

mod block_state;
mod egroups;
mod emat;
mod entropy;
mod hierarchy;
mod mentries;
mod overlap;
mod pstats;
mod recs;

pub use block_state::{BlockState, BlockStateOpts, MoveLog};
pub use egroups::{DynamicSampler, EGroups};
pub use emat::BlockPairIndex;
pub use entropy::{DegreeDlKind, EntropyArgs};
pub use hierarchy::NestedBlockState;
pub use mentries::{MEntries, RecDelta};
pub use overlap::{OverlapBlockState, OverlapOpts};
pub use pstats::PartitionStats;
pub use recs::{RecParams, RecType};
