use sbm_core::rng::derive_substream_seed;

const SWEEP_STREAM: u64 = 0x53_57_45_45_50; // "SWEEP"
const EXCHANGE_STREAM: u64 = 0x45_58_43_48; // "EXCH"

/// Seed for the RNG driving one sweep of a run.
///
/// Seeds are derived, never shared: replaying a run with the same master
/// seed reproduces every draw, and sweeps may be re-executed in isolation.
pub fn sweep_seed(master_seed: u64, sweep: usize) -> u64 {
    derive_substream_seed(
        derive_substream_seed(master_seed, SWEEP_STREAM),
        sweep as u64,
    )
}

/// Seed for auxiliary draws outside the sweep loop (initial shuffles,
/// diagnostics).
pub fn auxiliary_seed(master_seed: u64, slot: u64) -> u64 {
    derive_substream_seed(
        derive_substream_seed(master_seed, EXCHANGE_STREAM),
        slot,
    )
}
