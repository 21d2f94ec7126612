// src/gpu/mod.rs - GPU Module Organization and Public API
// Tree location: ./src/gpu/mod.rs

//! GPU mining module for Clargon
//!
//! Device catalog and kernel plumbing live in [`opencl`]; the pure sizing
//! policy lives in [`budget`]. [`Miner`] aggregates the workers built for
//! every selected device and [`MiningDriver`] runs them round after round.

/// Per-device memory budget and lane planning
pub mod budget;

/// Async round loop over all workers
pub mod driver;

/// Moving-average hashrate reporting
pub mod hashrate;

/// Worker construction across all selected devices
pub mod miner;

/// OpenCL backend: device catalog, program builder, workers
pub mod opencl;

/// 256-byte initial seed layout
pub mod seed;

pub use budget::{DeviceSelection, ResourcePlan};
pub use driver::{MiningDriver, Share};
pub use hashrate::HashrateMeter;
pub use miner::{InitOptions, Miner};
pub use seed::InitialSeed;

/// Size of one Argon2 memory block in bytes
pub const BLOCK_SIZE: usize = 1024;
/// Memory cost in blocks per nonce
pub const MEMORY_COST: u32 = 512;
/// Device memory used by one nonce
pub const NONCE_FOOTPRINT: u64 = MEMORY_COST as u64 * BLOCK_SIZE as u64;
/// Size of the initial seed buffer in bytes
pub const INITIAL_SEED_SIZE: usize = 256;
/// Threads cooperating on one Argon2 lane
pub const THREADS_PER_LANE: usize = 32;
/// Number of distinct 32-bit nonces
pub const MAX_NONCE: u64 = 1 << 32;

pub(crate) const ONE_GB: u64 = 0x4000_0000;
pub(crate) const ONE_MB: u64 = 0x10_0000;

/// Check OpenCL platform availability
pub fn opencl_available() -> bool {
    matches!(ocl::core::get_platform_ids(), Ok(ids) if !ids.is_empty())
}
