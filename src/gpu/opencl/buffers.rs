// src/gpu/opencl/buffers.rs - OpenCL Buffer Management for Argon2d Mining
// Tree location: ./src/gpu/opencl/buffers.rs

//! Device buffers owned by one worker lane
//!
//! # Version History
//! - 0.1.0: Fixed three-buffer set sized once from the resource plan
//! - 0.1.1: Distinct allocation failure for the blocks buffer
//!
//! # Buffer Types
//! - **blocks**: `nonces_per_batch * 512 * 1024` bytes of Argon2 memory (largest buffer)
//! - **initial_seed**: 256-byte H0 input rewritten every round
//! - **found_nonce**: single u32 result slot, 0 = nothing found

use ocl::{Buffer, Queue};
use ocl::flags::MemFlags;
use crate::{BackendResultExt, ClargonError, Result};
use crate::gpu::{INITIAL_SEED_SIZE, NONCE_FOOTPRINT};
use super::platform::DeviceInfo;

/// The three buffers bound to a worker's kernels
#[derive(Debug)]
pub struct WorkerBuffers {
    /// Per-nonce Argon2 memory
    pub blocks: Buffer<u8>,
    /// Initial seed
    pub initial_seed: Buffer<u8>,
    /// Found nonce slot
    pub found_nonce: Buffer<u32>,
}

impl WorkerBuffers {
    /// Allocate all buffers for `nonces_per_batch` on `queue`
    pub fn allocate(queue: &Queue, device: &DeviceInfo, nonces_per_batch: u32) -> Result<Self> {
        let blocks_bytes = nonces_per_batch as u64 * NONCE_FOOTPRINT;

        if blocks_bytes > device.max_mem_alloc_size {
            // NVIDIA drivers accept blocks above the reported single allocation limit
            tracing::debug!("blocks buffer {:.1}MB exceeds reported max allocation {:.1}MB on device #{}",
                blocks_bytes as f64 / (1024.0 * 1024.0),
                device.max_mem_alloc_size as f64 / (1024.0 * 1024.0),
                device.global_index);
        }

        let blocks_len = usize::try_from(blocks_bytes).map_err(|_| ClargonError::AllocationFailed {
            device_index: device.global_index,
            buffer: "blocks",
            requested_bytes: blocks_bytes,
            reason: "size does not fit in host address space".to_string(),
        })?;

        tracing::debug!("Creating buffer blocks: {} bytes for {} nonces", blocks_len, nonces_per_batch);

        let blocks = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(blocks_len)
            .build()
            .map_err(|e| {
                tracing::error!("❌ Failed to allocate {:.1}MB blocks buffer on device #{}: {}",
                    blocks_bytes as f64 / (1024.0 * 1024.0), device.global_index, e);
                ClargonError::AllocationFailed {
                    device_index: device.global_index,
                    buffer: "blocks",
                    requested_bytes: blocks_bytes,
                    reason: e.to_string(),
                }
            })?;

        let initial_seed = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(INITIAL_SEED_SIZE)
            .build()
            .backend("clCreateBuffer")?;

        let found_nonce = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(1)
            .fill_val(0u32)
            .build()
            .backend("clCreateBuffer")?;

        tracing::debug!("✅ Buffers allocated on device #{}", device.global_index);

        Ok(Self { blocks, initial_seed, found_nonce })
    }

    /// Total device bytes held by this set
    pub fn total_bytes(&self) -> u64 {
        self.blocks.len() as u64 + self.initial_seed.len() as u64 + 4
    }
}
