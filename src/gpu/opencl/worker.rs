// src/gpu/opencl/worker.rs - OpenCL Worker Lane and Mining Pipeline
// Tree location: ./src/gpu/opencl/worker.rs

//! One worker lane: queue, buffers, bound kernels and launch geometry
//!
//! A batch runs three kernels back to back on the lane's queue and then
//! blocks on a 4-byte read of the found nonce slot, which is the only host
//! synchronization point of the pipeline.
//!
//! # Version History
//! - 0.1.0: Single worker per device with fixed launch geometry
//! - 0.1.1: Lanes sharing one compiled program per device
//! - 0.1.2: Reset of the found slot after a hit, per-stage profiling

use ocl::{Kernel, Queue, SpatialDims};
use std::sync::Arc;
use crate::{BackendResultExt, Result};
use crate::gpu::{InitialSeed, MEMORY_COST, THREADS_PER_LANE};
use super::buffers::WorkerBuffers;
use super::kernels::{CompiledProgram, LaneLayout, KERNEL_ARGON2, KERNEL_GET_NONCE, KERNEL_INIT_MEMORY};
use super::platform::DeviceInfo;

#[cfg(feature = "profile")]
use ocl::EventList;

/// Work-group width of `init_memory` along the nonce axis
pub const INIT_GROUP_WIDTH: usize = 128;
/// Work-group size of `get_nonce`
pub const GET_NONCE_GROUP_SIZE: usize = 256;

// Profiling macros for per-stage timing
macro_rules! kernel_enq {
    ($kernel:expr, $event_list:expr, $names:expr, $msg:expr) => {
        #[cfg(feature = "profile")]
        {
            unsafe { $kernel.cmd().enew(&mut $event_list).enq() }.backend("clEnqueueNDRangeKernel")?;
            $names.push($msg);
        }
        #[cfg(not(feature = "profile"))]
        {
            unsafe { $kernel.cmd().enq() }.backend("clEnqueueNDRangeKernel")?;
        }
    };
}

macro_rules! kernel_builder {
    ($program:expr, $queue:expr, $kernel:expr, $global_work_size:expr) => {
        Kernel::builder()
            .name($kernel)
            .program($program.program())
            .queue($queue.clone())
            .global_work_size($global_work_size)
    };
}

/// Global and local sizes of the three kernels, fixed per worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    /// `init_memory` global size: nonces x jobs per block
    pub init_memory_global: [usize; 2],
    /// `init_memory` local size, `None` lets the driver choose
    pub init_memory_local: Option<[usize; 2]>,
    /// `argon2` global size: lane width x nonces
    pub argon2_global: [usize; 2],
    /// `argon2` local size: lane width x jobs per block
    pub argon2_local: [usize; 2],
    /// `get_nonce` global size: nonces
    pub get_nonce_global: usize,
    /// `get_nonce` local size, `None` lets the driver choose
    pub get_nonce_local: Option<usize>,
}

impl LaunchGeometry {
    /// Geometry for a batch of `nonces_per_batch` with `layout`
    ///
    /// Fixed group widths are only requested when they divide the batch;
    /// OpenCL 1.x rejects a global size that is not a multiple of the local size.
    pub fn new(nonces_per_batch: u32, layout: &LaneLayout) -> Self {
        let nonces = nonces_per_batch as usize;
        let jobs = layout.jobs_per_block as usize;

        Self {
            init_memory_global: [nonces, jobs],
            init_memory_local: (nonces % INIT_GROUP_WIDTH == 0).then_some([INIT_GROUP_WIDTH, jobs]),
            argon2_global: [THREADS_PER_LANE, nonces],
            argon2_local: [THREADS_PER_LANE, jobs],
            get_nonce_global: nonces,
            get_nonce_local: (nonces % GET_NONCE_GROUP_SIZE == 0).then_some(GET_NONCE_GROUP_SIZE),
        }
    }
}

/// One mining lane on one device
#[derive(Debug)]
pub struct Worker {
    program: Arc<CompiledProgram>,
    info: DeviceInfo,
    lane_index: u32,
    nonces_per_batch: u32,
    geometry: LaunchGeometry,
    queue: Queue,
    buffers: WorkerBuffers,
    init_memory: Kernel,
    argon2: Kernel,
    get_nonce: Kernel,
}

impl Worker {
    /// Create the queue, buffers and kernels for one lane
    ///
    /// Every argument that stays the same across rounds is bound here;
    /// `start_nonce` and `target` get a placeholder and are set per batch.
    pub fn new(
        program: Arc<CompiledProgram>,
        info: DeviceInfo,
        lane_index: u32,
        nonces_per_batch: u32,
    ) -> Result<Self> {
        let layout = program.layout();
        let geometry = LaunchGeometry::new(nonces_per_batch, &layout);

        tracing::debug!("🔧 Building worker lane {} on device #{} ({} nonces per batch)",
            lane_index, info.global_index, nonces_per_batch);

        let queue = Queue::new(program.context(), program.device(), queue_properties())
            .backend("clCreateCommandQueue")?;

        let buffers = WorkerBuffers::allocate(&queue, &info, nonces_per_batch)?;

        let mut init_memory = kernel_builder!(program, queue, KERNEL_INIT_MEMORY,
                SpatialDims::Two(geometry.init_memory_global[0], geometry.init_memory_global[1]))
            .arg(&buffers.blocks)
            .arg(&buffers.initial_seed)
            .arg_named("start_nonce", 0u32)
            .build()
            .backend("clCreateKernel")?;
        if let Some([x, y]) = geometry.init_memory_local {
            init_memory.set_default_local_work_size(SpatialDims::Two(x, y));
        }

        let mut argon2 = kernel_builder!(program, queue, KERNEL_ARGON2,
                SpatialDims::Two(geometry.argon2_global[0], geometry.argon2_global[1]))
            .arg_local::<u8>(layout.scratch_bytes())
            .arg(&buffers.blocks)
            .arg(MEMORY_COST)
            .build()
            .backend("clCreateKernel")?;
        argon2.set_default_local_work_size(SpatialDims::Two(geometry.argon2_local[0], geometry.argon2_local[1]));

        let mut get_nonce = kernel_builder!(program, queue, KERNEL_GET_NONCE,
                SpatialDims::One(geometry.get_nonce_global))
            .arg(&buffers.blocks)
            .arg_named("start_nonce", 0u32)
            .arg_named("target", 0u32)
            .arg(&buffers.found_nonce)
            .build()
            .backend("clCreateKernel")?;
        if let Some(size) = geometry.get_nonce_local {
            get_nonce.set_default_local_work_size(SpatialDims::One(size));
        }

        tracing::debug!("✅ Worker lane {} on device #{} ready: {:.1}MB buffers, geometry {:?}",
            lane_index, info.global_index,
            buffers.total_bytes() as f64 / (1024.0 * 1024.0), geometry);

        Ok(Self {
            program,
            info,
            lane_index,
            nonces_per_batch,
            geometry,
            queue,
            buffers,
            init_memory,
            argon2,
            get_nonce,
        })
    }

    /// Start a round: upload the seed and clear the found slot
    pub fn setup(&mut self, seed: &InitialSeed) -> Result<()> {
        self.buffers.initial_seed.write(&seed.as_bytes()[..]).enq()
            .backend("clEnqueueWriteBuffer")?;
        self.buffers.found_nonce.write(&[0u32][..]).enq()
            .backend("clEnqueueWriteBuffer")?;
        Ok(())
    }

    /// Evaluate `[start_nonce, start_nonce + nonces_per_batch)` against `target`
    ///
    /// Returns a satisfying nonce, or 0 when none was found. Blocks until the
    /// batch has finished on the device.
    pub fn mine(&mut self, start_nonce: u32, target: u32) -> Result<u32> {
        #[cfg(feature = "profile")]
        let mut events = EventList::new();
        #[cfg(feature = "profile")]
        let mut names: Vec<&'static str> = Vec::with_capacity(3);

        self.init_memory.set_arg("start_nonce", start_nonce).backend("clSetKernelArg")?;
        kernel_enq!(self.init_memory, events, names, KERNEL_INIT_MEMORY);

        kernel_enq!(self.argon2, events, names, KERNEL_ARGON2);

        self.get_nonce.set_arg("start_nonce", start_nonce).backend("clSetKernelArg")?;
        self.get_nonce.set_arg("target", target).backend("clSetKernelArg")?;
        kernel_enq!(self.get_nonce, events, names, KERNEL_GET_NONCE);

        let mut found = [0u32; 1];
        self.buffers.found_nonce.read(&mut found[..]).enq()
            .backend("clEnqueueReadBuffer")?;

        if found[0] != 0 {
            self.buffers.found_nonce.cmd().fill(0u32, None).enq()
                .backend("clEnqueueFillBuffer")?;
        }

        #[cfg(feature = "profile")]
        self.log_stage_timings(&names, &events);

        Ok(found[0])
    }

    /// Wait for everything queued on this lane
    pub fn finish(&self) -> Result<()> {
        self.queue.finish().backend("clFinish")
    }

    /// Device this lane runs on
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Global index of the device
    pub fn device_index(&self) -> u32 {
        self.info.global_index
    }

    /// Position of this lane among the device's lanes
    pub fn lane_index(&self) -> u32 {
        self.lane_index
    }

    /// Nonces evaluated per `mine()` call
    pub fn nonces_per_batch(&self) -> u32 {
        self.nonces_per_batch
    }

    /// Launch geometry fixed at construction
    pub fn geometry(&self) -> &LaunchGeometry {
        &self.geometry
    }

    /// True when both lanes run the same compiled program
    pub fn shares_program_with(&self, other: &Worker) -> bool {
        Arc::ptr_eq(&self.program, &other.program)
    }

    #[cfg(feature = "profile")]
    fn log_stage_timings(&self, names: &[&'static str], events: &EventList) {
        use ocl::enums::ProfilingInfo;

        for (i, name) in names.iter().enumerate() {
            if let Some(event) = events.get(i) {
                let start = event.profiling_info(ProfilingInfo::Start)
                    .and_then(|r| r.time().map_err(ocl::Error::from));
                let end = event.profiling_info(ProfilingInfo::End)
                    .and_then(|r| r.time().map_err(ocl::Error::from));
                if let (Ok(start), Ok(end)) = (start, end) {
                    tracing::debug!("📊 device #{} lane {} {}: {:.3}ms",
                        self.info.global_index, self.lane_index, name,
                        end.saturating_sub(start) as f64 / 1_000_000.0);
                }
            }
        }
    }
}

#[cfg(feature = "profile")]
fn queue_properties() -> Option<ocl::flags::CommandQueueProperties> {
    Some(ocl::flags::CommandQueueProperties::PROFILING_ENABLE)
}

#[cfg(not(feature = "profile"))]
fn queue_properties() -> Option<ocl::flags::CommandQueueProperties> {
    None
}
