// src/gpu/opencl/mod.rs - OpenCL Module Organization and Public API
// Tree location: ./src/gpu/opencl/mod.rs

//! OpenCL backend for Clargon Argon2d mining
//!
//! # Version History
//! - 0.1.0: Device catalog and per-device program build
//! - 0.1.1: Worker lanes with pre-bound kernels
//!
//! # Module Organization
//! - `platform`: platform walk, vendor families, device attribute snapshots
//! - `kernels`: kernel sources, build flags, compiled program per device
//! - `buffers`: the three device buffers of a lane
//! - `worker`: queue, kernels and the three-stage mining pipeline
//!
//! # Usage Example
//! ```no_run
//! use clargon::gpu::opencl::{build_program, DeviceCatalog, LaneLayout, ProgramSources, Worker};
//! use clargon::gpu::InitialSeed;
//! use std::sync::Arc;
//!
//! # fn main() -> clargon::Result<()> {
//! let catalog = DeviceCatalog::enumerate()?;
//! let entry = &catalog.entries()[0];
//! let sources = ProgramSources::from_dir("kernels".as_ref())?;
//! let program = Arc::new(build_program(entry, &sources, LaneLayout::for_family(entry.info.family))?);
//!
//! let mut worker = Worker::new(program, entry.info.clone(), 0, 2048)?;
//! worker.setup(&InitialSeed::from_header(&[0u8; 146])?)?;
//! let nonce = worker.mine(0, 0x1f00ffff)?;
//! # let _ = nonce;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod platform;
pub mod kernels;
pub mod buffers;
pub mod worker;

// Re-export primary types for convenient access
pub use platform::{
    CatalogEntry,
    DeviceCatalog,
    DeviceInfo,
    IndexedDevice,
    PlatformListing,
    VendorFamily,
    index_devices,
};

pub use kernels::{
    CompiledProgram,
    LaneLayout,
    ProgramSources,
    build_options,
    build_program,
};

pub use buffers::WorkerBuffers;

pub use worker::{LaunchGeometry, Worker};
