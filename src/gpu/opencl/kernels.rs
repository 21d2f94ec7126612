// src/gpu/opencl/kernels.rs - OpenCL Program Sources and Compilation
// Tree location: ./src/gpu/opencl/kernels.rs

//! Kernel sources, vendor build flags and per-device program compilation
//!
//! The Argon2d mixing kernel and the Blake2b digest kernel are compiled as
//! one program per device. The program exposes three entry points:
//!
//! - `init_memory(blocks, seed, start_nonce)`
//! - `argon2(scratch, blocks, memory_cost)`
//! - `get_nonce(blocks, start_nonce, target, found)`
//!
//! # Version History
//! - 0.1.0: Two-source program build with `-Werror`
//! - 0.1.1: Vendor define and LDS cache size from the lane layout
//! - 0.1.2: Build log surfaced verbatim on failure
//!
//! # Build Flags
//! - `-Werror` always
//! - `-DAMD` on AMD platforms
//! - `-DLDS_CACHE_SIZE=n` when the lane layout uses a local cache

use ocl::{Context, Device, Program};
use std::fs;
use std::path::Path;
use std::time::Instant;
use crate::{BackendResultExt, ClargonError, Result};
use crate::gpu::BLOCK_SIZE;
use super::platform::{CatalogEntry, VendorFamily};

/// File name of the Argon2d kernel inside a kernel directory
pub const ARGON2D_SOURCE_FILE: &str = "argon2d.cl";
/// File name of the Blake2b kernel inside a kernel directory
pub const BLAKE2B_SOURCE_FILE: &str = "blake2b.cl";

/// Entry point seeding each nonce's memory blocks
pub const KERNEL_INIT_MEMORY: &str = "init_memory";
/// Entry point running the memory-hard mixing
pub const KERNEL_ARGON2: &str = "argon2";
/// Entry point comparing digests against the target
pub const KERNEL_GET_NONCE: &str = "get_nonce";

/// The two kernel source texts, compiled in this order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSources {
    argon2d: String,
    blake2b: String,
}

impl ProgramSources {
    /// Use sources already in memory
    pub fn new(argon2d: impl Into<String>, blake2b: impl Into<String>) -> Self {
        Self {
            argon2d: argon2d.into(),
            blake2b: blake2b.into(),
        }
    }

    /// Read `argon2d.cl` and `blake2b.cl` from `dir`
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let read = |file: &str| {
            let path = dir.join(file);
            fs::read_to_string(&path).map_err(|e| {
                ClargonError::Config(format!("Failed to read kernel source {}: {}", path.display(), e))
            })
        };
        let sources = Self::new(read(ARGON2D_SOURCE_FILE)?, read(BLAKE2B_SOURCE_FILE)?);
        tracing::debug!("Loaded kernel sources from {} ({} + {} bytes)",
            dir.display(), sources.argon2d.len(), sources.blake2b.len());
        Ok(sources)
    }

    /// Argon2d mixing kernel source
    pub fn argon2d(&self) -> &str {
        &self.argon2d
    }

    /// Blake2b digest kernel source
    pub fn blake2b(&self) -> &str {
        &self.blake2b
    }
}

/// How Argon2 lanes map onto work groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLayout {
    /// Nonces processed per work group
    pub jobs_per_block: u32,
    /// Blocks cached in local memory per job, 0 = no cache
    pub lds_cache_size: u32,
}

impl LaneLayout {
    /// Default layout for a vendor family
    pub fn for_family(family: VendorFamily) -> Self {
        match family {
            VendorFamily::Amd => Self { jobs_per_block: 2, lds_cache_size: 3 },
            VendorFamily::Nvidia => Self { jobs_per_block: 1, lds_cache_size: 2 },
        }
    }

    /// Reject layouts the kernels cannot run
    pub fn validate(&self) -> Result<()> {
        if self.jobs_per_block == 0 {
            return Err(ClargonError::Config("jobs_per_block must be at least 1".to_string()));
        }
        // The kernel's cache indexing needs at least two slots
        if self.lds_cache_size == 1 {
            return Err(ClargonError::Config("LDS cache size 1 is not supported".to_string()));
        }
        Ok(())
    }

    /// Local scratch bytes for the `argon2` kernel
    pub fn scratch_bytes(&self) -> usize {
        (1 + self.lds_cache_size as usize) * self.jobs_per_block as usize * BLOCK_SIZE
    }
}

/// Compiler options for a family and layout
pub fn build_options(family: VendorFamily, layout: &LaneLayout) -> String {
    let mut options = String::from("-Werror");
    if family == VendorFamily::Amd {
        options.push_str(" -DAMD");
    }
    if layout.lds_cache_size > 0 {
        options.push_str(&format!(" -DLDS_CACHE_SIZE={}", layout.lds_cache_size));
    }
    options
}

/// Context and program for one device, shared by all of its lanes
#[derive(Debug)]
pub struct CompiledProgram {
    context: Context,
    program: Program,
    device: Device,
    device_index: u32,
    family: VendorFamily,
    layout: LaneLayout,
}

impl CompiledProgram {
    /// OpenCL context bound to the single device
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Built program
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Target device
    pub fn device(&self) -> Device {
        self.device
    }

    /// Global index of the target device
    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    /// Vendor family of the target device
    pub fn family(&self) -> VendorFamily {
        self.family
    }

    /// Lane layout the program was built for
    pub fn layout(&self) -> LaneLayout {
        self.layout
    }
}

/// Create a context on `entry` and compile `sources` for it
///
/// A rejected build is never retried; the compiler log comes back verbatim in
/// [`ClargonError::BuildFailed`].
pub fn build_program(entry: &CatalogEntry, sources: &ProgramSources, layout: LaneLayout) -> Result<CompiledProgram> {
    layout.validate()?;

    let info = &entry.info;
    let options = build_options(info.family, &layout);

    tracing::info!("🔨 Compiling Argon2d kernels for {} {} ({})", info.family, info.name, options);
    let start_time = Instant::now();

    let context = Context::builder()
        .platform(entry.platform)
        .devices(entry.device)
        .build()
        .backend("clCreateContext")?;

    // The ocl build error carries CL_PROGRAM_BUILD_LOG for the device
    let program = Program::builder()
        .devices(entry.device)
        .src(sources.argon2d())
        .src(sources.blake2b())
        .cmplr_opt(options.as_str())
        .build(&context)
        .map_err(|e| {
            let log = e.to_string();
            tracing::error!("❌ Kernel compilation failed on device #{}:\n{}", info.global_index, log);
            ClargonError::BuildFailed {
                device_index: info.global_index,
                device_name: info.name.clone(),
                log,
            }
        })?;

    tracing::info!("✅ Kernel compilation successful in {}ms", start_time.elapsed().as_millis());

    Ok(CompiledProgram {
        context,
        program,
        device: entry.device,
        device_index: info.global_index,
        family: info.family,
        layout,
    })
}
