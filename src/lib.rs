// src/lib.rs - Main library file for Clargon Argon2d GPU mining
// Tree location: ./src/lib.rs

//! Clargon - OpenCL Argon2d proof-of-work search engine
//!
//! Enumerates OpenCL GPU devices, sizes a per-device batch of nonces from the
//! device memory limits, compiles the Argon2d + Blake2b program with vendor
//! flags and drives the three-stage `init_memory` / `argon2` / `get_nonce`
//! pipeline on one or more worker lanes per device.
//!
//! # Version History
//! - 0.1.0: Device catalog, resource budgeting and single-lane workers
//! - 0.1.1: Multi-lane workers sharing one compiled program per device
//! - 0.1.2: Build log capture, distinct allocation failure errors
//! - 0.1.3: Async mining driver with shared nonce counter and hashrate meter

#![warn(missing_docs)]
// Note: kernel enqueues in the ocl crate are unsafe calls
#![allow(unsafe_code)]

/// Configuration module for miner settings
pub mod config;
/// GPU device catalog, budgeting, workers and mining driver
pub mod gpu;

// Re-export main types for convenience
pub use config::Settings;
pub use gpu::{InitOptions, Miner, MiningDriver, Share};
pub use gpu::opencl::{DeviceInfo, VendorFamily, Worker};

use thiserror::Error;

/// Main error type for Clargon
#[derive(Error, Debug)]
pub enum ClargonError {
    /// The OpenCL runtime could not list platforms, or reported none
    #[error("Enumeration error: {0}")]
    Enumeration(String),

    /// Kernel compilation was rejected for a device
    #[error("Program build failed on device {device_index} ({device_name}):\n{log}")]
    BuildFailed {
        /// Global index of the device
        device_index: u32,
        /// Device name as reported by the driver
        device_name: String,
        /// Compiler diagnostic log, verbatim
        log: String,
    },

    /// A device buffer could not be created with the planned size
    #[error("Allocation of {buffer} buffer ({requested_bytes} bytes) failed on device {device_index}: {reason}")]
    AllocationFailed {
        /// Global index of the device
        device_index: u32,
        /// Buffer name (`blocks`, `initial_seed`, `found_nonce`)
        buffer: &'static str,
        /// Requested size in bytes
        requested_bytes: u64,
        /// Backend message
        reason: String,
    },

    /// Any other OpenCL call failure
    #[error("OpenCL error in {operation}: {message}")]
    Backend {
        /// Name of the failing OpenCL operation
        operation: &'static str,
        /// Backend message
        message: String,
    },

    /// Device filtering left nothing to mine on
    #[error("No usable GPU devices found")]
    NoUsableDevices,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid initial seed or block header
    #[error("Seed error: {0}")]
    Seed(String),

    /// Mining driver errors
    #[error("Driver error: {0}")]
    Driver(String),

    /// IO operation errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Fallback conversion when no operation name is attached
impl From<ocl::Error> for ClargonError {
    fn from(err: ocl::Error) -> Self {
        ClargonError::Backend {
            operation: "opencl",
            message: format!("OpenCL operation failed: {}", err),
        }
    }
}

/// Attaches the failing OpenCL operation name to a backend error
pub trait BackendResultExt<T> {
    /// Converts the error into [`ClargonError::Backend`] naming `operation`
    fn backend(self, operation: &'static str) -> Result<T>;
}

impl<T, E: std::fmt::Display> BackendResultExt<T> for std::result::Result<T, E> {
    fn backend(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| ClargonError::Backend {
            operation,
            message: e.to_string(),
        })
    }
}

/// Result type alias for Clargon operations
pub type Result<T> = std::result::Result<T, ClargonError>;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Application description from Cargo.toml
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Initialize logging (RUST_LOG controls the filter)
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| ClargonError::Config(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!("{} v{} - {}", NAME, VERSION, DESCRIPTION);
    tracing::info!("⚙️  Initializing Clargon with OpenCL backend...");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_ext_names_operation() {
        let failed: std::result::Result<(), String> = Err("CL_OUT_OF_RESOURCES".to_string());
        match failed.backend("clEnqueueNDRangeKernel") {
            Err(ClargonError::Backend { operation, message }) => {
                assert_eq!(operation, "clEnqueueNDRangeKernel");
                assert_eq!(message, "CL_OUT_OF_RESOURCES");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ClargonError::AllocationFailed {
            device_index: 2,
            buffer: "blocks",
            requested_bytes: 1024,
            reason: "CL_MEM_OBJECT_ALLOCATION_FAILURE".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("blocks"));
        assert!(text.contains("device 2"));

        let err = ClargonError::BuildFailed {
            device_index: 0,
            device_name: "gfx1030".to_string(),
            log: "error: unknown type name 'ulong8'".to_string(),
        };
        assert!(err.to_string().ends_with("error: unknown type name 'ulong8'"));
    }
}
