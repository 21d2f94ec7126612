// src/gpu/opencl/platform.rs - OpenCL Platform Detection and Device Catalog
// Tree location: ./src/gpu/opencl/platform.rs

//! OpenCL platform detection and device catalog
//!
//! Walks every OpenCL platform and every GPU device on it in the order the
//! runtime reports them. Each GPU gets a global index counted across all
//! platforms, including platforms from vendors we do not mine on, so that a
//! device list written by the operator keeps meaning across runs.
//!
//! # Version History
//! - 0.1.0: Initial platform detection with vendor matching
//! - 0.1.1: Global device indices stable across unsupported platforms
//! - 0.1.2: Attribute snapshot with `?` fallback for empty driver strings
//! - 0.1.3: Raw version text; only CL_DEVICE_NOT_FOUND skips a platform's GPUs
//!
//! # Supported Platforms
//! - AMD: "Advanced Micro Devices" (single allocations capped below global memory)
//! - NVIDIA: "NVIDIA Corporation"

use ocl::{Device, DeviceType, Platform};
use ocl::core::Status;
use ocl::enums::{DeviceInfo as ClDeviceInfo, DeviceInfoResult};
use std::fmt;
use crate::{BackendResultExt, ClargonError, Result};

const VENDOR_AMD: &str = "Advanced Micro Devices";
const VENDOR_NVIDIA: &str = "NVIDIA Corporation";

// Longest text kept per attribute, matching the driver query buffers
const MAX_NAME_LEN: usize = 254;
const MAX_VERSION_LEN: usize = 63;

/// Supported GPU vendor families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorFamily {
    /// AMD platforms, budgeted from the max single allocation
    Amd,
    /// NVIDIA platforms, budgeted from global memory
    Nvidia,
}

impl VendorFamily {
    /// Match a platform vendor string by prefix
    pub fn detect(platform_vendor: &str) -> Option<Self> {
        if platform_vendor.starts_with(VENDOR_AMD) {
            Some(VendorFamily::Amd)
        } else if platform_vendor.starts_with(VENDOR_NVIDIA) {
            Some(VendorFamily::Nvidia)
        } else {
            None
        }
    }
}

impl fmt::Display for VendorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorFamily::Amd => write!(f, "AMD"),
            VendorFamily::Nvidia => write!(f, "NVIDIA"),
        }
    }
}

/// Immutable snapshot of one GPU device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Index across all platforms in enumeration order
    pub global_index: u32,
    /// Vendor family of the owning platform
    pub family: VendorFamily,
    /// Device name
    pub name: String,
    /// Device vendor
    pub vendor: String,
    /// Driver version, `?` when the driver reports nothing
    pub driver_version: String,
    /// OpenCL version supported by the device, `?` when empty
    pub device_version: String,
    /// Compute units
    pub max_compute_units: u32,
    /// Max clock frequency in MHz
    pub max_clock_frequency: u32,
    /// Largest single buffer allocation in bytes
    pub max_mem_alloc_size: u64,
    /// Global memory in bytes
    pub global_mem_size: u64,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device #{}: {} by {} (driver {}, {}, {} CUs @ {} MHz, {:.1}GB)",
            self.global_index, self.name, self.vendor,
            self.driver_version, self.device_version,
            self.max_compute_units, self.max_clock_frequency,
            self.global_mem_size as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Truncate to at most `max_len` bytes on a char boundary, trimming NULs
pub(crate) fn bounded_text(raw: &str, max_len: usize) -> String {
    let text = raw.trim_end_matches('\0').trim();
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Text attribute bytes as returned by `clGetDeviceInfo`
pub(crate) fn text_from_raw(raw: &[u8], max_len: usize) -> String {
    bounded_text(&String::from_utf8_lossy(raw), max_len)
}

/// True when a failed device query only means "no devices of that type"
pub(crate) fn is_device_not_found(status: Option<Status>) -> bool {
    matches!(status, Some(Status::CL_DEVICE_NOT_FOUND))
}

/// Bounded text with `?` substituted for an empty value
pub(crate) fn text_or_unknown(raw: &str, max_len: usize) -> String {
    let text = bounded_text(raw, max_len);
    if text.is_empty() {
        "?".to_string()
    } else {
        text
    }
}

/// One platform and the GPU devices it reported
#[derive(Debug, Clone)]
pub struct PlatformListing<D> {
    /// Platform name
    pub name: String,
    /// Platform vendor string
    pub vendor: String,
    /// GPU devices in runtime order
    pub devices: Vec<D>,
}

/// A device on a supported platform with its global index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedDevice {
    /// Global index across all platforms
    pub global_index: u32,
    /// Vendor family of the owning platform
    pub family: VendorFamily,
    /// Position of the platform in the listing
    pub platform: usize,
    /// Position of the device within its platform
    pub device: usize,
}

/// Assign global indices and keep devices of supported platforms
///
/// Unsupported platforms and platforms without GPUs are logged and skipped;
/// devices on unsupported platforms still consume an index.
pub fn index_devices<D>(platforms: &[PlatformListing<D>]) -> Vec<IndexedDevice> {
    let mut indexed = Vec::new();
    let mut global_index = 0u32;

    for (platform_idx, platform) in platforms.iter().enumerate() {
        tracing::info!("🔍 Platform: {} by {}", platform.name, platform.vendor);

        let family = VendorFamily::detect(&platform.vendor);
        if family.is_none() {
            tracing::warn!("⚠️  Unsupported platform, skipped ({} GPU device(s))", platform.devices.len());
        } else if platform.devices.is_empty() {
            tracing::warn!("⚠️  No GPU devices found on {}", platform.name);
        }

        for device_idx in 0..platform.devices.len() {
            if let Some(family) = family {
                indexed.push(IndexedDevice {
                    global_index,
                    family,
                    platform: platform_idx,
                    device: device_idx,
                });
            }
            global_index += 1;
        }
    }

    indexed
}

/// Catalog entry: attribute snapshot plus the handles needed to build on it
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Attribute snapshot
    pub info: DeviceInfo,
    /// Owning platform
    pub platform: Platform,
    /// Device handle
    pub device: Device,
}

/// Every GPU device on a supported platform, in global index order
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    entries: Vec<CatalogEntry>,
}

impl DeviceCatalog {
    /// Enumerate all platforms and GPU devices
    ///
    /// Fails when the runtime cannot list platforms or reports none. A GPU
    /// query error other than CL_DEVICE_NOT_FOUND is fatal too, as is any
    /// attribute query error.
    pub fn enumerate() -> Result<Self> {
        let platform_ids = ocl::core::get_platform_ids()
            .map_err(|e| ClargonError::Enumeration(format!("clGetPlatformIDs failed: {}", e)))?;

        if platform_ids.is_empty() {
            return Err(ClargonError::Enumeration(
                "No OpenCL platforms found. Please install GPU drivers.".to_string()
            ));
        }

        let mut listings = Vec::with_capacity(platform_ids.len());
        let mut handles = Vec::with_capacity(platform_ids.len());

        for platform_id in platform_ids {
            let platform = Platform::new(platform_id);
            let name = platform.name().backend("clGetPlatformInfo")?;
            let vendor = platform.vendor().backend("clGetPlatformInfo")?;

            let devices = match Device::list(&platform, Some(DeviceType::GPU)) {
                Ok(devices) => devices,
                Err(e) if is_device_not_found(e.api_status()) => {
                    tracing::debug!("No GPU devices reported by {}", name);
                    Vec::new()
                }
                Err(e) => {
                    return Err(ClargonError::Enumeration(
                        format!("clGetDeviceIDs failed on {}: {}", name, e)
                    ));
                }
            };

            listings.push(PlatformListing {
                name: bounded_text(&name, MAX_VERSION_LEN),
                vendor: bounded_text(&vendor, MAX_VERSION_LEN),
                devices,
            });
            handles.push(platform);
        }

        let mut entries = Vec::new();
        for indexed in index_devices(&listings) {
            let device = listings[indexed.platform].devices[indexed.device];
            let info = Self::snapshot(&device, indexed.global_index, indexed.family)?;

            tracing::info!("  📱 {}", info);

            entries.push(CatalogEntry {
                info,
                platform: handles[indexed.platform],
                device,
            });
        }

        Ok(Self { entries })
    }

    /// Read every attribute of one device
    fn snapshot(device: &Device, global_index: u32, family: VendorFamily) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            global_index,
            family,
            name: Self::info_text(device, ClDeviceInfo::Name, MAX_NAME_LEN)?,
            vendor: Self::info_text(device, ClDeviceInfo::Vendor, MAX_NAME_LEN)?,
            driver_version: text_or_unknown(&Self::info_text(device, ClDeviceInfo::DriverVersion, MAX_VERSION_LEN)?, MAX_VERSION_LEN),
            device_version: text_or_unknown(&Self::info_text(device, ClDeviceInfo::Version, MAX_VERSION_LEN)?, MAX_VERSION_LEN),
            max_compute_units: Self::info_u32(device, ClDeviceInfo::MaxComputeUnits)?,
            max_clock_frequency: Self::info_u32(device, ClDeviceInfo::MaxClockFrequency)?,
            max_mem_alloc_size: Self::info_u64(device, ClDeviceInfo::MaxMemAllocSize)?,
            global_mem_size: Self::info_u64(device, ClDeviceInfo::GlobalMemSize)?,
        })
    }

    /// All catalog entries
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Attribute snapshots only
    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.entries.iter().map(|entry| &entry.info)
    }

    // Helper methods for device info extraction

    // Raw bytes: the parsed CL_DEVICE_VERSION drops the vendor suffix and
    // rejects empty strings
    fn info_text(device: &Device, kind: ClDeviceInfo, max_len: usize) -> Result<String> {
        let raw = ocl::core::get_device_info_raw(device.as_core(), kind as u32)
            .backend("clGetDeviceInfo")?;
        Ok(text_from_raw(&raw, max_len))
    }

    fn info_u32(device: &Device, kind: ClDeviceInfo) -> Result<u32> {
        match device.info(kind).backend("clGetDeviceInfo")? {
            DeviceInfoResult::MaxComputeUnits(v) |
            DeviceInfoResult::MaxClockFrequency(v) => Ok(v),
            other => Err(ClargonError::Backend {
                operation: "clGetDeviceInfo",
                message: format!("unexpected device info result: {:?}", other),
            }),
        }
    }

    fn info_u64(device: &Device, kind: ClDeviceInfo) -> Result<u64> {
        match device.info(kind).backend("clGetDeviceInfo")? {
            DeviceInfoResult::MaxMemAllocSize(v) |
            DeviceInfoResult::GlobalMemSize(v) => Ok(v),
            other => Err(ClargonError::Backend {
                operation: "clGetDeviceInfo",
                message: format!("unexpected device info result: {:?}", other),
            }),
        }
    }
}
