// src/gpu/budget.rs - Per-device memory budget and lane planning
// Tree location: ./src/gpu/budget.rs

//! Resource budgeting for Argon2d mining
//!
//! Decides which devices take part, how much device memory each one gets and
//! how many worker lanes share it. Everything here is pure so the policy can
//! be checked without a GPU.
//!
//! # Version History
//! - 0.1.0: Vendor-aware automatic memory budget
//! - 0.1.1: Single-value and positional user overrides
//! - 0.1.2: Lane count resolution with [1, 8] clamp

use super::opencl::{DeviceInfo, VendorFamily};
use super::{NONCE_FOOTPRINT, ONE_GB, ONE_MB};

/// Lane count used when no override applies
pub const DEFAULT_LANES: u32 = 1;
/// Upper bound on lanes per device
pub const MAX_LANES: u32 = 8;

/// Cursor over the user's enabled-device list
///
/// The list is consumed in order: a device is admitted only when its global
/// index equals the entry at the current position, so the list has to be
/// written in ascending index order. An empty list admits every device.
#[derive(Debug, Clone)]
pub struct DeviceSelection<'a> {
    enabled: &'a [u32],
    position: usize,
}

impl<'a> DeviceSelection<'a> {
    /// Start a selection pass over `enabled` (empty = all devices)
    pub fn new(enabled: &'a [u32]) -> Self {
        Self { enabled, position: 0 }
    }

    /// Offer the next visited device
    ///
    /// Returns the device's enablement position (used to pick positional
    /// overrides) when it is admitted, `None` when it is skipped.
    pub fn admit(&mut self, global_index: u32) -> Option<usize> {
        if !self.enabled.is_empty() && self.enabled.get(self.position) != Some(&global_index) {
            return None;
        }
        let position = self.position;
        self.position += 1;
        Some(position)
    }

    /// Number of devices admitted so far
    pub fn admitted(&self) -> usize {
        self.position
    }

    /// Entries of the enabled list that never matched a device
    pub fn unmatched(&self) -> &'a [u32] {
        if self.enabled.is_empty() {
            &[]
        } else {
            &self.enabled[self.position.min(self.enabled.len())..]
        }
    }
}

/// Pick the override value for the device at `position`
///
/// One value applies to every device; several values apply positionally.
/// A position past the end of the list, or a value of 0, means "derive
/// automatically".
pub fn resolve_override(overrides: &[u32], position: usize) -> Option<u32> {
    let value = match overrides {
        [] => None,
        [single] => Some(*single),
        many => many.get(position).copied(),
    };
    value.filter(|&v| v > 0)
}

/// Automatic memory budget in MiB for one device
pub fn auto_memory_mb(family: VendorFamily, max_mem_alloc_size: u64, global_mem_size: u64) -> u32 {
    let gigabytes = match family {
        // Single allocations are capped well below global memory on AMD
        VendorFamily::Amd => max_mem_alloc_size / ONE_GB,
        VendorFamily::Nvidia => (global_mem_size / ONE_GB).saturating_sub(1),
    };
    (gigabytes * (ONE_GB / ONE_MB)).min(u32::MAX as u64) as u32
}

/// Number of nonces that fit in `memory_mb`
pub fn nonces_for_budget(memory_mb: u32) -> u32 {
    (memory_mb as u64 * ONE_MB / NONCE_FOOTPRINT).min(u32::MAX as u64) as u32
}

/// Resolved sizing decision for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePlan {
    /// Device memory budget in MiB
    pub memory_budget_mb: u32,
    /// Nonces evaluated by one `mine()` call on each lane
    pub nonces_per_batch: u32,
    /// Independent worker lanes sharing the device
    pub lane_count: u32,
}

impl ResourcePlan {
    /// Size of the `blocks` buffer in bytes for one lane
    pub fn blocks_bytes(&self) -> u64 {
        self.nonces_per_batch as u64 * NONCE_FOOTPRINT
    }

    /// Budget in bytes
    pub fn budget_bytes(&self) -> u64 {
        self.memory_budget_mb as u64 * ONE_MB
    }
}

/// Plan one device
///
/// `memory_override` and `lane_override` are the values already resolved
/// with [`resolve_override`] for this device's enablement position.
pub fn plan(
    device: &DeviceInfo,
    family: VendorFamily,
    memory_override: Option<u32>,
    lane_override: Option<u32>,
) -> ResourcePlan {
    let memory_budget_mb = memory_override.unwrap_or_else(|| {
        auto_memory_mb(family, device.max_mem_alloc_size, device.global_mem_size)
    });
    let lane_count = lane_override.unwrap_or(DEFAULT_LANES).clamp(1, MAX_LANES);

    ResourcePlan {
        memory_budget_mb,
        nonces_per_batch: nonces_for_budget(memory_budget_mb),
        lane_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(global_gb: u64, max_alloc_gb: u64) -> DeviceInfo {
        DeviceInfo {
            global_index: 0,
            family: VendorFamily::Nvidia,
            name: "Test GPU".to_string(),
            vendor: "Test".to_string(),
            driver_version: "1.0".to_string(),
            device_version: "OpenCL 1.2".to_string(),
            max_compute_units: 16,
            max_clock_frequency: 1500,
            max_mem_alloc_size: max_alloc_gb * ONE_GB,
            global_mem_size: global_gb * ONE_GB,
        }
    }

    #[test]
    fn test_nvidia_four_gigabytes() {
        let nvidia = plan(&device(4, 1), VendorFamily::Nvidia, None, None);
        assert_eq!(nvidia.memory_budget_mb, 3072);
        assert_eq!(nvidia.nonces_per_batch, 6144);
        assert_eq!(nvidia.lane_count, 1);
    }

    #[test]
    fn test_amd_uses_max_alloc() {
        // 8 GiB card exposing 4.5 GiB single allocations
        let mut dev = device(8, 4);
        dev.max_mem_alloc_size += ONE_GB / 2;
        let amd = plan(&dev, VendorFamily::Amd, None, None);
        assert_eq!(amd.memory_budget_mb, 4096);
        assert_eq!(amd.nonces_per_batch, 8192);
    }

    #[test]
    fn test_small_nvidia_device_gets_zero() {
        let one_gb = plan(&device(1, 0), VendorFamily::Nvidia, None, None);
        assert_eq!(one_gb.memory_budget_mb, 0);
        assert_eq!(one_gb.nonces_per_batch, 0);

        let empty = plan(&device(0, 0), VendorFamily::Nvidia, None, None);
        assert_eq!(empty.memory_budget_mb, 0);
    }

    #[test]
    fn test_budget_covers_batch() {
        for mb in [0u32, 1, 511, 512, 513, 3072, 12_345, 65_535, u32::MAX] {
            let nonces = nonces_for_budget(mb) as u64;
            assert!(nonces * NONCE_FOOTPRINT <= mb as u64 * ONE_MB, "budget {} MiB", mb);
        }
        for gb in 0..64u64 {
            for family in [VendorFamily::Amd, VendorFamily::Nvidia] {
                let p = plan(&device(gb, gb / 2), family, None, None);
                assert!(p.blocks_bytes() <= p.budget_bytes());
            }
        }
    }

    #[test]
    fn test_resolve_override() {
        assert_eq!(resolve_override(&[], 0), None);
        assert_eq!(resolve_override(&[2048], 0), Some(2048));
        assert_eq!(resolve_override(&[2048], 5), Some(2048));
        assert_eq!(resolve_override(&[1024, 2048], 1), Some(2048));
        // Short array falls back to auto, not to zero
        assert_eq!(resolve_override(&[1024, 2048], 2), None);
        assert_eq!(resolve_override(&[0, 2048], 0), None);
        assert_eq!(resolve_override(&[0], 3), None);
    }

    #[test]
    fn test_override_wins_over_auto() {
        let p = plan(&device(16, 4), VendorFamily::Nvidia, Some(1024), None);
        assert_eq!(p.memory_budget_mb, 1024);
        assert_eq!(p.nonces_per_batch, 2048);
    }

    #[test]
    fn test_lane_clamp() {
        let dev = device(8, 2);
        assert_eq!(plan(&dev, VendorFamily::Nvidia, None, Some(4)).lane_count, 4);
        assert_eq!(plan(&dev, VendorFamily::Nvidia, None, Some(64)).lane_count, MAX_LANES);
        assert_eq!(plan(&dev, VendorFamily::Nvidia, None, None).lane_count, DEFAULT_LANES);
    }

    #[test]
    fn test_selection_all_devices() {
        let mut selection = DeviceSelection::new(&[]);
        assert_eq!(selection.admit(0), Some(0));
        assert_eq!(selection.admit(1), Some(1));
        assert_eq!(selection.admit(7), Some(2));
        assert_eq!(selection.admitted(), 3);
        assert!(selection.unmatched().is_empty());
    }

    #[test]
    fn test_selection_consumes_in_order() {
        let enabled = [1, 3];
        let mut selection = DeviceSelection::new(&enabled);
        assert_eq!(selection.admit(0), None);
        assert_eq!(selection.admit(1), Some(0));
        assert_eq!(selection.admit(2), None);
        assert_eq!(selection.admit(3), Some(1));
        assert_eq!(selection.admit(4), None);
        assert_eq!(selection.admitted(), 2);
    }

    #[test]
    fn test_selection_out_of_order_list() {
        // Index 0 is never reached once the cursor waits on 2
        let enabled = [2, 0];
        let mut selection = DeviceSelection::new(&enabled);
        assert_eq!(selection.admit(0), None);
        assert_eq!(selection.admit(1), None);
        assert_eq!(selection.admit(2), Some(0));
        assert_eq!(selection.unmatched(), &[0]);
    }

    #[test]
    fn test_positional_overrides_follow_enablement() {
        let enabled = [1, 2];
        let memory = [1024, 2048];
        let mut selection = DeviceSelection::new(&enabled);
        let mut budgets = Vec::new();
        for index in 0..3u32 {
            if let Some(position) = selection.admit(index) {
                let p = plan(&device(8, 2), VendorFamily::Nvidia, resolve_override(&memory, position), None);
                budgets.push((index, p.memory_budget_mb));
            }
        }
        assert_eq!(budgets, vec![(1, 1024), (2, 2048)]);
    }
}
