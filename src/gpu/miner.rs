// src/gpu/miner.rs - Worker construction across all selected devices
// Tree location: ./src/gpu/miner.rs

//! The engine: every worker lane of every selected device
//!
//! Initialization is all or nothing. Any build or allocation failure drops the
//! workers constructed so far, which releases their OpenCL objects, and
//! returns the error; a partially built miner is never handed out.
//!
//! # Version History
//! - 0.1.0: One worker per device
//! - 0.1.1: Lane overrides, program shared across a device's lanes
//! - 0.1.2: Planning split from construction for the `devices` listing

use std::sync::Arc;
use crate::{ClargonError, Result};
use super::budget::{self, DeviceSelection, ResourcePlan, resolve_override};
use super::opencl::{build_program, DeviceCatalog, DeviceInfo, LaneLayout, ProgramSources, Worker};

/// Caller-supplied device selection and overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOptions {
    /// Global device indices to use, ascending; empty = all
    pub enabled_devices: Vec<u32>,
    /// Memory budget in MiB, one value for all or one per enabled device
    pub memory_mb: Vec<u32>,
    /// Lanes per device, one value for all or one per enabled device
    pub lanes: Vec<u32>,
}

/// Planning outcome for one catalog device
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePlan {
    /// Device snapshot
    pub info: DeviceInfo,
    /// Resource plan, `None` when the device is not selected
    pub plan: Option<ResourcePlan>,
}

/// Run device selection and budgeting over `devices` in catalog order
pub fn plan_devices<'a, I>(devices: I, options: &InitOptions) -> Vec<DevicePlan>
where
    I: IntoIterator<Item = &'a DeviceInfo>,
{
    let mut selection = DeviceSelection::new(&options.enabled_devices);

    let plans: Vec<DevicePlan> = devices
        .into_iter()
        .map(|info| {
            let plan = selection.admit(info.global_index).map(|position| {
                budget::plan(
                    info,
                    info.family,
                    resolve_override(&options.memory_mb, position),
                    resolve_override(&options.lanes, position),
                )
            });
            DevicePlan { info: info.clone(), plan }
        })
        .collect();

    let unmatched = selection.unmatched();
    if !unmatched.is_empty() {
        tracing::warn!("⚠️  Enabled device indices never matched (list must be ascending): {:?}", unmatched);
    }

    plans
}

/// Reject a plan whose memory budget holds no nonces
pub fn check_plan(info: &DeviceInfo, plan: &ResourcePlan) -> Result<()> {
    if plan.nonces_per_batch == 0 {
        return Err(ClargonError::AllocationFailed {
            device_index: info.global_index,
            buffer: "blocks",
            requested_bytes: 0,
            reason: format!("memory budget of {} MB holds no nonces", plan.memory_budget_mb),
        });
    }
    Ok(())
}

/// Ordered collection of worker lanes
#[derive(Debug)]
pub struct Miner {
    workers: Vec<Worker>,
}

impl Miner {
    /// Enumerate devices and build every selected worker
    pub fn initialize(options: &InitOptions, sources: &ProgramSources) -> Result<Self> {
        let catalog = DeviceCatalog::enumerate()?;
        Self::from_catalog(&catalog, options, sources)
    }

    /// Build workers for the devices of an existing catalog
    pub fn from_catalog(catalog: &DeviceCatalog, options: &InitOptions, sources: &ProgramSources) -> Result<Self> {
        let plans = plan_devices(catalog.devices(), options);
        let mut workers = Vec::new();

        for (entry, device_plan) in catalog.entries().iter().zip(plans) {
            let info = &entry.info;
            let Some(plan) = device_plan.plan else {
                tracing::info!("⏭️  Device #{}: {} by {} disabled by user", info.global_index, info.name, info.vendor);
                continue;
            };

            check_plan(info, &plan)?;

            tracing::info!("🚀 Device #{}: {} by {}: using {} MB of global memory, nonces per run: {} x {} lane(s)",
                info.global_index, info.name, info.vendor,
                plan.memory_budget_mb as u64 * plan.lane_count as u64,
                plan.nonces_per_batch, plan.lane_count);

            let program = Arc::new(build_program(entry, sources, LaneLayout::for_family(info.family))?);

            for lane_index in 0..plan.lane_count {
                workers.push(Worker::new(Arc::clone(&program), info.clone(), lane_index, plan.nonces_per_batch)?);
            }
        }

        if workers.is_empty() {
            tracing::error!("❌ Failed to find any usable GPU devices");
            return Err(ClargonError::NoUsableDevices);
        }

        tracing::info!("✅ Miner initialized with {} worker(s)", workers.len());
        Ok(Self { workers })
    }

    /// Reassemble a miner from workers handed back by the driver
    pub fn from_workers(workers: Vec<Worker>) -> Result<Self> {
        if workers.is_empty() {
            return Err(ClargonError::NoUsableDevices);
        }
        Ok(Self { workers })
    }

    /// Workers in construction order
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Take ownership of the workers
    pub fn into_workers(self) -> Vec<Worker> {
        self.workers
    }

    /// Release every worker's device resources
    ///
    /// Waits for each queue to drain before dropping; the first queue error is
    /// returned after all workers have been dropped.
    pub fn release(self) -> Result<()> {
        let mut first_error = None;
        let count = self.workers.len();

        for worker in self.workers {
            if let Err(e) = worker.finish() {
                tracing::warn!("⚠️  Queue of device #{} lane {} did not drain: {}",
                    worker.device_index(), worker.lane_index(), e);
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("🧹 Released {} worker(s)", count);
        first_error.map_or(Ok(()), Err)
    }
}
