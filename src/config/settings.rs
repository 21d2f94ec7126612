// src/config/settings.rs - Miner settings file and overrides
// Tree location: ./src/config/settings.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::gpu::{HashrateMeter, InitOptions};
use crate::gpu::hashrate::{DEFAULT_INTERVAL_SECS, DEFAULT_WINDOW};
use crate::{ClargonError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Main configuration settings for the miner
pub struct Settings {
    /// Global device indices to mine on, ascending; empty = all
    pub enabled_devices: Vec<u32>,
    /// Memory budget per device in MiB (one value for all, or one per enabled device)
    pub memory_mb: Vec<u32>,
    /// Lanes per device (one value for all, or one per enabled device)
    pub lanes: Vec<u32>,
    /// Directory holding `argon2d.cl` and `blake2b.cl`
    pub kernel_dir: PathBuf,
    /// Compact share target passed to `get_nonce`
    pub share_compact: u32,
    /// Seconds between hashrate reports
    pub hashrate_interval_secs: u64,
    /// Samples in the hashrate moving average
    pub hashrate_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled_devices: Vec::new(),
            memory_mb: Vec::new(),
            lanes: Vec::new(),
            kernel_dir: PathBuf::from("kernels"),
            share_compact: 0x1f00ffff, // easy share target for benchmarking
            hashrate_interval_secs: DEFAULT_INTERVAL_SECS,
            hashrate_window: DEFAULT_WINDOW,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Write settings as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the driver cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.share_compact == 0 {
            return Err(ClargonError::Config("share_compact must not be 0".to_string()));
        }
        if self.hashrate_interval_secs == 0 {
            return Err(ClargonError::Config("hashrate_interval_secs must be at least 1".to_string()));
        }
        if self.hashrate_window == 0 {
            return Err(ClargonError::Config("hashrate_window must be at least 1".to_string()));
        }
        if self.enabled_devices.windows(2).any(|w| w[0] >= w[1]) {
            tracing::warn!("⚠️  enabled_devices {:?} is not strictly ascending; later entries may never match",
                self.enabled_devices);
        }
        Ok(())
    }

    /// Device selection and overrides for `Miner::initialize`
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            enabled_devices: self.enabled_devices.clone(),
            memory_mb: self.memory_mb.clone(),
            lanes: self.lanes.clone(),
        }
    }

    /// Hashrate meter with the configured interval and window
    pub fn hashrate_meter(&self) -> HashrateMeter {
        HashrateMeter::new(Duration::from_secs(self.hashrate_interval_secs), self.hashrate_window)
    }
}
