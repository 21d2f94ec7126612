// src/gpu/hashrate.rs - Moving-average hashrate reporting
// Tree location: ./src/gpu/hashrate.rs

//! Per-device hashrate over a short moving window
//!
//! Lanes add their batch size to a per-device counter after every `mine()`.
//! Once per report interval the counters are drained into a
//! [`HashrateMeter`], which turns them into hashes per second and keeps the
//! last `window` samples for each device.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Samples kept per device
pub const DEFAULT_WINDOW: usize = 5;
/// Seconds between reports
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Moving-average hashrate per global device index
#[derive(Debug, Clone)]
pub struct HashrateMeter {
    interval: Duration,
    window: usize,
    samples: BTreeMap<u32, VecDeque<f64>>,
}

impl Default for HashrateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_INTERVAL_SECS), DEFAULT_WINDOW)
    }
}

impl HashrateMeter {
    /// Create a meter sampling every `interval` with `window` samples per device
    pub fn new(interval: Duration, window: usize) -> Self {
        Self {
            interval,
            window: window.max(1),
            samples: BTreeMap::new(),
        }
    }

    /// Report interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Add one interval's worth of hash counts and return the averages
    ///
    /// A device seen in an earlier interval but missing from `hashes` gets a
    /// zero sample.
    pub fn record(&mut self, hashes: &BTreeMap<u32, u64>) -> BTreeMap<u32, f64> {
        let seconds = self.interval.as_secs_f64().max(f64::EPSILON);

        for &device in hashes.keys() {
            self.samples.entry(device).or_default();
        }

        let window = self.window;
        self.samples
            .iter_mut()
            .map(|(&device, history)| {
                let count = hashes.get(&device).copied().unwrap_or(0);
                history.push_back(count as f64 / seconds);
                while history.len() > window {
                    history.pop_front();
                }
                let average = history.iter().sum::<f64>() / history.len() as f64;
                (device, average)
            })
            .collect()
    }
}

/// Format a hashrate with a unit suffix
pub fn format_hashrate(rate: f64) -> String {
    if rate >= 1_000_000.0 {
        format!("{:.2} MH/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2} kH/s", rate / 1_000.0)
    } else {
        format!("{:.1} H/s", rate)
    }
}
