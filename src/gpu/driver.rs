// src/gpu/driver.rs - Async round loop over all worker lanes
// Tree location: ./src/gpu/driver.rs

//! Mining driver
//!
//! Every lane gets its own tokio task. A task waits for a round, uploads the
//! round's seed, then keeps claiming the next free nonce range from a shared
//! counter and runs `mine()` for it on a blocking thread. Found nonces go out
//! as [`Share`] events on an unbounded channel.
//!
//! # Version History
//! - 0.1.0: Round broadcast over a watch channel, shared nonce counter
//! - 0.1.1: Stale result filtering by work id, pause support
//! - 0.1.2: Per-device hash counters feeding the hashrate meter

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use crate::{ClargonError, Result};
use super::hashrate::HashrateMeter;
use super::miner::Miner;
use super::opencl::Worker;
use super::seed::InitialSeed;
use super::MAX_NONCE;

/// What the driver needs from a mining lane
pub trait MiningLane: Send + 'static {
    /// Upload the round seed
    fn setup(&mut self, seed: &InitialSeed) -> Result<()>;
    /// Evaluate one batch, 0 = nothing found
    fn mine(&mut self, start_nonce: u32, target: u32) -> Result<u32>;
    /// Batch size
    fn nonces_per_batch(&self) -> u32;
    /// Global device index
    fn device_index(&self) -> u32;
    /// Lane position on the device
    fn lane_index(&self) -> u32;
}

impl MiningLane for Worker {
    fn setup(&mut self, seed: &InitialSeed) -> Result<()> {
        Worker::setup(self, seed)
    }

    fn mine(&mut self, start_nonce: u32, target: u32) -> Result<u32> {
        Worker::mine(self, start_nonce, target)
    }

    fn nonces_per_batch(&self) -> u32 {
        Worker::nonces_per_batch(self)
    }

    fn device_index(&self) -> u32 {
        Worker::device_index(self)
    }

    fn lane_index(&self) -> u32 {
        Worker::lane_index(self)
    }
}

/// A nonce satisfying the share target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    /// Round the nonce belongs to
    pub work_id: u64,
    /// Global index of the device that found it
    pub device_index: u32,
    /// Lane that found it
    pub lane_index: u32,
    /// The nonce
    pub nonce: u32,
}

/// A lane that stopped because `setup()` or `mine()` failed
#[derive(Debug)]
pub struct LaneFailure {
    /// Global device index
    pub device_index: u32,
    /// Lane position on the device
    pub lane_index: u32,
    /// The failure
    pub error: ClargonError,
}

/// Lanes and failures handed back by [`MiningDriver::stop`]
#[derive(Debug)]
pub struct Stopped<L> {
    /// Lanes in start order
    pub lanes: Vec<L>,
    /// Lanes that ended early
    pub failures: Vec<LaneFailure>,
}

/// Next free nonce of the current round
///
/// A claim names the round it is for, so a lane still finishing an old round
/// cannot take a range from the new one.
#[derive(Debug, Default)]
pub struct NonceCounter {
    state: Mutex<(u64, u64)>,
}

impl NonceCounter {
    /// Start `work_id` at nonce 0
    pub fn reset(&self, work_id: u64) {
        if let Ok(mut state) = self.state.lock() {
            *state = (work_id, 0);
        }
    }

    /// Claim `count` nonces for `work_id`
    ///
    /// Returns the first nonce of the range, or `None` when the round moved on
    /// or the range would pass 2^32.
    pub fn claim(&self, work_id: u64, count: u64) -> Option<u32> {
        let mut state = self.state.lock().ok()?;
        let (current, next) = *state;
        if current != work_id || next + count > MAX_NONCE {
            return None;
        }
        state.1 = next + count;
        Some(next as u32)
    }
}

#[derive(Debug, Clone, Default)]
struct RoundState {
    work_id: u64,
    seed: Option<Arc<InitialSeed>>,
    mining: bool,
    stopped: bool,
}

#[derive(Debug, Default)]
struct Shared {
    nonces: NonceCounter,
    share_compact: AtomicU32,
    hashes: Mutex<BTreeMap<u32, u64>>,
}

impl Shared {
    fn add_hashes(&self, device_index: u32, count: u64) {
        if let Ok(mut hashes) = self.hashes.lock() {
            *hashes.entry(device_index).or_insert(0) += count;
        }
    }

    fn drain_hashes(&self) -> BTreeMap<u32, u64> {
        self.hashes.lock().map(|mut h| std::mem::take(&mut *h)).unwrap_or_default()
    }
}

type LaneOutcome<L> = std::result::Result<(L, Option<ClargonError>), ClargonError>;

/// Drives every lane of a miner round after round
pub struct MiningDriver<L: MiningLane = Worker> {
    rounds: watch::Sender<RoundState>,
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<LaneOutcome<L>>>,
    meter: HashrateMeter,
    work_id: u64,
}

impl MiningDriver<Worker> {
    /// Take over a miner's workers; must be called inside a tokio runtime
    pub fn start(miner: Miner, share_compact: u32) -> (Self, mpsc::UnboundedReceiver<Share>) {
        Self::start_lanes(miner.into_workers(), share_compact)
    }

    /// Stop all lanes and hand the workers back as a miner
    pub async fn shutdown(self) -> Result<(Miner, Vec<LaneFailure>)> {
        let stopped = self.stop().await?;
        Ok((Miner::from_workers(stopped.lanes)?, stopped.failures))
    }
}

impl<L: MiningLane> MiningDriver<L> {
    /// Spawn one task per lane; must be called inside a tokio runtime
    pub fn start_lanes(lanes: Vec<L>, share_compact: u32) -> (Self, mpsc::UnboundedReceiver<Share>) {
        let (rounds, _) = watch::channel(RoundState::default());
        let (share_tx, share_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        shared.share_compact.store(share_compact, Ordering::SeqCst);

        let tasks = lanes
            .into_iter()
            .map(|lane| {
                tokio::spawn(run_lane(lane, rounds.subscribe(), Arc::clone(&shared), share_tx.clone()))
            })
            .collect::<Vec<_>>();

        tracing::info!("🚀 Mining driver started with {} lane(s)", tasks.len());

        let driver = Self {
            rounds,
            shared,
            tasks,
            meter: HashrateMeter::default(),
            work_id: 0,
        };
        (driver, share_rx)
    }

    /// Replace the hashrate meter
    pub fn with_meter(mut self, meter: HashrateMeter) -> Self {
        self.meter = meter;
        self
    }

    /// Begin a new round on every lane; returns its work id
    pub fn start_round(&mut self, seed: InitialSeed) -> Result<u64> {
        if self.shared.share_compact.load(Ordering::SeqCst) == 0 {
            return Err(ClargonError::Driver("Share compact is not set".to_string()));
        }

        self.work_id += 1;
        self.shared.nonces.reset(self.work_id);
        self.rounds.send_replace(RoundState {
            work_id: self.work_id,
            seed: Some(Arc::new(seed)),
            mining: true,
            stopped: false,
        });

        tracing::debug!("New round #{} on {} lane(s)", self.work_id, self.tasks.len());
        Ok(self.work_id)
    }

    /// Target for batches started from now on
    pub fn set_share_compact(&self, share_compact: u32) {
        self.shared.share_compact.store(share_compact, Ordering::SeqCst);
    }

    /// Stop claiming ranges until the next round
    pub fn pause(&self) {
        self.rounds.send_modify(|round| round.mining = false);
    }

    /// Work id of the latest round, 0 before the first
    pub fn work_id(&self) -> u64 {
        self.work_id
    }

    /// Number of lanes
    pub fn lane_count(&self) -> usize {
        self.tasks.len()
    }

    /// Report interval of the hashrate meter
    pub fn hashrate_interval(&self) -> std::time::Duration {
        self.meter.interval()
    }

    /// Drain the hash counters into the meter and return per-device averages
    pub fn report_hashrates(&mut self) -> BTreeMap<u32, f64> {
        let hashes = self.shared.drain_hashes();
        self.meter.record(&hashes)
    }

    /// Stop all lanes and collect them
    pub async fn stop(self) -> Result<Stopped<L>> {
        self.rounds.send_modify(|round| {
            round.mining = false;
            round.stopped = true;
        });

        let mut lanes = Vec::with_capacity(self.tasks.len());
        let mut failures = Vec::new();
        let mut lost = 0usize;

        for task in self.tasks {
            match task.await {
                Ok(Ok((lane, error))) => {
                    if let Some(error) = error {
                        failures.push(LaneFailure {
                            device_index: lane.device_index(),
                            lane_index: lane.lane_index(),
                            error,
                        });
                    }
                    lanes.push(lane);
                }
                Ok(Err(e)) => {
                    tracing::error!("❌ Lane lost: {}", e);
                    lost += 1;
                }
                Err(e) => {
                    tracing::error!("❌ Lane task failed: {}", e);
                    lost += 1;
                }
            }
        }

        if lost > 0 {
            return Err(ClargonError::Driver(format!("{} lane(s) were lost while stopping", lost)));
        }

        tracing::info!("🛑 Mining driver stopped ({} lane failure(s))", failures.len());
        Ok(Stopped { lanes, failures })
    }
}

// Runs `f` on a blocking thread with the lane moved in and back out
async fn on_blocking_thread<L, T, F>(mut lane: L, f: F) -> std::result::Result<(L, Result<T>), ClargonError>
where
    L: MiningLane,
    T: Send + 'static,
    F: FnOnce(&mut L) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = f(&mut lane);
        (lane, result)
    })
    .await
    .map_err(|e| ClargonError::Driver(format!("blocking mining call panicked: {}", e)))
}

async fn run_lane<L: MiningLane>(
    mut lane: L,
    mut rounds: watch::Receiver<RoundState>,
    shared: Arc<Shared>,
    shares: mpsc::UnboundedSender<Share>,
) -> LaneOutcome<L> {
    let device_index = lane.device_index();
    let lane_index = lane.lane_index();
    let batch = lane.nonces_per_batch() as u64;

    loop {
        let round = rounds.borrow_and_update().clone();
        if round.stopped {
            return Ok((lane, None));
        }

        if let (true, Some(seed)) = (round.mining, round.seed.clone()) {
            let (returned, result) = on_blocking_thread(lane, move |l| l.setup(&seed)).await?;
            lane = returned;
            if let Err(e) = result {
                tracing::error!("❌ Setup failed on device #{} lane {}: {}", device_index, lane_index, e);
                return Ok((lane, Some(e)));
            }

            // Runs until the round changes, pauses, stops or runs out of nonces
            while !rounds.has_changed().unwrap_or(true) {
                let Some(start_nonce) = shared.nonces.claim(round.work_id, batch) else {
                    tracing::debug!("Device #{} lane {}: nonce space of round #{} exhausted",
                        device_index, lane_index, round.work_id);
                    break;
                };
                let target = shared.share_compact.load(Ordering::SeqCst);

                let (returned, result) = on_blocking_thread(lane, move |l| l.mine(start_nonce, target)).await?;
                lane = returned;

                let nonce = match result {
                    Ok(nonce) => nonce,
                    Err(e) => {
                        tracing::error!("❌ Mining failed on device #{} lane {}: {}", device_index, lane_index, e);
                        return Ok((lane, Some(e)));
                    }
                };
                shared.add_hashes(device_index, batch);

                // Another round started while this batch ran
                if rounds.borrow().work_id != round.work_id {
                    break;
                }
                if nonce != 0 {
                    let _ = shares.send(Share { work_id: round.work_id, device_index, lane_index, nonce });
                }
            }
        }

        if rounds.changed().await.is_err() {
            return Ok((lane, None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeLane {
        device: u32,
        lane: u32,
        batch: u32,
        winning: Option<u32>,
        fail_on_mine: bool,
        starts: Arc<Mutex<Vec<u32>>>,
    }

    impl FakeLane {
        fn new(device: u32, lane: u32, batch: u32, starts: &Arc<Mutex<Vec<u32>>>) -> Self {
            Self { device, lane, batch, winning: None, fail_on_mine: false, starts: Arc::clone(starts) }
        }
    }

    impl MiningLane for FakeLane {
        fn setup(&mut self, _seed: &InitialSeed) -> Result<()> {
            Ok(())
        }

        fn mine(&mut self, start_nonce: u32, target: u32) -> Result<u32> {
            if self.fail_on_mine {
                return Err(ClargonError::Backend { operation: "clEnqueueNDRangeKernel", message: "CL_OUT_OF_RESOURCES".to_string() });
            }
            self.starts.lock().unwrap().push(start_nonce);
            let end = start_nonce as u64 + self.batch as u64;
            Ok(match self.winning {
                Some(n) if target != 0 && (start_nonce as u64..end).contains(&(n as u64)) => n,
                _ => 0,
            })
        }

        fn nonces_per_batch(&self) -> u32 {
            self.batch
        }

        fn device_index(&self) -> u32 {
            self.device
        }

        fn lane_index(&self) -> u32 {
            self.lane
        }
    }

    fn seed() -> InitialSeed {
        InitialSeed::from_header(&[0u8; 146]).unwrap()
    }

    async fn wait_for_starts(starts: &Arc<Mutex<Vec<u32>>>, count: usize) {
        for _ in 0..500 {
            if starts.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("lanes did not reach {} batches", count);
    }

    #[test]
    fn test_nonce_counter_ranges() {
        let counter = NonceCounter::default();
        counter.reset(1);
        assert_eq!(counter.claim(1, 100), Some(0));
        assert_eq!(counter.claim(1, 50), Some(100));
        assert_eq!(counter.claim(2, 50), None);
        counter.reset(2);
        assert_eq!(counter.claim(2, 50), Some(0));
        assert_eq!(counter.claim(1, 50), None);
    }

    #[test]
    fn test_nonce_counter_stops_at_nonce_space_end() {
        let counter = NonceCounter::default();
        counter.reset(7);
        let half = 1u64 << 31;
        assert_eq!(counter.claim(7, half), Some(0));
        assert_eq!(counter.claim(7, half), Some(1 << 31));
        assert_eq!(counter.claim(7, 1), None);

        counter.reset(8);
        assert_eq!(counter.claim(8, MAX_NONCE - 10), Some(0));
        assert_eq!(counter.claim(8, 11), None);
        assert_eq!(counter.claim(8, 10), Some((MAX_NONCE - 10) as u32));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lanes_cover_nonce_space_without_overlap() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let batch = 1u32 << 30;
        let lanes = vec![FakeLane::new(0, 0, batch, &starts), FakeLane::new(1, 0, batch, &starts)];

        let (mut driver, _shares) = MiningDriver::start_lanes(lanes, 0x1f00ffff);
        driver.start_round(seed()).unwrap();
        wait_for_starts(&starts, 4).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut seen = starts.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1 << 30, 2 << 30, 3 << 30]);

        // Default meter divides by a 5 second interval
        let hashes: f64 = driver.report_hashrates().values().map(|rate| rate * 5.0).sum();
        assert!((hashes - (4u64 << 30) as f64).abs() < 1.0);

        let stopped = driver.stop().await.unwrap();
        assert_eq!(stopped.lanes.len(), 2);
        assert!(stopped.failures.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_share_reported_with_work_id() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut lane = FakeLane::new(3, 1, 1 << 31, &starts);
        lane.winning = Some(12_345);

        let (mut driver, mut shares) = MiningDriver::start_lanes(vec![lane], 0x1f00ffff);
        let work_id = driver.start_round(seed()).unwrap();

        let share = tokio::time::timeout(Duration::from_secs(5), shares.recv()).await.unwrap().unwrap();
        assert_eq!(share, Share { work_id, device_index: 3, lane_index: 1, nonce: 12_345 });

        driver.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_round_restarts_counter() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let lane = FakeLane::new(0, 0, 1 << 31, &starts);
        let (mut driver, _shares) = MiningDriver::start_lanes(vec![lane], 0x1f00ffff);

        assert_eq!(driver.start_round(seed()).unwrap(), 1);
        wait_for_starts(&starts, 2).await;
        assert_eq!(driver.start_round(seed()).unwrap(), 2);
        wait_for_starts(&starts, 4).await;

        let seen = starts.lock().unwrap().clone();
        assert_eq!(seen, vec![0, 1 << 31, 0, 1 << 31]);
        driver.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mine_failure_reported_on_stop() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut failing = FakeLane::new(2, 0, 1024, &starts);
        failing.fail_on_mine = true;

        let (mut driver, _shares) = MiningDriver::start_lanes(vec![failing], 0x1f00ffff);
        driver.start_round(seed()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = driver.stop().await.unwrap();
        assert_eq!(stopped.lanes.len(), 1);
        assert_eq!(stopped.failures.len(), 1);
        assert_eq!(stopped.failures[0].device_index, 2);
        assert!(matches!(stopped.failures[0].error, ClargonError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_round_requires_share_compact() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let (mut driver, _shares) = MiningDriver::start_lanes(vec![FakeLane::new(0, 0, 16, &starts)], 0);
        assert!(matches!(driver.start_round(seed()), Err(ClargonError::Driver(_))));

        driver.set_share_compact(0x1f00ffff);
        driver.pause();
        assert_eq!(driver.start_round(seed()).unwrap(), 1);
        driver.stop().await.unwrap();
    }
}
