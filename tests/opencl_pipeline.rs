// tests/opencl_pipeline.rs - Device pipeline tests
// Tree location: ./tests/opencl_pipeline.rs

//! Run against real hardware only: each test returns early with a notice when
//! no OpenCL platform is present or `CLARGON_KERNEL_DIR` is unset.

use clargon::gpu::opencl::{build_program, CatalogEntry, DeviceCatalog, LaneLayout, ProgramSources, Worker};
use clargon::gpu::{opencl_available, InitOptions, InitialSeed, Miner};
use clargon::ClargonError;
use std::path::PathBuf;
use std::sync::Arc;

// Trivially satisfied and practically unsatisfiable compact targets
const EASY_COMPACT: u32 = 0x207fffff;
const HARD_COMPACT: u32 = 0x01010000;

// 128 MiB budget
const TEST_MEMORY_MB: u32 = 128;
const TEST_NONCES: u32 = 256;

fn first_device() -> Option<CatalogEntry> {
    if !opencl_available() {
        eprintln!("skipping: no OpenCL platform");
        return None;
    }
    match DeviceCatalog::enumerate() {
        Ok(catalog) => {
            let entry = catalog.entries().first().cloned();
            if entry.is_none() {
                eprintln!("skipping: no supported GPU device");
            }
            entry
        }
        Err(e) => {
            eprintln!("skipping: enumeration failed: {}", e);
            None
        }
    }
}

fn kernel_sources() -> Option<ProgramSources> {
    let Some(dir) = std::env::var_os("CLARGON_KERNEL_DIR") else {
        eprintln!("skipping: CLARGON_KERNEL_DIR not set");
        return None;
    };
    Some(ProgramSources::from_dir(&PathBuf::from(dir)).expect("kernel sources"))
}

fn test_worker() -> Option<Worker> {
    let entry = first_device()?;
    let sources = kernel_sources()?;
    let program = build_program(&entry, &sources, LaneLayout::for_family(entry.info.family)).expect("program build");
    Some(Worker::new(Arc::new(program), entry.info.clone(), 0, TEST_NONCES).expect("worker"))
}

fn seed() -> InitialSeed {
    InitialSeed::from_header(&[0x42u8; 146]).unwrap()
}

#[test]
fn test_easy_target_returns_nonce_in_batch() {
    let Some(mut worker) = test_worker() else { return };
    worker.setup(&seed()).unwrap();

    let start = TEST_NONCES;
    let nonce = worker.mine(start, EASY_COMPACT).unwrap();
    assert!(nonce >= start && nonce < start + TEST_NONCES, "nonce {} outside batch", nonce);
}

#[test]
fn test_hard_target_returns_zero_repeatedly() {
    let Some(mut worker) = test_worker() else { return };
    worker.setup(&seed()).unwrap();

    assert_eq!(worker.mine(0, HARD_COMPACT).unwrap(), 0);
    assert_eq!(worker.mine(0, HARD_COMPACT).unwrap(), 0);
}

#[test]
fn test_found_slot_is_cleared_after_hit() {
    let Some(mut worker) = test_worker() else { return };
    worker.setup(&seed()).unwrap();

    let nonce = worker.mine(TEST_NONCES, EASY_COMPACT).unwrap();
    assert_ne!(nonce, 0);
    assert_eq!(worker.mine(2 * TEST_NONCES, HARD_COMPACT).unwrap(), 0);
}

#[test]
fn test_lanes_share_one_program() {
    let Some(entry) = first_device() else { return };
    let Some(sources) = kernel_sources() else { return };

    let options = InitOptions {
        enabled_devices: vec![entry.info.global_index],
        memory_mb: vec![TEST_MEMORY_MB],
        lanes: vec![2],
    };
    let miner = Miner::initialize(&options, &sources).unwrap();
    let workers = miner.workers();
    assert_eq!(workers.len(), 2);
    assert!(workers[0].shares_program_with(&workers[1]));
    assert_eq!(workers[0].nonces_per_batch(), TEST_NONCES);
    assert_eq!(workers[1].lane_index(), 1);
    miner.release().unwrap();
}

#[test]
fn test_build_failure_carries_log() {
    let Some(entry) = first_device() else { return };
    let sources = ProgramSources::new("__kernel void argon2( { }", "");

    match build_program(&entry, &sources, LaneLayout::for_family(entry.info.family)) {
        Err(ClargonError::BuildFailed { device_index, log, .. }) => {
            assert_eq!(device_index, entry.info.global_index);
            assert!(!log.is_empty());
        }
        other => panic!("expected build failure, got {:?}", other.map(|_| ())),
    }
}
