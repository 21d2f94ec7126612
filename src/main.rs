// src/main.rs - Command-line entry point for Clargon
// Tree location: ./src/main.rs

//! Clargon Main Entry Point
//!
//! Lists devices with their resource plans, benchmarks the mining pipeline and
//! prints the effective settings.
//!
//! # Version History
//! - 0.1.0: `devices` and `config` commands
//! - 0.1.1: `bench` command driving rounds with hashrate output
//! - 0.1.2: Comma-separated device, memory and lane overrides

use chrono::Local;
use clap::{Parser, Subcommand};
use clargon::{
    init,
    config::Settings,
    gpu::{
        hashrate::format_hashrate,
        miner::plan_devices,
        opencl::{DeviceCatalog, ProgramSources},
        InitialSeed, Miner, MiningDriver,
    },
    ClargonError, Result,
};
use std::path::PathBuf;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

/// Settings file read when `--config` is not given
const DEFAULT_CONFIG_FILE: &str = "clargon.json";

#[derive(Parser)]
#[command(name = "clargon")]
#[command(about = "OpenCL Argon2d proof-of-work miner for AMD and NVIDIA GPUs")]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Global device indices to use, ascending (e.g. 0,2)
    #[arg(long, global = true, value_delimiter = ',')]
    devices: Option<Vec<u32>>,
    /// Memory per device in MB, one value or one per enabled device
    #[arg(long, global = true, value_delimiter = ',')]
    memory: Option<Vec<u32>>,
    /// Lanes per device, one value or one per enabled device
    #[arg(long, global = true, value_delimiter = ',')]
    lanes: Option<Vec<u32>>,
    /// Directory with argon2d.cl and blake2b.cl
    #[arg(long, global = true)]
    kernel_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List GPU devices and their resource plans
    Devices,
    /// Mine a fixed header for a while and report hashrate and shares
    Bench {
        /// Seconds to run
        #[arg(long, default_value = "30")]
        seconds: u64,
        /// Block header (hex), defaults to 146 zero bytes
        #[arg(long)]
        header: Option<String>,
        /// Compact share target (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_compact)]
        share_compact: Option<u32>,
    },
    /// Print the effective settings as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    init()?;

    let cli = Cli::parse();
    let settings = effective_settings(&cli)?;

    match cli.command {
        Commands::Devices => list_devices(&settings)?,
        Commands::Bench { seconds, header, share_compact } => {
            run_bench(settings, seconds, header, share_compact).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn parse_compact(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid compact target '{}': {}", value, e))
}

fn effective_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None if PathBuf::from(DEFAULT_CONFIG_FILE).exists() => Settings::load(DEFAULT_CONFIG_FILE.as_ref())?,
        None => Settings::default(),
    };

    // Apply overrides
    if let Some(devices) = &cli.devices {
        settings.enabled_devices = devices.clone();
    }
    if let Some(memory) = &cli.memory {
        settings.memory_mb = memory.clone();
    }
    if let Some(lanes) = &cli.lanes {
        settings.lanes = lanes.clone();
    }
    if let Some(kernel_dir) = &cli.kernel_dir {
        settings.kernel_dir = kernel_dir.clone();
    }

    Ok(settings)
}

fn list_devices(settings: &Settings) -> Result<()> {
    let catalog = DeviceCatalog::enumerate()?;
    let plans = plan_devices(catalog.devices(), &settings.init_options());

    println!("{} Found {} supported GPU device(s)", timestamp(), plans.len());
    for device_plan in plans {
        let info = &device_plan.info;
        println!("Device #{}: {} by {} [{}]", info.global_index, info.name, info.vendor, info.family);
        println!("  Driver {}, {}", info.driver_version, info.device_version);
        println!("  {} compute units @ {} MHz", info.max_compute_units, info.max_clock_frequency);
        println!("  Global memory {:.1}GB, max allocation {:.1}GB",
            info.global_mem_size as f64 / (1024.0 * 1024.0 * 1024.0),
            info.max_mem_alloc_size as f64 / (1024.0 * 1024.0 * 1024.0));
        match device_plan.plan {
            Some(plan) => println!("  Plan: {} MB, {} nonces per run x {} lane(s)",
                plan.memory_budget_mb, plan.nonces_per_batch, plan.lane_count),
            None => println!("  Disabled by user"),
        }
    }

    Ok(())
}

async fn run_bench(settings: Settings, seconds: u64, header: Option<String>, share_compact: Option<u32>) -> Result<()> {
    let share_compact = share_compact.unwrap_or(settings.share_compact);
    let settings = Settings { share_compact, ..settings };
    settings.validate()?;

    let seed = match header {
        Some(hex) => InitialSeed::from_header_hex(&hex)?,
        None => InitialSeed::from_header(&[0u8; 146])?,
    };

    let sources = ProgramSources::from_dir(&settings.kernel_dir)?;
    let options = settings.init_options();

    println!("{} Starting Clargon v{} benchmark for {}s", timestamp(), clargon::VERSION, seconds);
    println!("{} Share compact: {:#010x}", timestamp(), share_compact);

    // Program builds and buffer allocation block for a while
    let miner = tokio::task::spawn_blocking(move || Miner::initialize(&options, &sources))
        .await
        .map_err(|e| ClargonError::Driver(format!("initialization task failed: {}", e)))??;

    for worker in miner.workers() {
        println!("{} GPU #{} lane {}: {} ({} nonces per run)",
            timestamp(), worker.device_index(), worker.lane_index(),
            worker.info().name, worker.nonces_per_batch());
    }

    let (driver, mut shares) = MiningDriver::start(miner, share_compact);
    let mut driver = driver.with_meter(settings.hashrate_meter());
    let work_id = driver.start_round(seed)?;
    println!("{} Mining round #{}", timestamp(), work_id);

    let mut report = interval(driver.hashrate_interval());
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);
    report.tick().await;

    let deadline = sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    let mut found = 0u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("{} Interrupted", timestamp());
                break;
            }
            _ = report.tick() => {
                let rates = driver.report_hashrates();
                let total: f64 = rates.values().sum();
                let per_device = rates.iter()
                    .map(|(device, rate)| format!("GPU{} {}", device, format_hashrate(*rate)))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{} Hashrate {} ({})", timestamp(), format_hashrate(total), per_device);
            }
            Some(share) = shares.recv() => {
                found += 1;
                println!("{} GPU #{} lane {} found share: nonce {} (round #{})",
                    timestamp(), share.device_index, share.lane_index, share.nonce, share.work_id);
            }
        }
    }

    let (miner, failures) = driver.shutdown().await?;
    for failure in &failures {
        println!("{} GPU #{} lane {} stopped: {}", timestamp(), failure.device_index, failure.lane_index, failure.error);
    }
    miner.release()?;

    println!("{} Benchmark finished: {} share(s) found", timestamp(), found);
    Ok(())
}
