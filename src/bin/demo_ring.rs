// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_ring consume <count>
//   demo_ring produce <count>
//
// Streams timestamped samples through an 8-slot ring named "demo_samples".
// Start the consumer first: it creates the ring and its semaphores, then
// the producer attaches. The producer blocks whenever the consumer falls
// eight samples behind.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use typed_ipc::{IpcConfig, IpcResult, Permission, RingRole, SharedRingBuffer, ShmValue};

const RING_NAME: &str = "demo_samples";
const SLOTS: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct Sample {
    seq: u64,
    elapsed_ns: u64,
    value: f64,
}

unsafe impl ShmValue for Sample {}

type SampleRing = SharedRingBuffer<Sample, SLOTS>;

/// Shared memory ring buffer demo
#[derive(Parser, Debug)]
#[command(name = "demo_ring", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attach as producer and write <count> samples
    Produce {
        count: u64,
        /// Pause between samples
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// Create the ring and read <count> samples
    Consume { count: u64 },
}

fn produce(count: u64, interval_ms: u64, config: &IpcConfig) -> IpcResult<()> {
    let mut ring = SampleRing::open_with(RING_NAME, Permission::OpenReadWrite, RingRole::Producer, config)?;
    let start = Instant::now();
    for seq in 0..count {
        ring.write(Sample {
            seq,
            elapsed_ns: start.elapsed().as_nanos() as u64,
            value: (seq as f64 * 0.1).sin(),
        })?;
        if interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
    }
    info!(count, elapsed_ms = start.elapsed().as_millis() as u64, "producer done");
    Ok(())
}

fn consume(count: u64, config: &IpcConfig) -> IpcResult<()> {
    SampleRing::clear_storage(RING_NAME);
    let mut ring = SampleRing::open_with(RING_NAME, Permission::CreateReadOnly, RingRole::Consumer, config)?;
    println!("ring `{RING_NAME}` ready ({} slots), waiting for samples", ring.capacity());

    let mut expected = 0u64;
    let mut sample = Sample::default();
    for _ in 0..count {
        ring.read_into(&mut sample)?;
        if sample.seq != expected {
            error!(expected, got = sample.seq, "sample out of order");
        }
        expected = sample.seq + 1;
        println!("seq={} t={}ns value={:.4}", sample.seq, sample.elapsed_ns, sample.value);
    }
    info!(count, "consumer done");
    Ok(())
}

fn main() -> ExitCode {
    typed_ipc::init_tracing();
    let args = Args::parse();
    let config = IpcConfig::from_env();

    let result = match args.command {
        Command::Produce { count, interval_ms } => produce(count, interval_ms, &config),
        Command::Consume { count } => consume(count, &config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo_ring failed");
            eprintln!("demo_ring: {e}");
            ExitCode::FAILURE
        }
    }
}
