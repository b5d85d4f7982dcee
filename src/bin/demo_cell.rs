// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_cell write <value>
//   demo_cell read
//
// Shares a status record through a mutex-guarded cell named "demo_status".
// `write` keeps the region alive until Enter is pressed; run `read` from
// another terminal meanwhile. Set RUST_LOG=debug to see the lifecycle.

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use typed_ipc::{CellOptions, ExclusiveTypedCell, IpcConfig, IpcResult, Permission, ShmValue};

const CELL_NAME: &str = "demo_status";
const LOCK_NAME: &str = "demo_status_lock";

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct Status {
    value: i64,
    updated_unix_ms: u64,
    writes: u32,
    writer_pid: u32,
}

unsafe impl ShmValue for Status {}

/// Typed shared memory cell demo
#[derive(Parser, Debug)]
#[command(name = "demo_cell", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the cell, store <value>, and keep it alive until Enter
    Write { value: i64 },
    /// Attach read-only and print the current status
    Read,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn do_write(value: i64, config: IpcConfig) -> IpcResult<()> {
    let options = CellOptions::new().initial(Status::default()).config(config);
    let cell = match ExclusiveTypedCell::open_with(CELL_NAME, LOCK_NAME, Permission::CreateReadWrite, options) {
        // Another writer is still holding the region: join it.
        Err(e) if e.os_error().map(io::Error::kind) == Some(io::ErrorKind::AlreadyExists) => {
            ExclusiveTypedCell::open_with(
                CELL_NAME,
                LOCK_NAME,
                Permission::OpenReadWrite,
                CellOptions::new().config(config),
            )?
        }
        other => other?,
    };
    let status = cell.mutex_apply(|s| {
        s.value = value;
        s.updated_unix_ms = now_ms();
        s.writes += 1;
        s.writer_pid = std::process::id();
        *s
    })?;
    info!(value = status.value, writes = status.writes, "status written");
    println!("wrote {value}; press Enter to release the region");

    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
    Ok(())
}

fn do_read(config: IpcConfig) -> IpcResult<()> {
    let cell = ExclusiveTypedCell::<Status>::open_with(
        CELL_NAME,
        LOCK_NAME,
        Permission::OpenReadOnly,
        CellOptions::new().config(config),
    )?;
    let status = cell.read()?;
    println!(
        "value={} writes={} writer_pid={} updated_unix_ms={}",
        status.value, status.writes, status.writer_pid, status.updated_unix_ms
    );
    Ok(())
}

fn main() -> ExitCode {
    typed_ipc::init_tracing();
    let args = Args::parse();
    let config = IpcConfig::from_env();

    let result = match args.command {
        Command::Write { value } => do_write(value, config),
        Command::Read => do_read(config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo_cell failed");
            eprintln!("demo_cell: {e}");
            ExitCode::FAILURE
        }
    }
}
