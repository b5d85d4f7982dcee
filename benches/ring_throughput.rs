// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared memory primitive benchmarks.
//
// Run with:
//   cargo bench --bench ring_throughput
//
// Groups:
//   ring_duplex    write then read on one handle (semaphore cost only)
//   ring_spsc      producer thread and consumer on separate handles
//   cell           unsynchronized read/write vs mutex_apply
//
// Each ring group runs 8, 256 and 4096 byte elements.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use typed_ipc::{ExclusiveTypedCell, Permission, RingRole, SharedRingBuffer, ShmValue, TypedCell};

const SLOTS: usize = 64;
const SPSC_BATCH: u64 = 1024;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("bench_{prefix}_{}_{n}", std::process::id())
}

fn run_duplex<T: ShmValue>(c: &mut Criterion, label: &str, value: T) {
    let mut group = c.benchmark_group("ring_duplex");
    group.throughput(Throughput::Bytes(std::mem::size_of::<T>() as u64));

    let name = unique_name("duplex");
    let mut ring = SharedRingBuffer::<T, SLOTS>::open(&name, Permission::CreateReadWrite, RingRole::Duplex)
        .expect("create ring");
    group.bench_function(BenchmarkId::from_parameter(label), |b| {
        b.iter(|| {
            ring.write(black_box(value)).expect("write");
            black_box(ring.read().expect("read"))
        });
    });
    group.finish();
}

fn run_spsc<T: ShmValue>(c: &mut Criterion, label: &str, value: T) {
    let mut group = c.benchmark_group("ring_spsc");
    group.throughput(Throughput::Bytes(std::mem::size_of::<T>() as u64 * SPSC_BATCH));

    let name = unique_name("spsc");
    let mut consumer =
        SharedRingBuffer::<T, SLOTS>::open(&name, Permission::CreateReadOnly, RingRole::Consumer)
            .expect("create ring");
    let mut producer =
        SharedRingBuffer::<T, SLOTS>::open(&name, Permission::OpenReadWrite, RingRole::Producer)
            .expect("attach producer");

    group.bench_function(BenchmarkId::from_parameter(label), |b| {
        b.iter(|| {
            let producer = &mut producer;
            thread::scope(|s| {
                s.spawn(move || {
                    for _ in 0..SPSC_BATCH {
                        producer.write(value).expect("write");
                    }
                });
                for _ in 0..SPSC_BATCH {
                    black_box(consumer.read().expect("read"));
                }
            });
        });
    });
    group.finish();
}

fn bench_ring(c: &mut Criterion) {
    run_duplex(c, "small_8", 0xABu64);
    run_duplex(c, "medium_256", [0xABu8; 256]);
    run_duplex(c, "large_4096", [0xABu8; 4096]);

    run_spsc(c, "small_8", 0xABu64);
    run_spsc(c, "medium_256", [0xABu8; 256]);
    run_spsc(c, "large_4096", [0xABu8; 4096]);
}

fn bench_cell(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell");

    let name = unique_name("cell");
    let mut cell = TypedCell::<[u64; 8]>::open(&name, Permission::CreateReadWrite).expect("create cell");
    group.bench_function("typed_write_read", |b| {
        b.iter(|| {
            cell.write(black_box([7u64; 8])).expect("write");
            black_box(cell.read())
        });
    });

    let name = unique_name("xcell");
    let lock = unique_name("xlock");
    let xcell = ExclusiveTypedCell::<u64>::open(&name, &lock, Permission::CreateReadWrite).expect("create cell");
    group.bench_function("mutex_apply_increment", |b| {
        b.iter(|| xcell.mutex_apply(|n| *n += 1).expect("mutex_apply"));
    });

    group.finish();
}

criterion_group!(benches, bench_ring, bench_cell);
criterion_main!(benches);
