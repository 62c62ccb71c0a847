//! Benchmarks for HOB list creation and walking.
//!
//! ## Benchmark execution
//!
//! `> cargo bench -p pi_internal_hob --bench bench_walk`
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pi_internal_hob::HobList;
use pi_sdk::pi::hob;
use r_efi::efi;

fn guid(n: u32) -> efi::Guid {
    efi::Guid::from_fields(n, 0xabcd, 0xef01, 0x23, 0x45, &[0x67, 0x89, 0xab, 0xcd, 0xef, 0x01])
}

fn populated(records: u32) -> HobList {
    let mut hobs = HobList::new(0x1000_0000, 0x10_0000, 0).unwrap();
    for n in 0..records {
        match n % 3 {
            0 => hobs.build_guid_hob(&guid(n), &[n as u8; 32]).unwrap(),
            1 => hobs.build_fv_hob(u64::from(n) << 16, 0x1000).unwrap(),
            _ => hobs.build_memory_allocation_hob(&guid(n), u64::from(n) << 12, 0x1000, 4).unwrap(),
        };
    }
    hobs
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("hob_create");
    for records in [16u32, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &records| {
            b.iter(|| populated(black_box(records)))
        });
    }
    group.finish();
}

fn bench_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("hob_walk");
    for records in [16u32, 256, 1024] {
        let hobs = populated(records);
        let last = guid(records - records % 3 - 3);
        group.bench_with_input(BenchmarkId::new("iter", records), &hobs, |b, hobs| {
            b.iter(|| hobs.iter().map(|hob| hob.length()).sum::<usize>())
        });
        group.bench_with_input(BenchmarkId::new("iter_type", records), &hobs, |b, hobs| {
            b.iter(|| hobs.iter_type(black_box(hob::FV)).count())
        });
        group.bench_with_input(BenchmarkId::new("get_first_guid_hob", records), &hobs, |b, hobs| {
            b.iter(|| hobs.get_first_guid_hob(black_box(&last)).map(|hob| hob.offset()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create, bench_walk);
criterion_main!(benches);
