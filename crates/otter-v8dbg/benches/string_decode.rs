//! String decoding benchmarks
//!
//! Measures throughput of sequential strings and the overhead of walking
//! cons trees.
//!
//! Run with: `cargo bench -p otter-v8dbg string`

#[path = "../tests/common/mod.rs"]
mod common;

use common::HeapBuilder;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use otter_v8dbg::{AllocPolicy, EscapeMode, HeapInspector, StringBuffer, V8String, WriteFlags};
use std::hint::black_box;

fn seq_string_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("seq_string");

    for len in [16usize, 1024, 64 * 1024] {
        let mut builder = HeapBuilder::new();
        let text = "abcdefghijklmnop".repeat(len / 16);
        let string = builder.seq_string(&text);
        let (image, layout) = builder.build();
        let heap = HeapInspector::new(&image, layout);

        for mode in [EscapeMode::Raw, EscapeMode::Json] {
            group.bench_with_input(BenchmarkId::new(format!("{mode:?}"), len), &len, |b, &len| {
                b.iter(|| {
                    let loaded = V8String::load(&heap, string, AllocPolicy::Blocking).unwrap();
                    let mut buf = StringBuffer::new(len + 16);
                    loaded
                        .write(&heap, &mut buf, mode, WriteFlags::default())
                        .unwrap();
                    black_box(buf.len())
                })
            });
        }
    }

    group.finish();
}

fn cons_tree_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cons_tree");

    for depth in [8usize, 64, 256] {
        let mut builder = HeapBuilder::new();
        let leaf = builder.seq_string("chunk-");
        let mut string = leaf;
        for _ in 0..depth {
            string = builder.cons_string(string, leaf);
        }
        let (image, layout) = builder.build();
        let heap = HeapInspector::new(&image, layout);

        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, _| {
            b.iter(|| {
                let loaded = V8String::load(&heap, string, AllocPolicy::Blocking).unwrap();
                black_box(loaded.to_text(&heap, 4096, EscapeMode::Raw).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, seq_string_benchmark, cons_tree_benchmark);
criterion_main!(benches);
