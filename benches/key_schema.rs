//! Benchmarks for the key schema hot paths.
//!
//! Every GC page parses each listed key and every typed read builds one, so
//! both directions should stay in the sub-microsecond range.

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use ttlstore::storage::keys::{self, EntityKind};

const THREAD_ID: &str = "thread_0192f1c2a7b84e2f9d3c5a6b7e8f9012";
const MESSAGE_ID: &str = "msg_0192f1c2a7b84e2f9d3c5a6b7e8f9013";

// ============================================================================
// Key construction
// ============================================================================

fn bench_key_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_construction");

    group.bench_function("singleton", |b| {
        b.iter(|| keys::key_for(black_box(EntityKind::Thread), black_box(THREAD_ID)));
    });

    group.bench_function("scoped", |b| {
        b.iter(|| {
            keys::scoped_key_for(
                black_box(EntityKind::Message),
                black_box(THREAD_ID),
                black_box(MESSAGE_ID),
            )
        });
    });

    group.bench_function("file_meta", |b| {
        b.iter(|| keys::file_meta_key(black_box(MESSAGE_ID)));
    });

    group.bench_function("prefix", |b| {
        b.iter(|| keys::prefix_for(black_box(EntityKind::Run)));
    });

    group.finish();
}

// ============================================================================
// Key parsing
// ============================================================================

fn bench_key_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_parsing");

    let cases = [
        (
            "thread",
            EntityKind::Thread,
            keys::key_for(EntityKind::Thread, THREAD_ID).unwrap_or_default(),
        ),
        (
            "message",
            EntityKind::Message,
            keys::scoped_key_for(EntityKind::Message, THREAD_ID, MESSAGE_ID).unwrap_or_default(),
        ),
        (
            "file_blob",
            EntityKind::File,
            keys::file_blob_key(MESSAGE_ID).unwrap_or_default(),
        ),
        ("foreign", EntityKind::Run, "runs/not-a-run".to_string()),
    ];

    for (name, kind, key) in &cases {
        group.bench_with_input(BenchmarkId::new("parse", name), key, |b, key| {
            b.iter(|| keys::parse_key(black_box(key), black_box(*kind)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_key_construction, bench_key_parsing);
criterion_main!(benches);
