//! Benchmarks for diff application

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use settle_incremental::prelude::*;

fn entity_diff(entities: usize) -> Diff {
    let mut diff = Diff::new();
    for n in 0..entities {
        let e = format!("e{}", n);
        diff.push_insert(Triple::new(e.as_str(), "tag", "row"));
        diff.push_insert(Triple::new(e.as_str(), "name", format!("row {}", n)));
        diff.push_insert(Triple::new(e.as_str(), "x", n as i64));
    }
    diff
}

fn bench_apply_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_inserts");
    for size in [10, 100, 1000] {
        let diff = entity_diff(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &diff, |b, diff| {
            b.iter(|| {
                let mut store = RecordStore::new("bench");
                black_box(store.apply_diff(black_box(diff)));
            })
        });
    }
    group.finish();
}

fn bench_replace_value(c: &mut Criterion) {
    let mut store = RecordStore::new("bench");
    store.apply_diff(&entity_diff(1000));
    let mut current = 0i64;

    c.bench_function("replace_single_value", |b| {
        b.iter(|| {
            let next = current + 1;
            let diff = Diff::from_parts(
                vec![Triple::new("e0", "x", current)],
                vec![Triple::new("e0", "x", next)],
            );
            black_box(store.apply_diff(&diff));
            current = next;
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut store = RecordStore::new("bench");
    store.apply_diff(&entity_diff(1000));
    let tag = Attribute::new("tag");
    let row = Value::from("row");

    c.bench_function("scan_attribute_value", |b| {
        b.iter(|| black_box(store.scan(None, Some(&tag), Some(&row))))
    });
}

criterion_group!(benches, bench_apply_inserts, bench_replace_value, bench_scan);
criterion_main!(benches);
