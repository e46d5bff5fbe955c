//! Benchmarks for lens chain lookups.
//!
//! Measures lookup cost through deep layer chains, as built up by a long pipeline of
//! whole-program passes:
//! - Type lookups of class, array and untouched types
//! - Method signature lookups of moved methods
//! - Prototype change lookups
//! - Layer construction on top of a deep chain

extern crate bytelens;

use bytelens::graph::{DexType, GraphLens, LensBuilder, LensKind, MethodRef, Proto, RewrittenPrototypeDescription};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn class(index: usize) -> DexType {
    DexType::class(&format!("pkg/C{index}"))
}

fn method(holder: &DexType, param: &DexType) -> MethodRef {
    MethodRef::new(holder.clone(), "run", Proto::new(DexType::void(), vec![param.clone()]))
}

/// Builds `depth` layers, layer `i` mapping `C{i}` to `C{i+1}` and moving `run(C{i})`.
///
/// Merging describes no prototype change, so any number of layers compose.
fn chain(depth: usize) -> GraphLens {
    let mut lens = GraphLens::identity();
    let holder = DexType::class("pkg/Main");
    for index in 0..depth {
        let mut builder = LensBuilder::new(LensKind::VerticalClassMerging);
        builder.map_type(class(index), class(index + 1));
        builder.move_method_with_prototype_changes(
            method(&holder, &class(index)),
            method(&holder, &class(index + 1)),
            RewrittenPrototypeDescription::none(),
        );
        if let Ok(Some(next)) = builder.build(&lens) {
            lens = next;
        }
    }
    lens
}

/// Benchmark type lookups at increasing chain depths.
fn bench_lookup_type(c: &mut Criterion) {
    let mut group = c.benchmark_group("lens_lookup_type");
    for depth in [1, 8, 64, 256] {
        let lens = chain(depth);
        let first = class(0);
        let array = first.to_array(2);
        let untouched = DexType::string();
        group.bench_with_input(BenchmarkId::new("mapped", depth), &depth, |b, _| {
            b.iter(|| black_box(lens.lookup_type(black_box(&first))));
        });
        group.bench_with_input(BenchmarkId::new("array", depth), &depth, |b, _| {
            b.iter(|| black_box(lens.lookup_type(black_box(&array))));
        });
        group.bench_with_input(BenchmarkId::new("untouched", depth), &depth, |b, _| {
            b.iter(|| black_box(lens.lookup_type(black_box(&untouched))));
        });
    }
    group.finish();
}

/// Benchmark method signature lookups at increasing chain depths.
fn bench_lookup_method_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("lens_lookup_method_signature");
    let holder = DexType::class("pkg/Main");
    for depth in [1, 8, 64, 256] {
        let lens = chain(depth);
        let original = method(&holder, &class(0));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(lens.lookup_method_signature(black_box(&original))));
        });
    }
    group.finish();
}

/// Benchmark prototype change lookups, which walk every layer when nothing changed.
fn bench_lookup_prototype_changes(c: &mut Criterion) {
    let mut group = c.benchmark_group("lens_lookup_prototype_changes");
    let holder = DexType::class("pkg/Main");
    for depth in [1, 8, 64, 256] {
        let lens = chain(depth);
        let current = method(&holder, &class(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(lens.lookup_prototype_changes(black_box(&current))));
        });
    }
    group.finish();
}

/// Benchmark building one more layer on top of a deep chain.
fn bench_build_layer(c: &mut Criterion) {
    let base = chain(64);
    c.bench_function("lens_build_layer_on_64", |b| {
        b.iter(|| {
            let mut builder = LensBuilder::new(LensKind::EnumUnboxing);
            builder.map_type(DexType::class("pkg/Color"), DexType::int());
            black_box(builder.build(black_box(&base)))
        });
    });
}

criterion_group!(
    benches,
    bench_lookup_type,
    bench_lookup_method_signature,
    bench_lookup_prototype_changes,
    bench_build_layer
);
criterion_main!(benches);
