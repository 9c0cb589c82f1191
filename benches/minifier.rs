use criterion::{criterion_group, criterion_main, Criterion};
use whitvm::parse::read_source;
use whitvm::{minify, MinifyConfig};

pub fn minify_essential_benchmark(c: &mut Criterion) {
    let source = read_source("resources/adventure.whitvm").unwrap();
    c.bench_function("minify adventure essential", |b| {
        b.iter(|| minify(&source, &MinifyConfig::essential()).unwrap())
    });
}

pub fn minify_aggressive_benchmark(c: &mut Criterion) {
    let source = read_source("resources/adventure.whitvm").unwrap();
    c.bench_function("minify adventure aggressive", |b| {
        b.iter(|| minify(&source, &MinifyConfig::aggressive()).unwrap())
    });
}

criterion_group!(
    minifier,
    minify_essential_benchmark,
    minify_aggressive_benchmark
);
criterion_main!(minifier);
