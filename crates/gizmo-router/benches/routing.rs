//! Routing benchmarks.
//!
//! Run with: `cargo bench -p gizmo-router`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gizmo_router::{ExactRouter, PatternRouter};
use http::Method;

fn build_router(num_routes: usize) -> PatternRouter<usize> {
    let mut router = PatternRouter::new();
    let third = num_routes / 3;

    for i in 0..third {
        router
            .insert(Method::GET, &format!("/api/v1/resource{i}"), i)
            .unwrap();
    }
    for i in 0..third {
        router
            .insert(Method::GET, &format!("/api/v1/resource{i}/{{id:[0-9]+}}"), i)
            .unwrap();
    }
    for i in 0..third {
        router
            .insert(
                Method::GET,
                &format!("/api/v1/org/{{org}}/resource{i}/{{id}}"),
                i,
            )
            .unwrap();
    }

    router
}

fn bench_static_match(c: &mut Criterion) {
    let router = build_router(100);

    c.bench_function("static_match", |b| {
        b.iter(|| black_box(router.match_route(&Method::GET, "/api/v1/resource20")));
    });
}

fn bench_pattern_match(c: &mut Criterion) {
    let router = build_router(100);

    c.bench_function("pattern_match", |b| {
        b.iter(|| black_box(router.match_route(&Method::GET, "/api/v1/resource25/12345")));
    });
}

fn bench_nested_var_match(c: &mut Criterion) {
    let router = build_router(100);

    c.bench_function("nested_var_match", |b| {
        b.iter(|| {
            black_box(router.match_route(&Method::GET, "/api/v1/org/acme-corp/resource10/12345"))
        });
    });
}

fn bench_exact_match(c: &mut Criterion) {
    let mut router = ExactRouter::new();
    for i in 0..100 {
        router
            .insert(Method::GET, &format!("/api/v1/resource{i}"), i)
            .unwrap();
    }

    c.bench_function("exact_match", |b| {
        b.iter(|| black_box(router.match_route(&Method::GET, "/api/v1/resource50")));
    });
}

fn bench_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("scaling");

    for num_routes in [10, 50, 100, 500] {
        let router = build_router(num_routes);

        group.bench_with_input(
            BenchmarkId::new("pattern_match", num_routes),
            &num_routes,
            |b, &n| {
                let path = format!("/api/v1/resource{}/12345", n / 6);
                b.iter(|| black_box(router.match_route(&Method::GET, &path)));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_static_match,
    bench_pattern_match,
    bench_nested_var_match,
    bench_exact_match,
    bench_scaling
);
criterion_main!(benches);
