//! Performance benchmarks for SkyTrack
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use skytrack::state::{JobCollection, StateStore};
use skytrack::sweep::{expand_grid, OrderedMap, ParamValue, SlugPolicy};
use tempfile::TempDir;

/// Grid with `keys` parameters of `width` candidates each
fn make_space(keys: usize, width: usize) -> OrderedMap<Vec<ParamValue>> {
    (0..keys)
        .map(|k| {
            let values = (0..width)
                .map(|v| ParamValue::Float(10f64.powi(-(v as i32)) * (k + 1) as f64))
                .collect::<Vec<_>>();
            (format!("p{}", k), values)
        })
        .collect()
}

fn bench_grid_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_expansion");

    for (keys, width) in [(2, 10), (3, 10), (4, 8)] {
        let space = make_space(keys, width);
        let jobs = width.pow(keys as u32);
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", keys, width)),
            &space,
            |b, space| b.iter(|| black_box(expand_grid(space))),
        );
    }

    group.finish();
}

fn bench_slug_render(c: &mut Criterion) {
    let assignments = expand_grid(&make_space(3, 10));
    let policy = SlugPolicy::new("p0{p0:g}-p1{p1:g}-p2{p2}-{index}-{uid}").unwrap();

    c.bench_function("slug_render_1000", |b| {
        b.iter(|| {
            for (i, a) in assignments.iter().enumerate() {
                black_box(policy.render(a, "ab12", i).unwrap());
            }
        });
    });
}

fn bench_state_save(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("jobs.json"));
    let policy = SlugPolicy::new("{index}-{uid}").unwrap();
    let jobs = JobCollection::populate(expand_grid(&make_space(3, 10)), &policy, None).unwrap();

    c.bench_function("state_save_1000_jobs", |b| {
        b.iter(|| store.save(black_box(&jobs)).unwrap());
    });
}

criterion_group!(benches, bench_grid_expansion, bench_slug_render, bench_state_save);

criterion_main!(benches);
