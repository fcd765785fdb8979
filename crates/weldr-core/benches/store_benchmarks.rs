use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use weldr_backend::mock::{fixture_depsolver, fixture_registry};
use weldr_backend::InMemoryJobQueue;
use weldr_core::{Adapters, Weldr, WeldrConfig};
use weldr_schema::{Blueprint, Package};
use weldr_store::BlueprintStore;

fn blueprint(name: &str, packages: usize) -> Blueprint {
    let mut bp = Blueprint::new(name);
    bp.version = "1.0.0".to_owned();
    bp.packages = (0..packages)
        .map(|i| Package::new(format!("pkg-{i}"), "*"))
        .collect();
    bp
}

fn populated_store(count: usize) -> BlueprintStore {
    let store = BlueprintStore::new();
    for i in 0..count {
        store.push(blueprint(&format!("bp-{i}"), 10), "bench").unwrap();
    }
    store
}

fn bench_push(c: &mut Criterion) {
    c.bench_function("store_push_50pkg", |b| {
        b.iter_with_setup(BlueprintStore::new, |store| {
            store.push(blueprint("bench", 50), "bench").unwrap();
        });
    });
}

fn bench_push_history(c: &mut Criterion) {
    c.bench_function("store_push_bumps_100_revisions", |b| {
        b.iter_with_setup(BlueprintStore::new, |store| {
            for i in 0..100 {
                store.push(blueprint("bench", i % 7), "bench").unwrap();
            }
        });
    });
}

fn bench_list(c: &mut Criterion) {
    let store = populated_store(500);
    c.bench_function("store_list_500", |b| {
        b.iter(|| store.list());
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let store = populated_store(500);
    c.bench_function("store_snapshot_500", |b| {
        b.iter(|| store.snapshot());
    });
}

fn bench_engine_push(c: &mut Criterion) {
    c.bench_function("engine_push_persisted", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let adapters = Adapters {
                    depsolver: Arc::new(fixture_depsolver()),
                    queue: Arc::new(InMemoryJobQueue::new()),
                    registry: Arc::new(fixture_registry()),
                };
                let weldr = Weldr::open(&WeldrConfig::new(dir.path()), adapters).unwrap();
                (dir, weldr)
            },
            |(_dir, weldr)| {
                weldr.push_blueprint(blueprint("bench", 20)).unwrap();
                weldr.flush();
            },
        );
    });
}

criterion_group!(
    benches,
    bench_push,
    bench_push_history,
    bench_list,
    bench_snapshot,
    bench_engine_push,
);
criterion_main!(benches);
