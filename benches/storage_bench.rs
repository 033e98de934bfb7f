//! Benchmarks for CaskDB storage operations

use caskdb::config::{Config, SyncStrategy};
use caskdb::engine::Engine;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tempfile::TempDir;

const VALUE_LEN: usize = 128;
const PRELOADED_KEYS: usize = 10_000;

fn open_engine(temp_dir: &TempDir) -> Engine {
    let config = Config::builder()
        .dir_path(temp_dir.path().join("bench"))
        .sync_strategy(SyncStrategy::Never)
        .build();
    Engine::open(config).unwrap()
}

fn random_value() -> Vec<u8> {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VALUE_LEN)
        .collect()
}

fn key(i: usize) -> Vec<u8> {
    format!("bench-key-{:09}", i).into_bytes()
}

fn storage_benchmarks(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(&temp_dir);
    let value = random_value();

    for i in 0..PRELOADED_KEYS {
        engine.put(&key(i), &value).unwrap();
    }

    let mut next = PRELOADED_KEYS;
    c.bench_function("put", |b| {
        b.iter(|| {
            engine.put(&key(next), &value).unwrap();
            next += 1;
        })
    });

    c.bench_function("get", |b| {
        let mut rng = thread_rng();
        b.iter(|| {
            let i = rng.gen_range(0..PRELOADED_KEYS);
            engine.get(&key(i)).unwrap()
        })
    });

    c.bench_function("delete", |b| {
        b.iter_batched(
            || {
                let k = key(thread_rng().gen_range(0..usize::MAX));
                engine.put(&k, &value).unwrap();
                k
            },
            |k| engine.delete(&k).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, storage_benchmarks);
criterion_main!(benches);
