use criterion::{criterion_group, criterion_main, Criterion};
use static_multiset::{Device, EmptyKey, StaticMultiset, Stream};
use std::time::Instant;

fn stream() -> Stream {
    let device = Device::new().unwrap();
    Stream::new(&device).unwrap()
}

fn insert(c: &mut Criterion) {
    let stream = stream();
    c.bench_function("StaticMultiset: insert", |b| {
        b.iter_custom(|iters| {
            let keys: Vec<u64> = (0..iters).map(|k| k % 1024).collect();
            let multiset: StaticMultiset<u64> =
                StaticMultiset::new(keys.len() * 2, EmptyKey(u64::MAX), &stream).unwrap();
            stream.synchronize().unwrap();
            let start = Instant::now();
            multiset.insert(&keys, &stream).unwrap();
            start.elapsed()
        })
    });
}

fn contains(c: &mut Criterion) {
    let stream = stream();
    c.bench_function("StaticMultiset: contains", |b| {
        b.iter_custom(|iters| {
            let keys: Vec<u64> = (0..iters).collect();
            let multiset: StaticMultiset<u64> =
                StaticMultiset::new(keys.len() * 2, EmptyKey(u64::MAX), &stream).unwrap();
            multiset.insert(&keys, &stream).unwrap();
            let mut output = vec![false; keys.len()];
            let start = Instant::now();
            multiset.contains(&keys, &mut output, &stream).unwrap();
            let elapsed = start.elapsed();
            assert!(output.iter().all(|found| *found));
            elapsed
        })
    });
}

fn count(c: &mut Criterion) {
    let stream = stream();
    c.bench_function("StaticMultiset: count, duplicates", |b| {
        b.iter_custom(|iters| {
            let keys: Vec<u64> = (0..iters).map(|k| k % 64).collect();
            let multiset: StaticMultiset<u64> =
                StaticMultiset::new(keys.len() * 2, EmptyKey(u64::MAX), &stream).unwrap();
            multiset.insert(&keys, &stream).unwrap();
            let queries: Vec<u64> = (0..64).collect();
            let start = Instant::now();
            let count = multiset.count(&queries, &stream).unwrap();
            let elapsed = start.elapsed();
            assert_eq!(count, keys.len());
            elapsed
        })
    });
}

criterion_group!(static_multiset, insert, contains, count);
criterion_main!(static_multiset);
