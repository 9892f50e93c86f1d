//! Data-plane hot-path benchmarks: prefix hashing and hashtable probes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rust_ccnx_common::hasher::hash_prefixes;
use rust_ccnx_common::name::Name;
use rust_ccnx_common::siphash::hash_bytes;
use rust_ccnx_fwd::hashtable::Hashtable;

fn bench_prefix_hashing(c: &mut Criterion) {
    let name = Name::from_uri("/video/provider/catalog/title/segment/v1")
        .unwrap()
        .with_segment(42);
    let bytes = name.to_component_bytes();

    c.bench_function("hash_prefixes_6_comps", |b| {
        b.iter(|| hash_prefixes(black_box(&bytes), false, 0).unwrap())
    });

    c.bench_function("siphash_whole_name", |b| {
        b.iter(|| hash_bytes(black_box(&bytes)))
    });
}

fn bench_hashtable(c: &mut Criterion) {
    let mut table: Hashtable<u64> = Hashtable::new(64 * 1024, 0).unwrap();
    let mut keys = Vec::new();
    for i in 0..10_000u64 {
        let key = format!("/bench/object/{}", i).into_bytes();
        let hash = hash_bytes(&key);
        let node = table.alloc_node().unwrap();
        table.init_node(node, hash, &key).unwrap();
        table.node_mut(node).data = i;
        table.insert(node).unwrap();
        keys.push((key, hash));
    }

    c.bench_function("hashtable_lookup_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let (key, hash) = &keys[i % keys.len()];
            i += 1;
            table.lookup(black_box(key), *hash).unwrap()
        })
    });

    c.bench_function("hashtable_lookup_miss", |b| {
        let key = b"/bench/absent/object".to_vec();
        let hash = hash_bytes(&key);
        b.iter(|| table.lookup(black_box(&key), hash).is_err())
    });
}

criterion_group!(benches, bench_prefix_hashing, bench_hashtable);
criterion_main!(benches);
