//! Canonical Encoding Benchmarks
//!
//! Measures baseline performance of the grit wire format:
//! - Blob encode/decode at small and medium payloads
//! - Tree encode with many entries
//! - Content-id hashing (encode + SHA-256)

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

// Layer 1: Standard library imports
use std::hint::black_box;

// Layer 2: Third-party crate imports
use criterion::{criterion_group, criterion_main, Criterion};

// Layer 3: Internal module imports
use loam_grit::{bytes_to_object, id_of, object_to_bytes, Blob, Object, ObjectId, Tree};

fn bench_blob_encode(c: &mut Criterion) {
    let small = Object::Blob(Blob::new(vec![7u8; 64]));
    let medium = Object::Blob(Blob::new(vec![7u8; 64 * 1024]));

    c.bench_function("blob_encode_64b", |b| {
        b.iter(|| object_to_bytes(black_box(&small)))
    });
    c.bench_function("blob_encode_64k", |b| {
        b.iter(|| object_to_bytes(black_box(&medium)))
    });
}

fn bench_blob_decode(c: &mut Criterion) {
    let bytes = object_to_bytes(&Object::Blob(Blob::new(vec![7u8; 64 * 1024])));
    c.bench_function("blob_decode_64k", |b| {
        b.iter(|| bytes_to_object(black_box(&bytes)).unwrap())
    });
}

fn bench_tree_encode(c: &mut Criterion) {
    let tree: Tree = (0..256)
        .map(|i| (format!("entry_{i:04}"), ObjectId::digest(&[i as u8])))
        .collect();
    let object = Object::Tree(tree);
    c.bench_function("tree_encode_256", |b| {
        b.iter(|| object_to_bytes(black_box(&object)))
    });
}

fn bench_content_id(c: &mut Criterion) {
    let object = Object::Blob(Blob::new(vec![7u8; 4096]));
    c.bench_function("content_id_4k", |b| b.iter(|| id_of(black_box(&object))));
}

criterion_group!(
    benches,
    bench_blob_encode,
    bench_blob_decode,
    bench_tree_encode,
    bench_content_id
);
criterion_main!(benches);
