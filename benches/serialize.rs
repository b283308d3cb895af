#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use vivicode::{deserialize, serialize, to_json, JsValue};

// --- SETUP ---

fn wide_object(fields: usize) -> JsValue {
    let obj = JsValue::empty_object();
    for i in 0..fields {
        obj.set_prop(format!("field_{i}"), JsValue::number(i as f64));
    }
    obj
}

fn shared_graph(width: usize) -> JsValue {
    // One shared leaf referenced from every slot, plus a cycle at the root.
    let leaf = JsValue::object(vec![("kind", JsValue::string("leaf"))]);
    let root = JsValue::array((0..width).map(|_| leaf.clone()).collect());
    let holder = JsValue::object(vec![("items", root)]);
    holder.set_prop("self", holder.clone());
    holder
}

// --- BENCHES ---

fn bench_serialize(c: &mut Criterion) {
    let flat = wide_object(256);
    let graph = shared_graph(128);

    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Elements(256));
    group.bench_function("flat_object_256", |b| {
        b.iter(|| serialize(black_box(&flat)))
    });
    group.throughput(Throughput::Elements(128));
    group.bench_function("shared_graph_128", |b| {
        b.iter(|| serialize(black_box(&graph)))
    });
    group.finish();
}

fn bench_json_form(c: &mut Criterion) {
    let graph = shared_graph(128);
    c.bench_function("to_json_shared_graph_128", |b| {
        b.iter(|| to_json(black_box(&graph)))
    });
}

fn bench_round_trip(c: &mut Criterion) {
    let graph = shared_graph(32);
    let source = serialize(&graph).expect("serializable graph");
    c.bench_function("deserialize_shared_graph_32", |b| {
        b.iter(|| deserialize(black_box(&source)))
    });
}

criterion_group!(benches, bench_serialize, bench_json_form, bench_round_trip);
criterion_main!(benches);
