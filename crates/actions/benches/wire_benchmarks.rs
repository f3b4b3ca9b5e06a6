use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use nooble_actions::{codec, ActionType, DomainAction, JsonMap, NameBuilder};
use nooble_core::{CorrelationId, ServiceName, TenantId};

fn sample_action() -> DomainAction {
    let mut data = JsonMap::new();
    data.insert("q".to_string(), serde_json::json!("what changed yesterday"));
    data.insert("top_k".to_string(), serde_json::json!(8));
    data.insert(
        "filters".to_string(),
        serde_json::json!({"collection": "docs", "lang": ["en", "es"]}),
    );

    DomainAction::new(
        ActionType::parse("query.rag.search").unwrap(),
        ServiceName::new("orchestrator"),
    )
    .with_tenant(TenantId::new("t1"))
    .with_correlation(CorrelationId::generate())
    .with_data(data)
}

fn bench_envelope_codec(c: &mut Criterion) {
    let action = sample_action();
    let encoded = codec::encode(&action).unwrap();

    let mut group = c.benchmark_group("envelope_codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| codec::encode(black_box(&action)).unwrap())
    });
    group.bench_function("decode", |b| {
        b.iter(|| codec::decode(black_box(&encoded)).unwrap())
    });

    group.finish();
}

fn bench_name_derivation(c: &mut Criterion) {
    let names = NameBuilder::default();

    c.bench_function("names/action_stream", |b| {
        b.iter(|| names.action_stream(black_box("ingestion"), None))
    });
    c.bench_function("names/response_queue", |b| {
        b.iter(|| {
            names.response_queue(
                black_box("orchestrator"),
                None,
                black_box("query.rag.search"),
                black_box("c1"),
            )
        })
    });
}

criterion_group!(benches, bench_envelope_codec, bench_name_derivation);
criterion_main!(benches);
