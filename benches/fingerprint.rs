//! Fingerprint throughput for small and nested payloads.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use usage_governor::cache::fingerprint;

fn bench_fingerprint(c: &mut Criterion) {
    let small = json!({"mood": 7, "energy": "high", "time_context": "morning"});
    let moods: Vec<_> = (0..30)
        .map(|i| json!({"intensity": i % 10, "note": format!("day {i}")}))
        .collect();
    let nested = json!({
        "recent_moods": moods,
        "profile": {"goals": ["focus", "sleep", "exercise"], "timezone": "Europe/Berlin"},
    });

    c.bench_function("fingerprint_small", |b| {
        b.iter(|| {
            fingerprint(
                black_box("greeting"),
                black_box(Some("alice")),
                black_box(&small),
            )
        })
    });
    c.bench_function("fingerprint_nested", |b| {
        b.iter(|| {
            fingerprint(
                black_box("weekly_summary"),
                black_box(Some("alice")),
                black_box(&nested),
            )
        })
    });
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
