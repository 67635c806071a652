use criterion::{criterion_group, criterion_main};

mod signals;

mod fingerprint_benches;
mod engine_benches;

criterion_group!(
    benches,
    offset_benches::bench_offset_estimator,
    fingerprint_benches::bench_fingerprint,
    engine_benches::bench_engine_cycle,
);

criterion_main!(benches);
