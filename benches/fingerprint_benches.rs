use criterion::{black_box, BenchmarkId, Criterion};
use leg_compare::compare::fingerprint::{match_confidence, Fingerprinter};

use crate::signals::{program, SAMPLE_RATE};

pub fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for len in [4096, 16384] {
        group.bench_with_input(BenchmarkId::new("fingerprint", len), &len, |b, &len| {
            let samples = program(len, 0);
            let mut fingerprinter = Fingerprinter::new(SAMPLE_RATE as f32);
            let mut words = Vec::new();

            b.iter(|| fingerprinter.fingerprint(black_box(&samples), &mut words));
        });
    }

    group.bench_function("match_confidence", |b| {
        let mut fingerprinter = Fingerprinter::new(SAMPLE_RATE as f32);
        let mut words_a = Vec::new();
        let mut words_b = Vec::new();
        fingerprinter.fingerprint(&program(16384, 0), &mut words_a);
        fingerprinter.fingerprint(&program(8192, 0), &mut words_b);

        b.iter(|| match_confidence(black_box(&words_a), black_box(&words_b), 0.3));
    });

    group.finish();
}
