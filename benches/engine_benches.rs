use criterion::{BenchmarkId, Criterion};
use leg_compare::{
    CaptureRing, ComparatorSettings, Engine, LogSink, MonitorConfig, OutputMask, StatusReporter,
};
use std::sync::Arc;
use std::time::Duration;

use crate::signals::{interleave, program};

pub fn bench_engine_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");

    let comparators = [
        ("perceptual_hash", r#"{ "type": "perceptual_hash" }"#),
        ("amplitude_minus", r#"{ "type": "amplitude_minus" }"#),
        ("spectral_diff", r#"{ "type": "spectral_diff" }"#),
    ];
    for (name, settings) in comparators {
        group.bench_with_input(BenchmarkId::new("cycle", name), settings, |b, settings| {
            let mut config = MonitorConfig::default();
            config.comparator = serde_json::from_str::<ComparatorSettings>(settings)
                .expect("valid comparator settings");
            let window_len = config.window_config().window_len();

            let ring = Arc::new(CaptureRing::new(config.window_config(), window_len));
            let reporter = Arc::new(StatusReporter::new(
                Box::new(LogSink),
                OutputMask::ForceOff,
                false,
            ));
            let mut engine = Engine::new(&config, Arc::clone(&ring), reporter);

            let block = interleave(&program(window_len, 0), &program(window_len, 200));

            b.iter(|| {
                // The window widens whenever lock is lost, so top up until it is ready
                while !ring.wait_for_window(Duration::ZERO) {
                    ring.push_interleaved(&block);
                }
                engine.run_cycle()
            });
        });
    }

    group.finish();
}
