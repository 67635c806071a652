use std::f32::consts::TAU;

pub const SAMPLE_RATE: u32 = 48000;

/// A few unrelated sines, with `b` lagging `a` by `delay` samples.
pub fn program(len: usize, delay: i64) -> Vec<f32> {
    (0..len)
        .map(|n| {
            let t = (n as i64 - delay) as f32 / SAMPLE_RATE as f32;
            [220.0, 347.0, 1031.0, 2713.0]
                .iter()
                .map(|freq| 0.2 * (TAU * freq * t).sin())
                .sum()
        })
        .collect()
}

pub fn interleave(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).flat_map(|(a, b)| [*a, *b]).collect()
}
