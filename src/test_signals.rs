//! Synthetic signals for the unit tests.

use std::f32::consts::TAU;

pub const SAMPLE_RATE: f32 = 48000.0;
const MULTI_SINE_FREQUENCIES: [f32; 4] = [220.0, 347.0, 1031.0, 2713.0];

/// `len` samples of a 0.5 amplitude sine, delayed by `delay` samples.
pub fn sine(frequency: f32, len: usize, delay: i64) -> Vec<f32> {
    (0..len as i64)
        .map(|n| 0.5 * (TAU * frequency * (n - delay) as f32 / SAMPLE_RATE).sin())
        .collect()
}

pub fn tone(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| amplitude * (TAU * frequency * n as f32 / SAMPLE_RATE).sin())
        .collect()
}

/// Four unrelated partials, delayed by `delay` samples. Unlike a single sine this has an
/// unambiguous correlation peak.
pub fn multi_sine(len: usize, delay: i64) -> Vec<f32> {
    (0..len as i64)
        .map(|n| {
            let t = (n - delay) as f32 / SAMPLE_RATE;
            MULTI_SINE_FREQUENCIES
                .iter()
                .map(|f| 0.2 * (TAU * f * t).sin())
                .sum()
        })
        .collect()
}

/// Deterministic white noise in `[-amplitude, amplitude]`.
pub fn noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0) * amplitude
        })
        .collect()
}
