//! Windowing functions used by every FFT-based analysis in this crate.

use std::f32;

/// A Hann window function.
///
/// <https://en.wikipedia.org/wiki/Hann_function>
pub fn hann(size: usize) -> Vec<f32> {
    let mut window = vec![0.0; size];
    hann_in_place(&mut window);

    window
}

/// The same as [`hann()`], but filling an existing slice instead.
pub fn hann_in_place(window: &mut [f32]) {
    let size = window.len();
    if size < 2 {
        window.fill(1.0);
        return;
    }

    // We want to scale `[0, size - 1]` to `[0, pi]`.
    // XXX: The `sin^2()` version results in weird rounding errors that cause spectral leakage
    let scale = (size as f32 - 1.0).recip() * f32::consts::TAU;
    for (i, sample) in window.iter_mut().enumerate() {
        let cos = (i as f32 * scale).cos();
        *sample = 0.5 - (0.5 * cos)
    }
}

/// Copy `input` into `output` while applying the window. `output` is resized to the window length
/// and any samples past the end of `input` are zero padded.
pub fn copy_windowed(input: &[f32], window_function: &[f32], output: &mut Vec<f32>) {
    output.clear();
    output.extend(
        window_function
            .iter()
            .enumerate()
            .map(|(i, w)| input.get(i).copied().unwrap_or(0.0) * w),
    );
}
