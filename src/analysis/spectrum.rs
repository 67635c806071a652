//! Windowed magnitude spectra shared by the tone detector and the spectral comparators.

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use std::sync::Arc;

use crate::util;

/// A forward real FFT with a fixed Hann window. The input is zero padded or truncated to the FFT
/// size.
pub struct SpectrumAnalyzer {
    plan: Arc<dyn RealToComplex<f32>>,
    window_function: Vec<f32>,
    /// Windowed copy of the input. realfft uses this as scratch space.
    real_buffer: Vec<f32>,
    complex_buffer: Vec<Complex32>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let complex_buffer = plan.make_output_vec();
        let num_bins = complex_buffer.len();

        Self {
            plan,
            window_function: util::window::hann(fft_size),
            real_buffer: Vec::with_capacity(fft_size),
            complex_buffer,
            magnitudes: vec![0.0; num_bins],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window_function.len()
    }

    /// `fft_size / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.magnitudes.len()
    }

    /// Width of a single bin in Hz.
    pub fn bin_width(&self, sample_rate: f32) -> f32 {
        sample_rate / self.fft_size() as f32
    }

    /// Compute the raw complex spectrum of the windowed input.
    pub fn spectrum(&mut self, samples: &[f32]) -> &[Complex32] {
        util::window::copy_windowed(samples, &self.window_function, &mut self.real_buffer);
        if let Err(err) = self.plan.process(&mut self.real_buffer, &mut self.complex_buffer) {
            log::debug!("Forward FFT failed: {err}");
            self.complex_buffer.fill(Complex32::new(0.0, 0.0));
        }

        &self.complex_buffer
    }

    /// Compute `|X[k]|` for every bin of the windowed input.
    pub fn magnitudes(&mut self, samples: &[f32]) -> &[f32] {
        self.spectrum(samples);
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.complex_buffer) {
            *magnitude = bin.norm();
        }

        &self.magnitudes
    }

    /// The same as [`magnitudes()`][Self::magnitudes()], but each bin is divided by `norm` and
    /// converted to decibels.
    pub fn levels_db(&mut self, samples: &[f32], norm: f32, levels: &mut Vec<f32>) {
        let magnitudes = self.magnitudes(samples);
        levels.clear();
        levels.extend(magnitudes.iter().map(|m| util::gain_to_db(m / norm)));
    }
}
