//! Integer sample offset estimation between the two legs.
//!
//! Both windows are Hann tapered and circularly cross-correlated through the FFT. A positive
//! result means the B leg lags the A leg, so `b[n + offset] == a[n]`.

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use std::sync::Arc;

use crate::util;

/// Cross-correlation based offset estimator. The FFT plans are cached for the last analysed
/// length, so repeated calls with the same window size do not allocate.
pub struct OffsetEstimator {
    planner: RealFftPlanner<f32>,
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    window_function: Vec<f32>,

    buffer_a: Vec<f32>,
    buffer_b: Vec<f32>,
    spectrum_a: Vec<Complex32>,
    spectrum_b: Vec<Complex32>,
    correlation: Vec<f32>,
}

impl OffsetEstimator {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);

        Self {
            spectrum_a: forward.make_output_vec(),
            spectrum_b: forward.make_output_vec(),
            correlation: inverse.make_output_vec(),
            buffer_a: Vec::with_capacity(len),
            buffer_b: Vec::with_capacity(len),
            window_function: util::window::hann(len),
            planner,
            len,
            forward,
            inverse,
        }
    }

    fn resize(&mut self, len: usize) {
        self.forward = self.planner.plan_fft_forward(len);
        self.inverse = self.planner.plan_fft_inverse(len);
        self.spectrum_a = self.forward.make_output_vec();
        self.spectrum_b = self.forward.make_output_vec();
        self.correlation = self.inverse.make_output_vec();
        self.window_function = util::window::hann(len);
        self.len = len;
    }

    /// Return the lag in samples that maximizes the cross-correlation magnitude between `a` and
    /// `b`. Windows of unequal length are compared over their common prefix. Degenerate input
    /// yields zero.
    pub fn estimate(&mut self, a: &[f32], b: &[f32]) -> i32 {
        let len = a.len().min(b.len());
        if len < 2 {
            return 0;
        }
        if len != self.len {
            self.resize(len);
        }

        util::window::copy_windowed(&a[..len], &self.window_function, &mut self.buffer_a);
        util::window::copy_windowed(&b[..len], &self.window_function, &mut self.buffer_b);

        let forward_ok = self
            .forward
            .process(&mut self.buffer_a, &mut self.spectrum_a)
            .and_then(|_| self.forward.process(&mut self.buffer_b, &mut self.spectrum_b));
        if let Err(err) = forward_ok {
            log::debug!("Offset forward FFT failed: {err}");
            return 0;
        }

        // conj(A) * B peaks at the lag where B repeats A
        for (bin_a, bin_b) in self.spectrum_a.iter_mut().zip(&self.spectrum_b) {
            *bin_a = bin_a.conj() * bin_b;
        }
        // The inverse transform rejects non-zero imaginary parts on the real-valued bins
        self.spectrum_a[0].im = 0.0;
        if len % 2 == 0 {
            if let Some(nyquist) = self.spectrum_a.last_mut() {
                nyquist.im = 0.0;
            }
        }

        if let Err(err) = self.inverse.process(&mut self.spectrum_a, &mut self.correlation) {
            log::debug!("Offset inverse FFT failed: {err}");
            return 0;
        }

        pick_lag(&self.correlation)
    }
}

/// One-shot version of [`OffsetEstimator::estimate()`].
pub fn estimate_offset(a: &[f32], b: &[f32]) -> i32 {
    let len = a.len().min(b.len());
    OffsetEstimator::new(len.max(2)).estimate(a, b)
}

/// Pick the most extreme correlation value and fold it into a signed lag. A negative peak only
/// wins when it is strictly larger in magnitude than the positive one.
fn pick_lag(correlation: &[f32]) -> i32 {
    let len = correlation.len();
    let mut biggest = (0usize, f32::MIN);
    let mut smallest = (0usize, f32::MAX);
    for (i, &value) in correlation.iter().enumerate() {
        if !value.is_finite() {
            return 0;
        }
        if value > biggest.1 {
            biggest = (i, value);
        }
        if value < smallest.1 {
            smallest = (i, value);
        }
    }

    let index = if biggest.1 < smallest.1.abs() {
        smallest.0
    } else {
        biggest.0
    };

    if index > len / 2 {
        index as i32 - len as i32
    } else {
        index as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signals::{multi_sine, sine};

    #[test]
    fn finds_positive_delay_of_multi_sine() {
        let a = multi_sine(16384, 0);
        let b = multi_sine(16384, 200);

        assert_eq!(estimate_offset(&a, &b), 200);
    }

    #[test]
    fn finds_negative_delay_of_multi_sine() {
        let a = multi_sine(16384, 200);
        let b = multi_sine(16384, 0);

        assert_eq!(estimate_offset(&a, &b), -200);
    }

    #[test]
    fn finds_small_delays_of_single_sines() {
        let a = sine(100.0, 8192, 0);
        let b = sine(100.0, 8192, 37);
        assert_eq!(estimate_offset(&a, &b), 37);

        let a = sine(150.0, 8192, 0);
        let b = sine(150.0, 8192, -25);
        assert_eq!(estimate_offset(&a, &b), -25);
    }

    #[test]
    fn identical_windows_have_zero_offset() {
        let a = multi_sine(4096, 0);

        assert_eq!(estimate_offset(&a, &a), 0);
    }

    #[test]
    fn estimator_replans_for_new_lengths() {
        let mut estimator = OffsetEstimator::new(8192);
        assert_eq!(
            estimator.estimate(&multi_sine(8192, 0), &multi_sine(8192, 37)),
            37
        );
        assert_eq!(
            estimator.estimate(&multi_sine(16384, 0), &multi_sine(16384, 200)),
            200
        );
    }

    #[test]
    fn degenerate_input_is_zero() {
        assert_eq!(estimate_offset(&[], &[]), 0);
        assert_eq!(estimate_offset(&[1.0], &[1.0, 2.0]), 0);
        assert_eq!(estimate_offset(&[0.0; 512], &[0.0; 512]), 0);
    }

    #[test]
    fn lag_folding() {
        let mut correlation = vec![0.0; 16];
        correlation[15] = 1.0;
        assert_eq!(pick_lag(&correlation), -1);

        correlation[15] = 0.0;
        correlation[3] = -2.0;
        correlation[5] = 2.0;
        assert_eq!(pick_lag(&correlation), 5);
    }
}
