//! A Haitsma/Kalker style audio fingerprint. Every frame is reduced to a 32-bit word whose bits
//! encode whether the energy difference between neighbouring mel bands grew or shrank compared
//! to the previous frame. The words survive gain changes and mild filtering but not different
//! programme.

use crate::analysis::SpectrumAnalyzer;

pub const FRAME_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 256;
/// One more band than there are bits per word.
const NUM_BANDS: usize = 33;
const MIN_FREQUENCY: f32 = 300.0;
const MAX_FREQUENCY: f32 = 3000.0;

pub struct Fingerprinter {
    analyzer: SpectrumAnalyzer,
    /// Half-open bin ranges for every band.
    bands: Vec<(usize, usize)>,
    energies: [f32; NUM_BANDS],
    previous_energies: [f32; NUM_BANDS],
}

impl Fingerprinter {
    pub fn new(sample_rate: f32) -> Self {
        let analyzer = SpectrumAnalyzer::new(FRAME_SIZE);
        let bands = band_bins(analyzer.bin_width(sample_rate), analyzer.num_bins());

        Self {
            analyzer,
            bands,
            energies: [0.0; NUM_BANDS],
            previous_energies: [0.0; NUM_BANDS],
        }
    }

    /// Number of words produced for `len` samples.
    pub fn frame_count(len: usize) -> usize {
        if len < FRAME_SIZE {
            0
        } else {
            (len - FRAME_SIZE) / HOP_SIZE + 1
        }
    }

    /// Replace the contents of `words` with the fingerprint of `samples`.
    pub fn fingerprint(&mut self, samples: &[f32], words: &mut Vec<u32>) {
        words.clear();
        self.previous_energies = [0.0; NUM_BANDS];

        for frame in 0..Self::frame_count(samples.len()) {
            let start = frame * HOP_SIZE;
            let magnitudes = self
                .analyzer
                .magnitudes(&samples[start..start + FRAME_SIZE]);
            for (energy, &(first, last)) in self.energies.iter_mut().zip(&self.bands) {
                *energy = magnitudes[first..last].iter().map(|m| m * m).sum();
            }

            let mut word = 0u32;
            for band in 0..NUM_BANDS - 1 {
                let difference = (self.energies[band] - self.energies[band + 1])
                    - (self.previous_energies[band] - self.previous_energies[band + 1]);
                if difference > 0.0 {
                    word |= 1 << band;
                }
            }

            words.push(word);
            self.previous_energies = self.energies;
        }
    }
}

/// Mel spaced band edges between [`MIN_FREQUENCY`] and [`MAX_FREQUENCY`], converted to bin ranges.
/// Every band covers at least one bin.
fn band_bins(bin_width: f32, num_bins: usize) -> Vec<(usize, usize)> {
    let mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let hz = |mel: f32| 700.0 * (10.0f32.powf(mel / 2595.0) - 1.0);

    let low = mel(MIN_FREQUENCY);
    let high = mel(MAX_FREQUENCY);
    let edge_bin = |edge: usize| {
        let frequency = hz(low + (high - low) * edge as f32 / NUM_BANDS as f32);
        ((frequency / bin_width).ceil() as usize).min(num_bins - 1)
    };

    (0..NUM_BANDS)
        .map(|band| {
            let first = edge_bin(band);
            let last = edge_bin(band + 1).max(first + 1);
            (first, last)
        })
        .collect()
}

/// Fraction of differing bits between two words.
#[inline]
pub fn word_error_rate(a: u32, b: u32) -> f32 {
    (a ^ b).count_ones() as f32 / 32.0
}

/// Slide the shorter fingerprint along the longer one. For every position count the fraction of
/// frames whose bit error rate stays under `ber_threshold`, and return the best fraction. Empty
/// fingerprints return `None`.
pub fn match_confidence(a: &[u32], b: &[u32], ber_threshold: f32) -> Option<f32> {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return None;
    }

    let best = (0..=long.len() - short.len())
        .map(|shift| {
            let matching = short
                .iter()
                .zip(&long[shift..])
                .filter(|(x, y)| word_error_rate(**x, **y) < ber_threshold)
                .count();
            matching as f32 / short.len() as f32
        })
        .fold(0.0f32, f32::max);

    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signals::{multi_sine, noise, SAMPLE_RATE};

    const BER_THRESHOLD: f32 = 0.30;

    fn words(samples: &[f32]) -> Vec<u32> {
        let mut fingerprinter = Fingerprinter::new(SAMPLE_RATE);
        let mut words = Vec::new();
        fingerprinter.fingerprint(samples, &mut words);
        words
    }

    #[test]
    fn frame_counts() {
        assert_eq!(Fingerprinter::frame_count(FRAME_SIZE - 1), 0);
        assert_eq!(Fingerprinter::frame_count(FRAME_SIZE), 1);
        assert_eq!(Fingerprinter::frame_count(4096), 9);
    }

    #[test]
    fn bands_are_ordered_and_non_empty() {
        let bands = band_bins(SAMPLE_RATE / FRAME_SIZE as f32, FRAME_SIZE / 2 + 1);

        assert_eq!(bands.len(), NUM_BANDS);
        for (first, last) in &bands {
            assert!(first < last);
        }
        for pair in bands.windows(2) {
            assert!(pair[0].0 <= pair[1].0);
        }
    }

    #[test]
    fn identical_audio_matches_fully() {
        let signal = multi_sine(4096, 0);
        let a = words(&signal);

        assert_eq!(a.len(), 9);
        assert_eq!(match_confidence(&a, &a, BER_THRESHOLD), Some(1.0));
    }

    #[test]
    fn gain_changes_do_not_matter() {
        let signal = noise(8192, 0.5, 7);
        let quieter: Vec<f32> = signal.iter().map(|s| s * 0.25).collect();

        let confidence = match_confidence(&words(&signal), &words(&quieter), BER_THRESHOLD);
        assert!(confidence.unwrap() > 0.9, "{confidence:?}");
    }

    #[test]
    fn different_programme_does_not_match() {
        let a = words(&noise(8192, 0.5, 1));
        let b = words(&noise(8192, 0.5, 2));

        let confidence = match_confidence(&a, &b, BER_THRESHOLD).unwrap();
        assert!(confidence < 0.5, "{confidence}");
    }

    #[test]
    fn empty_fingerprints_have_no_confidence() {
        assert_eq!(match_confidence(&[], &[1, 2, 3], BER_THRESHOLD), None);
    }

    #[test]
    fn shorter_fingerprint_is_slid_along() {
        let long = [0u32, 0xffff_ffff, 0x0f0f_0f0f, 0x1234_5678];
        let short = [0x0f0f_0f0f, 0x1234_5678];

        assert_eq!(match_confidence(&short, &long, BER_THRESHOLD), Some(1.0));
        approx::assert_relative_eq!(word_error_rate(0, 0xffff_ffff), 1.0);
    }
}
