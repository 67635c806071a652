//! Detection of a single steady tone present on both legs. Line-up tone is identical content by
//! definition, and it defeats both the fingerprint and the correlation, so comparators
//! short-circuit on it.

use super::spectrum::SpectrumAnalyzer;

/// Minimum number of samples per leg. Shorter input is never a tone.
pub const TONE_MIN_SAMPLES: usize = 2046;
/// Peaks at or below this level are ignored.
const PEAK_FLOOR_DB: f32 = -80.0;

pub struct ToneDetector {
    analyzer: SpectrumAnalyzer,
    levels: Vec<f32>,
}

impl Default for ToneDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneDetector {
    pub fn new() -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(TONE_MIN_SAMPLES),
            levels: Vec::with_capacity(TONE_MIN_SAMPLES / 2 + 1),
        }
    }

    /// The bin of the only spectral peak in `samples`, or `None` if there are zero or several
    /// peaks.
    pub fn dominant_bin(&mut self, samples: &[f32]) -> Option<usize> {
        if samples.len() < TONE_MIN_SAMPLES {
            return None;
        }

        let norm = self.analyzer.num_bins() as f32;
        self.analyzer
            .levels_db(&samples[..TONE_MIN_SAMPLES], norm, &mut self.levels);

        match spectral_peaks(&self.levels, PEAK_FLOOR_DB).as_slice() {
            [bin] => Some(*bin),
            _ => None,
        }
    }

    /// Whether both legs carry one tone in the same frequency bin.
    pub fn is_matching_tone(&mut self, a: &[f32], b: &[f32]) -> bool {
        match (self.dominant_bin(a), self.dominant_bin(b)) {
            (Some(bin_a), Some(bin_b)) => {
                log::trace!("Tone check: bin A={bin_a} bin B={bin_b}");
                bin_a == bin_b
            }
            _ => false,
        }
    }
}

/// Local maxima above `floor_db`, found by tracking where the slope turns from rising to
/// falling.
pub fn spectral_peaks(levels_db: &[f32], floor_db: f32) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut rising = false;
    let mut last = f32::NEG_INFINITY;
    for (i, &level) in levels_db.iter().enumerate() {
        if level > last {
            rising = true;
        } else {
            if rising && last > floor_db {
                peaks.push(i - 1);
            }
            rising = false;
        }
        last = level;
    }

    peaks
}
