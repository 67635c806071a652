use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprinter;
use super::{aligned_overlap, Comparator, ComparisonResult};
use crate::analysis::{OffsetEstimator, ToneDetector};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashSettings {
    /// Frames whose bit error rate is below this count as matching.
    pub ber_threshold: f32,
}

impl Default for HashSettings {
    fn default() -> Self {
        Self {
            ber_threshold: 0.30,
        }
    }
}

/// Compares perceptual fingerprints of the aligned overlap. This is the default strategy.
pub struct HashComparator {
    settings: HashSettings,
    estimator: OffsetEstimator,
    tone_detector: ToneDetector,
    fingerprinter: Fingerprinter,
    words_a: Vec<u32>,
    words_b: Vec<u32>,
}

impl HashComparator {
    pub fn new(settings: HashSettings, sample_rate: f32) -> Self {
        Self {
            settings,
            estimator: OffsetEstimator::new(4096),
            tone_detector: ToneDetector::new(),
            fingerprinter: Fingerprinter::new(sample_rate),
            words_a: Vec::new(),
            words_b: Vec::new(),
        }
    }
}

impl Comparator for HashComparator {
    fn name(&self) -> &str {
        "perceptual_hash"
    }

    fn compare(
        &mut self,
        a: &[f32],
        b: &[f32],
        min_window_samples: usize,
        _locked: bool,
    ) -> ComparisonResult {
        // A steady tone has no usable lag, so it matches without moving the alignment
        if self.tone_detector.is_matching_tone(a, b) {
            log::debug!("{}: tone on both legs", self.name());
            return ComparisonResult::new(0, 1.0);
        }

        let offset = self.estimator.estimate(a, b);

        let Some((slice_a, slice_b)) = aligned_overlap(self.name(), a, b, offset, min_window_samples)
        else {
            return ComparisonResult::no_result(offset);
        };

        self.fingerprinter.fingerprint(slice_a, &mut self.words_a);
        self.fingerprinter.fingerprint(slice_b, &mut self.words_b);

        match super::fingerprint::match_confidence(
            &self.words_a,
            &self.words_b,
            self.settings.ber_threshold,
        ) {
            Some(confidence) => ComparisonResult::new(offset, confidence),
            None => {
                log::warn!(
                    "{}: no fingerprint frames in {min_window_samples} samples",
                    self.name()
                );
                ComparisonResult::no_result(offset)
            }
        }
    }

    fn reset(&mut self) {
        self.words_a.clear();
        self.words_b.clear();
    }
}
