use serde::{Deserialize, Serialize};

use super::{aligned_overlap, nudge, Comparator, ComparisonResult};
use crate::analysis::{OffsetEstimator, ToneDetector};
use crate::util;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinusSettings {
    /// The legs are considered the same while `peak / max_difference` is above this ratio.
    pub ratio_threshold: f32,
    /// Differences below this linear level are ignored outright.
    pub difference_floor: f32,
    /// How far the confidence moves per comparison.
    pub step: f32,
}

impl Default for MinusSettings {
    fn default() -> Self {
        Self {
            // 20 dB between the signal and what's left after subtracting the legs
            ratio_threshold: 10.0,
            difference_floor: util::db_to_gain(-80.0),
            step: 0.1,
        }
    }
}

/// Subtracts the aligned legs sample by sample. The confidence is a sticky value that drifts
/// towards 1 while the residual stays negligible compared to the signal, and towards 0 when it
/// doesn't, so a single transient never flips the verdict.
pub struct MinusComparator {
    settings: MinusSettings,
    estimator: OffsetEstimator,
    tone_detector: ToneDetector,
    confidence: f32,
}

impl MinusComparator {
    pub fn new(settings: MinusSettings) -> Self {
        Self {
            settings,
            estimator: OffsetEstimator::new(4096),
            tone_detector: ToneDetector::new(),
            confidence: 0.0,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    fn residual_is_negligible(&self, a: &[f32], b: &[f32]) -> bool {
        let max_difference = a
            .iter()
            .zip(b)
            .fold(0.0f32, |acc, (x, y)| acc.max((x - y).abs()));
        let peak = util::peak(a).max(util::peak(b));
        log::trace!("{}: peak={peak} max_difference={max_difference}", self.name());

        max_difference <= self.settings.difference_floor
            || peak / max_difference > self.settings.ratio_threshold
    }
}

impl Comparator for MinusComparator {
    fn name(&self) -> &str {
        "amplitude_minus"
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
            return ComparisonResult::new(0, 1.0);
        }

        let offset = self.estimator.estimate(a, b);

        let Some((slice_a, slice_b)) = aligned_overlap(self.name(), a, b, offset, min_window_samples)
        else {
            return ComparisonResult::no_result(offset);
        };

        let same = self.residual_is_negligible(slice_a, slice_b);
        self.confidence = nudge(self.confidence, same, self.settings.step, self.settings.step);

        ComparisonResult::new(offset, self.confidence)
    }

    fn reset(&mut self) {
        self.confidence = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signals::{multi_sine, noise, sine};

    #[test]
    fn confidence_rises_monotonically_while_legs_track() {
        let mut comparator = MinusComparator::new(MinusSettings::default());
        let a = multi_sine(8192, 0);
        let b = multi_sine(8192, 120);

        let mut previous = comparator.confidence();
        for _ in 0..15 {
            let result = comparator.compare(&a, &b, 4096, false);
            assert_eq!(result.offset, 120);
            assert!(result.confidence >= previous);
            assert!(result.confidence <= 1.0);
            previous = result.confidence;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn confidence_falls_monotonically_when_legs_differ() {
        let mut comparator = MinusComparator::new(MinusSettings::default());
        let a = multi_sine(8192, 0);
        for _ in 0..10 {
            comparator.compare(&a, &a, 4096, false);
        }
        approx::assert_relative_eq!(comparator.confidence(), 1.0, epsilon = 1e-6);

        let b = noise(8192, 0.5, 5);
        let mut previous = comparator.confidence();
        for _ in 0..15 {
            let result = comparator.compare(&a, &b, 4096, false);
            assert!(result.confidence <= previous);
            assert!(result.confidence >= 0.0);
            previous = result.confidence;
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn small_residual_relative_to_signal_counts_as_same() {
        let mut comparator = MinusComparator::new(MinusSettings::default());
        let a = multi_sine(8192, 0);
        // -40 dB of added noise keeps the ratio well above 10
        let b: Vec<f32> = a
            .iter()
            .zip(noise(8192, 0.005, 9))
            .map(|(x, n)| x + n)
            .collect();

        let result = comparator.compare(&a, &b, 4096, false);
        approx::assert_relative_eq!(result.confidence, 0.1, epsilon = 1e-6);
    }

    #[test]
    fn instances_do_not_share_state() {
        let mut first = MinusComparator::new(MinusSettings::default());
        let second = MinusComparator::new(MinusSettings::default());
        let a = multi_sine(8192, 0);

        first.compare(&a, &a, 4096, false);
        assert!(first.confidence() > 0.0);
        assert_eq!(second.confidence(), 0.0);

        first.reset();
        assert_eq!(first.confidence(), 0.0);
    }

    #[test]
    fn short_buffers_leave_confidence_alone() {
        let mut comparator = MinusComparator::new(MinusSettings::default());
        let a = multi_sine(1000, 0);

        let result = comparator.compare(&a, &a, 4096, false);
        assert!(!result.is_determinate());
        assert_eq!(comparator.confidence(), 0.0);
    }

    #[test]
    fn delayed_tone_matches_without_an_offset() {
        let mut comparator = MinusComparator::new(MinusSettings::default());
        let a = sine(1000.0, 8192, 0);

        for delay in [30, 200, 1000] {
            let b = sine(1000.0, 8192, delay);
            let result = comparator.compare(&a, &b, 4096, false);
            assert_eq!(result, ComparisonResult::new(0, 1.0), "delay {delay}");
        }
        assert_eq!(comparator.confidence(), 0.0);
    }
}
