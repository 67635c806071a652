//! Comparison strategies for deciding whether both legs carry the same programme.
//!
//! All strategies implement the [`Comparator`] trait and are selected once at startup through
//! [`create_comparator()`].

pub mod fingerprint;
pub mod hash;
pub mod minus;
pub mod profile;
pub mod spectral_diff;

use serde::{Deserialize, Serialize};

/// Confidence at or above which a result counts as a match for locking purposes.
pub const MATCH_THRESHOLD: f32 = 0.5;

/// The outcome of one comparison pass.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ComparisonResult {
    /// Samples by which the B leg lags the A leg. Negative when B leads.
    pub offset: i32,
    /// `[0, 1]` certainty that both legs match, or a negative value if no determination was
    /// made.
    pub confidence: f32,
}

impl ComparisonResult {
    pub const fn new(offset: i32, confidence: f32) -> Self {
        Self { offset, confidence }
    }

    pub const fn no_result(offset: i32) -> Self {
        Self {
            offset,
            confidence: -1.0,
        }
    }

    pub fn is_determinate(&self) -> bool {
        self.confidence >= 0.0
    }

    pub fn is_match(&self) -> bool {
        self.confidence >= MATCH_THRESHOLD
    }
}

/// Core trait for comparison strategies
pub trait Comparator: Send {
    /// Get the name of the strategy
    fn name(&self) -> &str;

    /// Compare two windows that represent the same interval of wall clock time, up to the offset
    /// this comparator estimates itself. `min_window_samples` is the length of the region that
    /// must be available on both legs after the offset has been applied.
    fn compare(
        &mut self,
        a: &[f32],
        b: &[f32],
        min_window_samples: usize,
        locked: bool,
    ) -> ComparisonResult;

    /// Whether this comparator keeps its own alignment between calls. The engine then passes it
    /// unaligned audio instead of shifting the capture windows by the estimated offset.
    fn self_aligning(&self) -> bool {
        false
    }

    /// Reset internal state
    fn reset(&mut self);
}

/// Available comparison strategies, together with their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComparatorSettings {
    /// Perceptual fingerprint with a bit error rate metric
    PerceptualHash(hash::HashSettings),
    /// Sample-wise difference against the signal peak
    AmplitudeMinus(minus::MinusSettings),
    /// Band count of the dB difference between folded spectra
    SpectralDiff(spectral_diff::SpectralDiffSettings),
    /// Learned per-bin difference profile
    SpectralProfile(profile::ProfileSettings),
}

impl Default for ComparatorSettings {
    fn default() -> Self {
        Self::PerceptualHash(hash::HashSettings::default())
    }
}

/// Factory function to create comparator instances
pub fn create_comparator(settings: &ComparatorSettings, sample_rate: f32) -> Box<dyn Comparator> {
    match settings {
        ComparatorSettings::PerceptualHash(settings) => {
            Box::new(hash::HashComparator::new(settings.clone(), sample_rate))
        }
        ComparatorSettings::AmplitudeMinus(settings) => {
            Box::new(minus::MinusComparator::new(settings.clone()))
        }
        ComparatorSettings::SpectralDiff(settings) => Box::new(
            spectral_diff::SpectralDiffComparator::new(settings.clone(), sample_rate),
        ),
        ComparatorSettings::SpectralProfile(settings) => {
            Box::new(profile::ProfileComparator::new(settings.clone()))
        }
    }
}

/// Slice both legs to `window` samples starting where they line up according to `offset`.
/// Returns `None`, and logs, if either leg is too short.
pub(crate) fn aligned_overlap<'a>(
    name: &str,
    a: &'a [f32],
    b: &'a [f32],
    offset: i32,
    window: usize,
) -> Option<(&'a [f32], &'a [f32])> {
    let skip_a = (-offset).max(0) as usize;
    let skip_b = offset.max(0) as usize;
    if window == 0 || skip_a + window > a.len() || skip_b + window > b.len() {
        log::warn!(
            "{name}: window too small for offset {offset}: need {window} samples, A has {} after \
             skipping {skip_a}, B has {} after skipping {skip_b}",
            a.len().saturating_sub(skip_a),
            b.len().saturating_sub(skip_b),
        );
        return None;
    }

    Some((
        &a[skip_a..skip_a + window],
        &b[skip_b..skip_b + window],
    ))
}

/// Move a sticky confidence value one step up or down, clamped to `[0, 1]`.
#[inline]
pub(crate) fn nudge(confidence: f32, up: bool, up_step: f32, down_step: f32) -> f32 {
    if up {
        (confidence + up_step).min(1.0)
    } else {
        (confidence - down_step).max(0.0)
    }
}
