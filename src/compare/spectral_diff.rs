use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{aligned_overlap, nudge, Comparator, ComparisonResult};
use crate::analysis::{OffsetEstimator, SpectrumAnalyzer};

/// Both legs are folded into a buffer of this many samples before analysis.
const FOLD_SIZE: usize = 1024;
/// `(bins - 1) * 2` for 512 bins.
const FFT_SIZE: usize = 1022;
const MAX_FREQUENCY: f32 = 12000.0;
const SILENCE_FLOOR_DB: f32 = -80.0;
/// Number of band counts in the rolling average.
const HISTORY_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralDiffSettings {
    /// Bins differing by more than this many dB are counted.
    pub level_limit_db: f32,
    /// The legs are considered the same while the averaged count stays below this.
    pub max_bands: f32,
    /// Confidence gained per comparison while the legs match.
    pub up_rate: f32,
    /// Confidence lost per comparison while they don't.
    pub down_rate: f32,
}

impl Default for SpectralDiffSettings {
    fn default() -> Self {
        Self {
            level_limit_db: 3.0,
            max_bands: 20.0,
            up_rate: 0.1,
            down_rate: 0.05,
        }
    }
}

/// Compares the long term spectra of both legs. The aligned overlap is folded modulo
/// [`FOLD_SIZE`] so that steady components add up coherently, then the number of bins whose
/// levels disagree feeds a rolling average.
pub struct SpectralDiffComparator {
    settings: SpectralDiffSettings,
    sample_rate: f32,
    estimator: OffsetEstimator,
    analyzer: SpectrumAnalyzer,

    folded_a: Vec<f32>,
    folded_b: Vec<f32>,
    levels_a: Vec<f32>,
    levels_b: Vec<f32>,

    band_counts: VecDeque<usize>,
    confidence: f32,
}

impl SpectralDiffComparator {
    pub fn new(settings: SpectralDiffSettings, sample_rate: f32) -> Self {
        Self {
            settings,
            sample_rate,
            estimator: OffsetEstimator::new(4096),
            analyzer: SpectrumAnalyzer::new(FFT_SIZE),
            folded_a: vec![0.0; FOLD_SIZE],
            folded_b: vec![0.0; FOLD_SIZE],
            levels_a: Vec::new(),
            levels_b: Vec::new(),
            band_counts: VecDeque::with_capacity(HISTORY_LEN),
            confidence: 0.0,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Mean of the band counts in the history.
    pub fn average_band_count(&self) -> f32 {
        if self.band_counts.is_empty() {
            return 0.0;
        }

        self.band_counts.iter().sum::<usize>() as f32 / self.band_counts.len() as f32
    }

    /// Number of bins below 12 kHz where the legs differ by more than the level limit.
    fn differing_bands(&mut self) -> usize {
        let norm = self.analyzer.num_bins() as f32 / 2.0;
        self.analyzer
            .levels_db(&self.folded_a, norm, &mut self.levels_a);
        self.analyzer
            .levels_db(&self.folded_b, norm, &mut self.levels_b);

        let last_bin = ((MAX_FREQUENCY / self.analyzer.bin_width(self.sample_rate)) as usize)
            .min(self.levels_a.len());
        self.levels_a[..last_bin]
            .iter()
            .zip(&self.levels_b[..last_bin])
            .filter(|(a, b)| (*a - *b).abs() > self.settings.level_limit_db && **a > SILENCE_FLOOR_DB)
            .count()
    }
}

/// Average `samples` into `folded` by summing sample `i` into `folded[i % len]`.
fn fold(samples: &[f32], folded: &mut [f32]) {
    folded.fill(0.0);
    for (i, sample) in samples.iter().enumerate() {
        folded[i % folded.len()] += sample;
    }

    let passes = (samples.len() / folded.len()).max(1) as f32;
    for sample in folded.iter_mut() {
        *sample /= passes;
    }
}

impl Comparator for SpectralDiffComparator {
    fn name(&self) -> &str {
        "spectral_diff"
    }

    fn compare(
        &mut self,
        a: &[f32],
        b: &[f32],
        min_window_samples: usize,
        _locked: bool,
    ) -> ComparisonResult {
        let offset = self.estimator.estimate(a, b);
        let Some((slice_a, slice_b)) = aligned_overlap(self.name(), a, b, offset, min_window_samples)
        else {
            return ComparisonResult::no_result(offset);
        };

        fold(slice_a, &mut self.folded_a);
        fold(slice_b, &mut self.folded_b);
        let bands = self.differing_bands();

        if self.band_counts.len() == HISTORY_LEN {
            self.band_counts.pop_front();
        }
        self.band_counts.push_back(bands);
        let average = self.average_band_count();
        log::debug!("{}: bands={bands} average={average:.1}", self.name());

        self.confidence = nudge(
            self.confidence,
            average < self.settings.max_bands,
            self.settings.up_rate,
            self.settings.down_rate,
        );

        ComparisonResult::new(offset, self.confidence)
    }

    fn reset(&mut self) {
        self.band_counts.clear();
        self.confidence = 0.0;
    }
}
