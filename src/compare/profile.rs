//! Spectral profile comparison. The comparator first learns the typical per-bin level difference
//! between the legs (the "good" profile), stores it, and from then on compares short term
//! profiles against it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{nudge, Comparator, ComparisonResult};
use crate::analysis::{OffsetEstimator, SpectrumAnalyzer};
use crate::error::Result;

/// `(PROFILE_BINS - 1) * 2`.
const FFT_SIZE: usize = 2046;
pub const PROFILE_BINS: usize = FFT_SIZE / 2 + 1;
/// Samples per leg used for the one-shot offset estimate.
const OFFSET_WINDOW: usize = 12000;
/// Offsets up to this many samples are left uncorrected.
const OFFSET_ACCURACY: i32 = 192;
/// Bins where either leg is at or below this amplitude don't contribute.
const AMPLITUDE_FLOOR: f32 = 0.00003;
const DB_SCALE: f32 = 0.754;
const CONFIDENCE_STEP: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Frames averaged into the good profile before going live.
    pub frames_for_good: u64,
    /// Frames averaged into every live profile.
    pub frames_for_current: u64,
    /// Bins where the live profile deviates from the good one by more than this are counted.
    pub max_level_db: f32,
    /// Maximum number of deviating bins for the legs to count as the same.
    pub max_bands: usize,
    /// Where the good profile is stored. Nothing is persisted without a path.
    pub profile_path: Option<PathBuf>,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            frames_for_good: 5000,
            frames_for_current: 5000,
            max_level_db: 3.0,
            max_bands: 20,
            profile_path: None,
        }
    }
}

/// JSON storage for a learned profile, a plain array of per-bin differences.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored profile. Missing, unreadable and malformed files, as well as files with
    /// the wrong number of entries, all count as no profile.
    pub fn load(&self) -> Option<Vec<f32>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                log::info!("No spectral profile at '{}': {err}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str::<Vec<f32>>(&contents) {
            Ok(profile) if profile.len() == PROFILE_BINS => Some(profile),
            Ok(profile) => {
                log::warn!(
                    "Ignoring spectral profile '{}': expected {PROFILE_BINS} entries, found {}",
                    self.path.display(),
                    profile.len()
                );
                None
            }
            Err(err) => {
                log::warn!(
                    "Ignoring spectral profile '{}': {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Write the profile to a temporary file next to the target and move it into place.
    pub fn save(&self, profile: &[f32]) -> Result<()> {
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        {
            let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
            serde_json::to_writer(&mut writer, profile)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Learning,
    Live,
}

/// Learns and then monitors the per-bin level difference between the legs. Unlike the other
/// comparators this one keeps its own continuous copy of both legs and only estimates the offset
/// once per accumulation, after which it trims the lagging leg.
pub struct ProfileComparator {
    settings: ProfileSettings,
    store: Option<ProfileStore>,
    estimator: OffsetEstimator,
    analyzer: SpectrumAnalyzer,

    phase: Phase,
    queue_a: VecDeque<f32>,
    queue_b: VecDeque<f32>,
    frame: Vec<f32>,
    magnitudes_a: Vec<f32>,

    offset: Option<i32>,
    frames: u64,
    good: Vec<f32>,
    current: Vec<f32>,
    /// Negative until the first live window completes.
    confidence: f32,
}

impl ProfileComparator {
    pub fn new(settings: ProfileSettings) -> Self {
        let store = settings.profile_path.clone().map(ProfileStore::new);
        let stored = store.as_ref().and_then(ProfileStore::load);

        let mut comparator = Self {
            settings,
            store,
            estimator: OffsetEstimator::new(OFFSET_WINDOW),
            analyzer: SpectrumAnalyzer::new(FFT_SIZE),
            phase: Phase::Learning,
            queue_a: VecDeque::new(),
            queue_b: VecDeque::new(),
            frame: Vec::with_capacity(FFT_SIZE),
            magnitudes_a: vec![0.0; PROFILE_BINS],
            offset: None,
            frames: 0,
            good: vec![0.0; PROFILE_BINS],
            current: vec![0.0; PROFILE_BINS],
            confidence: -1.0,
        };
        if let Some(profile) = stored {
            log::info!("{}: loaded stored profile, starting live", comparator.name());
            comparator.good = profile;
            comparator.phase = Phase::Live;
        }

        comparator
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }

    pub fn good_profile(&self) -> &[f32] {
        &self.good
    }

    /// Estimate the offset once enough audio is queued and trim the lagging leg so both queues
    /// line up.
    fn align_once(&mut self) {
        if self.offset.is_some()
            || self.queue_a.len() < OFFSET_WINDOW
            || self.queue_b.len() < OFFSET_WINDOW
        {
            return;
        }

        self.queue_a.make_contiguous();
        self.queue_b.make_contiguous();
        let offset = self.estimator.estimate(
            &self.queue_a.as_slices().0[..OFFSET_WINDOW],
            &self.queue_b.as_slices().0[..OFFSET_WINDOW],
        );
        if offset > OFFSET_ACCURACY {
            self.queue_b.drain(..offset as usize);
        } else if offset < -OFFSET_ACCURACY {
            self.queue_a.drain(..(-offset) as usize);
        }
        log::debug!("{}: one-shot offset {offset}", self.name());

        self.offset = Some(offset);
    }

    /// Pop one frame from each queue and fold the level difference into the profile that is
    /// currently being built.
    fn accumulate_frame(&mut self) {
        self.frame.clear();
        self.frame.extend(self.queue_a.drain(..FFT_SIZE));
        self.magnitudes_a
            .copy_from_slice(self.analyzer.magnitudes(&self.frame));

        self.frame.clear();
        self.frame.extend(self.queue_b.drain(..FFT_SIZE));
        let magnitudes_b = self.analyzer.magnitudes(&self.frame);

        let profile = match self.phase {
            Phase::Learning => &mut self.good,
            Phase::Live => &mut self.current,
        };
        let norm = PROFILE_BINS as f32;
        let frames = self.frames as f32;
        for ((average, magnitude_a), magnitude_b) in
            profile.iter_mut().zip(&self.magnitudes_a).zip(magnitudes_b)
        {
            let amplitude_a = magnitude_a / norm;
            let amplitude_b = magnitude_b / norm;
            if amplitude_a > AMPLITUDE_FLOOR && amplitude_b > AMPLITUDE_FLOOR {
                let difference = (20.0 * amplitude_b.log10() - 20.0 * amplitude_a.log10()) * DB_SCALE;
                *average += (difference - *average) / (frames + 1.0);
            }
        }

        self.frames += 1;
    }

    fn go_live(&mut self) {
        log::info!(
            "{}: learned profile from {} frames, going live",
            self.name(),
            self.frames
        );
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&self.good) {
                log::error!(
                    "Could not store spectral profile at '{}': {err}",
                    store.path().display()
                );
            }
        }

        self.phase = Phase::Live;
        self.frames = 0;
        self.offset = None;
        self.queue_a.clear();
        self.queue_b.clear();
    }

    fn finish_live_window(&mut self) {
        let bands = self
            .good
            .iter()
            .zip(&self.current)
            .filter(|(good, current)| (*good - *current).abs() > self.settings.max_level_db)
            .count();
        let same = bands <= self.settings.max_bands;
        log::debug!("{}: {bands} bands outside the learned profile", self.name());

        self.confidence = nudge(self.confidence.max(0.0), same, CONFIDENCE_STEP, CONFIDENCE_STEP);
        self.current.fill(0.0);
        self.frames = 0;
    }
}

impl Comparator for ProfileComparator {
    fn name(&self) -> &str {
        "spectral_profile"
    }

    fn compare(
        &mut self,
        a: &[f32],
        b: &[f32],
        _min_window_samples: usize,
        _locked: bool,
    ) -> ComparisonResult {
        self.queue_a.extend(a);
        self.queue_b.extend(b);
        self.align_once();
        if self.offset.is_none() {
            return ComparisonResult::new(0, self.confidence);
        }

        while self.queue_a.len() >= FFT_SIZE && self.queue_b.len() >= FFT_SIZE {
            self.accumulate_frame();
            match self.phase {
                Phase::Learning if self.frames > self.settings.frames_for_good => {
                    self.go_live();
                    break;
                }
                Phase::Live if self.frames > self.settings.frames_for_current => {
                    self.finish_live_window();
                }
                _ => (),
            }
        }

        let offset = self.offset.unwrap_or(0);
        match self.phase {
            Phase::Learning => ComparisonResult::no_result(offset),
            Phase::Live => ComparisonResult::new(offset, self.confidence),
        }
    }

    fn self_aligning(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.queue_a.clear();
        self.queue_b.clear();
        self.offset = None;
        self.frames = 0;
        self.current.fill(0.0);
        self.confidence = -1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signals::noise;

    fn settings(path: Option<PathBuf>) -> ProfileSettings {
        ProfileSettings {
            frames_for_good: 8,
            frames_for_current: 4,
            profile_path: path,
            ..Default::default()
        }
    }

    /// Feed `blocks` blocks of correlated noise, with the B leg attenuated by `gain_b`.
    fn feed(comparator: &mut ProfileComparator, blocks: usize, gain_b: f32, seed: u32) -> ComparisonResult {
        let mut result = ComparisonResult::default();
        for block in 0..blocks {
            let a = noise(4096, 0.5, seed + block as u32);
            let b: Vec<f32> = a.iter().map(|s| s * gain_b).collect();
            result = comparator.compare(&a, &b, 4096, false);
        }

        result
    }

    #[test]
    fn store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        let profile: Vec<f32> = (0..PROFILE_BINS).map(|i| i as f32 * 0.25 - 3.0).collect();

        store.save(&profile).unwrap();
        assert_eq!(store.load(), Some(profile));
        assert!(!dir.path().join("profile.json.tmp").exists());
    }

    #[test]
    fn store_rejects_wrong_counts_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let store = ProfileStore::new(&path);

        assert_eq!(store.load(), None);

        store.save(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.load(), None);

        std::fs::write(&path, "[1.0, \"banana\"]").unwrap();
        assert_eq!(store.load(), None);

        std::fs::write(&path, "1.0\n2.0\n").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn learns_then_goes_live_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let mut comparator = ProfileComparator::new(settings(Some(path.clone())));

        let result = feed(&mut comparator, 3, 1.0, 0);
        assert!(!comparator.is_live());
        assert!(!result.is_determinate());

        feed(&mut comparator, 3, 1.0, 10);
        assert!(comparator.is_live());
        assert_eq!(ProfileStore::new(&path).load().map(|p| p.len()), Some(PROFILE_BINS));

        // Identical legs keep every bin at a 0 dB difference
        let result = feed(&mut comparator, 12, 1.0, 20);
        assert!(result.is_match(), "{result:?}");
    }

    #[test]
    fn level_change_lowers_confidence() {
        let mut comparator = ProfileComparator::new(settings(None));
        feed(&mut comparator, 6, 1.0, 0);
        let matching = feed(&mut comparator, 12, 1.0, 20);
        approx::assert_relative_eq!(matching.confidence, 1.0, epsilon = 1e-6);

        // -10 dB on the B leg moves every bin by 7.5 scaled dB
        let changed = feed(&mut comparator, 12, 0.316, 40);
        assert!(changed.confidence < matching.confidence, "{changed:?}");
        assert!(changed.confidence >= 0.0);
    }

    #[test]
    fn stored_profile_starts_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        ProfileStore::new(&path).save(&vec![0.0; PROFILE_BINS]).unwrap();

        let comparator = ProfileComparator::new(settings(Some(path)));
        assert!(comparator.is_live());
        assert_eq!(comparator.good_profile().len(), PROFILE_BINS);
    }

    #[test]
    fn large_offsets_are_trimmed_once() {
        let mut comparator = ProfileComparator::new(settings(None));
        let signal = noise(16384, 0.5, 3);
        let a = &signal[..12288];
        let b: Vec<f32> = vec![0.0; 400]
            .into_iter()
            .chain(signal[..11888].iter().copied())
            .collect();

        let result = comparator.compare(a, &b, 4096, false);
        assert_eq!(result.offset, 400);
        assert!(comparator.self_aligning());
    }
}
