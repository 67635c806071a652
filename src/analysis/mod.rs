//! Stateless signal analysis building blocks used by the comparators.

pub mod offset;
pub mod spectrum;
pub mod tone;

pub use offset::{estimate_offset, OffsetEstimator};
pub use spectrum::SpectrumAnalyzer;
pub use tone::{ToneDetector, TONE_MIN_SAMPLES};
