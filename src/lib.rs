//! Continuous comparison of two audio legs that should carry the same program.
//!
//! Stereo frames from a capture device are split into an A and a B leg and queued in a
//! [`CaptureRing`]. The [`Engine`] takes time aligned windows out of that ring, estimates the
//! offset between the legs, decides whether they carry the same content using one of the
//! [`Comparator`] strategies, and reports presence, sameness, delay and per-leg silence through a
//! [`StatusReporter`]. Once the legs have matched a few times in a row the offset is locked and
//! later windows are pre-aligned, so only the residual drift needs to be searched.

pub mod analysis;
pub mod buffer;
#[cfg(feature = "capture")]
pub mod capture;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod report;
pub mod silence;
pub mod stats;
pub mod util;

#[cfg(test)]
mod test_signals;

pub use buffer::ring::{AlignedWindow, CaptureRing, WindowConfig};
pub use compare::{create_comparator, Comparator, ComparatorSettings, ComparisonResult};
pub use config::MonitorConfig;
pub use engine::{CycleOutcome, Engine, EngineHandle};
pub use error::{MonitorError, Result};
pub use lock::{LockController, LockState, LockTransition};
pub use report::{
    ChannelSink, Leg, LogSink, Notification, NotificationSink, OutputMask, StatusReporter,
    StatusSnapshot, TriState,
};
pub use stats::EngineStats;
