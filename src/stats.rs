//! Engine state published after every comparison cycle, for status displays and logging.
use serde::Serialize;

use crate::lock::LockState;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Completed cycles, including audio loss timeouts.
    pub cycles: u64,
    pub timeouts: u64,
    pub lock_state: LockState,
    pub consecutive_failures: u32,
    /// Offset the capture windows are aligned to.
    pub window_offset: i32,
    /// Last determinate comparison.
    pub last_offset: i32,
    pub last_confidence: f32,
    /// Current delay window in samples.
    pub samples_for_delay: usize,
    pub peak_a: f32,
    pub peak_b: f32,
    /// Audio clock in seconds.
    pub audio_time: f64,
}
