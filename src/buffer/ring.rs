//! The hand-off between the capture callback and the comparison thread.
//!
//! [`CaptureRing`] is a monitor: one mutex guards both sample queues, the per-leg peaks, the
//! ready flag and the window sizing, and a condition variable wakes the comparison thread once a
//! full window has been captured.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{MonitorError, Result};

/// Window sizing, in samples per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub start_samples_for_delay: usize,
    pub samples_for_delay: usize,
    pub max_samples_for_delay: usize,
    /// Minimum comparison window.
    pub samples_to_hash: usize,
    pub sample_rate: u32,
    /// Whether losing lock widens the window.
    pub adaptive: bool,
}

impl WindowConfig {
    /// The delay window covers both signs of offset, hence twice the delay in samples.
    pub fn delay_ms_to_samples(delay_ms: u32, sample_rate: u32) -> usize {
        (delay_ms as u64 * sample_rate as u64 / 500) as usize
    }

    pub fn new(
        start_delay_ms: u32,
        max_delay_ms: u32,
        samples_to_hash: usize,
        sample_rate: u32,
        adaptive: bool,
    ) -> Self {
        let start = Self::delay_ms_to_samples(start_delay_ms, sample_rate);
        Self {
            start_samples_for_delay: start,
            samples_for_delay: start,
            max_samples_for_delay: Self::delay_ms_to_samples(max_delay_ms, sample_rate)
                .max(start),
            samples_to_hash,
            sample_rate,
            adaptive,
        }
    }

    /// Samples handed to the comparator per leg.
    pub fn window_len(&self) -> usize {
        self.samples_for_delay + self.samples_to_hash
    }
}

/// Two equal-length copies of the most recent comparison window.
#[derive(Debug, Clone, Default)]
pub struct AlignedWindow {
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    /// Absolute peak per leg since the last [`CaptureRing::mark_consumed()`].
    pub peak_a: f32,
    pub peak_b: f32,
    /// Audio clock at the moment the window was taken.
    pub timestamp: Duration,
}

#[derive(Debug)]
struct RingState {
    a: VecDeque<f32>,
    b: VecDeque<f32>,
    peak_a: f32,
    peak_b: f32,
    ready: bool,
    window: WindowConfig,
    offset: i32,
    /// Frames received since startup.
    frames_captured: u64,
    reported_callback_mismatch: bool,
}

impl RingState {
    /// Samples each leg must hold before a window can be cut. The lagging leg needs `|offset|`
    /// extra samples.
    fn needed(&self) -> (usize, usize) {
        let len = self.window.window_len();
        (
            len + (-self.offset).max(0) as usize,
            len + self.offset.max(0) as usize,
        )
    }

    fn has_window(&self) -> bool {
        let (needed_a, needed_b) = self.needed();
        self.a.len() >= needed_a && self.b.len() >= needed_b
    }

    fn clear_samples(&mut self) {
        self.a.clear();
        self.b.clear();
        self.ready = false;
    }
}

pub struct CaptureRing {
    state: Mutex<RingState>,
    window_ready: Condvar,
    frames_per_callback: usize,
}

impl CaptureRing {
    pub fn new(window: WindowConfig, frames_per_callback: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                a: VecDeque::with_capacity(window.window_len() * 2),
                b: VecDeque::with_capacity(window.window_len() * 2),
                peak_a: 0.0,
                peak_b: 0.0,
                ready: false,
                window,
                offset: 0,
                frames_captured: 0,
                reported_callback_mismatch: false,
            }),
            window_ready: Condvar::new(),
            frames_per_callback,
        }
    }

    /// Capture side entry point. `data` holds interleaved stereo frames.
    pub fn push_interleaved(&self, data: &[f32]) {
        let frames = data.len() / 2;
        let mut state = self.state.lock();

        if frames != self.frames_per_callback {
            if state.reported_callback_mismatch {
                log::trace!("Capture delivered {frames} frames");
            } else {
                log::warn!(
                    "Capture delivered {frames} frames instead of {}",
                    self.frames_per_callback
                );
                state.reported_callback_mismatch = true;
            }
        }

        let mut peak_a = state.peak_a;
        let mut peak_b = state.peak_b;
        for frame in data.chunks_exact(2) {
            state.a.push_back(frame[0]);
            state.b.push_back(frame[1]);
            peak_a = peak_a.max(frame[0].abs());
            peak_b = peak_b.max(frame[1].abs());
        }
        state.peak_a = peak_a;
        state.peak_b = peak_b;
        state.frames_captured += frames as u64;

        if !state.ready && state.has_window() {
            state.ready = true;
            self.window_ready.notify_one();
        }
    }

    /// Block until a full window is available or `timeout` passes. Returns whether a window is
    /// ready.
    pub fn wait_for_window(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.ready {
            if self
                .window_ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.ready;
            }
        }

        true
    }

    /// Time a full window takes to arrive, plus `margin`.
    pub fn fill_timeout(&self, margin: Duration) -> Duration {
        let state = self.state.lock();
        let (needed_a, needed_b) = state.needed();
        let samples = needed_a.max(needed_b) as f64;

        Duration::from_secs_f64(samples / state.window.sample_rate.max(1) as f64) + margin
    }

    /// Copy the next window out of both legs. Older history is discarded first so the window is
    /// the most recent one, and the copied samples are removed afterwards, so the queues stay
    /// bounded.
    pub fn create_aligned_buffer(&self) -> Result<AlignedWindow> {
        let mut state = self.state.lock();
        let len = state.window.window_len();
        let (needed_a, needed_b) = state.needed();
        if state.a.len() < needed_a || state.b.len() < needed_b {
            return Err(MonitorError::InsufficientData {
                needed: needed_a.max(needed_b),
                available: state.a.len().min(state.b.len()),
            });
        }

        // Both legs drop the same number of samples to keep their time bases in step
        let excess = (state.a.len() - needed_a).min(state.b.len() - needed_b);
        state.a.drain(..excess);
        state.b.drain(..excess);

        let skip_a = needed_a - len;
        let skip_b = needed_b - len;
        let a: Vec<f32> = state.a.range(skip_a..skip_a + len).copied().collect();
        let b: Vec<f32> = state.b.range(skip_b..skip_b + len).copied().collect();
        state.a.drain(..len);
        state.b.drain(..len);

        let timestamp =
            Duration::from_secs_f64(state.frames_captured as f64 / state.window.sample_rate as f64);

        Ok(AlignedWindow {
            a,
            b,
            peak_a: state.peak_a,
            peak_b: state.peak_b,
            timestamp,
        })
    }

    /// Fix or release the window alignment. Locking resets the window to its start size and
    /// records `offset`. Unlocking forgets the offset and, for adaptive windows, doubles the
    /// window and drops the captured audio.
    pub fn set_locked(&self, locked: bool, offset: i32) {
        let mut state = self.state.lock();
        if locked {
            state.window.samples_for_delay = state.window.start_samples_for_delay;
            state.offset = offset;
            log::info!(
                "Lock: offset {offset} samples, window {} samples",
                state.window.window_len()
            );
        } else {
            state.offset = 0;
            if state.window.adaptive {
                state.window.samples_for_delay = (state.window.samples_for_delay * 2)
                    .min(state.window.max_samples_for_delay);
                state.clear_samples();
                log::info!(
                    "Unlock: window widened to {} samples",
                    state.window.window_len()
                );
            }
        }

        if !state.ready && state.has_window() {
            state.ready = true;
            self.window_ready.notify_one();
        }
    }

    /// Forget the alignment and any queued audio, and go back to the start window. Used after
    /// audio loss, when the queued samples no longer form a continuous stream.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        state.offset = 0;
        state.window.samples_for_delay = state.window.start_samples_for_delay;
        state.clear_samples();
        state.peak_a = 0.0;
        state.peak_b = 0.0;
    }

    /// Re-arm for the next cycle.
    pub fn mark_consumed(&self) {
        let mut state = self.state.lock();
        state.ready = false;
        state.peak_a = 0.0;
        state.peak_b = 0.0;

        // Enough audio may already be queued for the next window
        if state.has_window() {
            state.ready = true;
            self.window_ready.notify_one();
        }
    }

    pub fn window(&self) -> WindowConfig {
        self.state.lock().window
    }

    pub fn offset(&self) -> i32 {
        self.state.lock().offset
    }

    /// Samples currently queued per leg.
    pub fn queued(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.a.len(), state.b.len())
    }
}
