//! The comparison loop. Every cycle waits for the capture ring to fill a window, classifies
//! silence, runs the configured comparator, feeds the lock controller and reports what changed.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::buffer::ring::{AlignedWindow, CaptureRing};
use crate::compare::{create_comparator, Comparator, ComparisonResult};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::lock::{LockController, LockState, LockTransition};
use crate::report::{Leg, StatusReporter, TriState};
use crate::silence::SilenceDetector;
use crate::stats::EngineStats;

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Compared(ComparisonResult),
    /// Both legs were below the silence threshold, so nothing was compared.
    BothSilent,
    /// No window arrived before the fill timeout.
    AudioLost,
    /// The ring signalled a window it could not provide.
    Skipped,
}

pub struct Engine {
    ring: Arc<CaptureRing>,
    reporter: Arc<StatusReporter>,
    comparator: Box<dyn Comparator>,
    lock: LockController,
    silence_a: SilenceDetector,
    silence_b: SilenceDetector,

    sample_rate: u32,
    same_threshold: f32,
    fill_timeout_margin: Duration,

    running: Arc<AtomicBool>,
    stats: EngineStats,
    stats_input: triple_buffer::Input<EngineStats>,
    stats_output: Arc<Mutex<triple_buffer::Output<EngineStats>>>,
}

impl Engine {
    pub fn new(config: &MonitorConfig, ring: Arc<CaptureRing>, reporter: Arc<StatusReporter>) -> Self {
        let comparator = create_comparator(&config.comparator, config.capture.sample_rate as f32);
        Self::with_comparator(config, ring, reporter, comparator)
    }

    pub fn with_comparator(
        config: &MonitorConfig,
        ring: Arc<CaptureRing>,
        reporter: Arc<StatusReporter>,
        comparator: Box<dyn Comparator>,
    ) -> Self {
        let (stats_input, stats_output) =
            triple_buffer::TripleBuffer::new(&EngineStats::default()).split();
        let holdoff = config.silence.holdoff();

        Self {
            ring,
            reporter,
            comparator,
            lock: LockController::new(config.lock.max_failures),
            silence_a: SilenceDetector::new(config.silence.threshold_db, holdoff),
            silence_b: SilenceDetector::new(config.silence.threshold_db, holdoff),
            sample_rate: config.capture.sample_rate,
            same_threshold: config.report.same_threshold,
            fill_timeout_margin: config.fill_timeout_margin(),
            running: Arc::new(AtomicBool::new(true)),
            stats: EngineStats::default(),
            stats_input,
            stats_output: Arc::new(Mutex::new(stats_output)),
        }
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock.consecutive_failures()
    }

    /// Reader side of the statistics published after every cycle.
    pub fn stats_output(&self) -> Arc<Mutex<triple_buffer::Output<EngineStats>>> {
        Arc::clone(&self.stats_output)
    }

    fn samples_to_ms(&self, samples: i32) -> i32 {
        (samples as i64 * 1000 / self.sample_rate.max(1) as i64) as i32
    }

    /// Run one full cycle on the calling thread.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let timeout = self.ring.fill_timeout(self.fill_timeout_margin);
        if !self.ring.wait_for_window(timeout) {
            log::warn!("No audio window within {timeout:?}");
            self.handle_audio_loss();
            self.stats.timeouts += 1;
            self.publish(None);
            return CycleOutcome::AudioLost;
        }

        let window = match self.ring.create_aligned_buffer() {
            Ok(window) => window,
            Err(err) => {
                log::warn!("Skipping cycle: {err}");
                self.ring.mark_consumed();
                return CycleOutcome::Skipped;
            }
        };

        self.reporter.audio_changed(TriState::On);
        let both_quiet = self.update_silence(&window);

        let outcome = if both_quiet {
            // Nothing to compare, and no reason to count it against the lock
            log::debug!("Both legs silent");
            self.reporter.comparison_changed(TriState::On);
            CycleOutcome::BothSilent
        } else {
            let result = self.comparator.compare(
                &window.a,
                &window.b,
                self.ring.window().samples_to_hash,
                self.lock.is_locked(),
            );
            self.apply_result(result);
            CycleOutcome::Compared(result)
        };

        self.ring.mark_consumed();
        self.publish(Some(&window));

        outcome
    }

    /// Returns whether both legs are below the silence threshold in this window.
    fn update_silence(&mut self, window: &AlignedWindow) -> bool {
        if let Some(silent) = self.silence_a.update(window.peak_a, window.timestamp) {
            self.reporter.silence_changed(Leg::A, silent);
        }
        if let Some(silent) = self.silence_b.update(window.peak_b, window.timestamp) {
            self.reporter.silence_changed(Leg::B, silent);
        }

        self.silence_a.is_below_threshold(window.peak_a)
            && self.silence_b.is_below_threshold(window.peak_b)
    }

    fn apply_result(&mut self, result: ComparisonResult) {
        log::debug!(
            "Calculation delay={}ms confidence={}",
            self.samples_to_ms(result.offset),
            result.confidence
        );
        if !result.is_determinate() {
            return;
        }

        self.stats.last_offset = result.offset;
        self.stats.last_confidence = result.confidence;

        match self.lock.update(result.confidence) {
            LockTransition::Locked => {
                let (window_offset, delay) = if self.comparator.self_aligning() {
                    (0, result.offset)
                } else {
                    let total = self.ring.offset() + result.offset;
                    (total, total)
                };
                self.ring.set_locked(true, window_offset);
                self.reporter.delay_changed(self.samples_to_ms(delay));
            }
            LockTransition::Unlocked | LockTransition::StillUnlocked => {
                log::info!("No lock, widening search window");
                self.ring.set_locked(false, 0);
            }
            LockTransition::None => (),
        }

        self.reporter
            .comparison_changed(TriState::from(result.confidence > self.same_threshold));
    }

    /// Audio stopped arriving. The legs may come back with a different relation, so lock is
    /// reacquired from scratch and the delay is sent again on the next lock.
    fn handle_audio_loss(&mut self) {
        if self.lock.state() != LockState::Acquiring {
            log::info!("Releasing lock after audio loss");
        }
        self.lock.reset();
        self.ring.restart();

        self.reporter.audio_changed(TriState::Off);
        self.reporter.comparison_changed(TriState::Unknown);
        self.reporter.delay_changed(0);

        self.silence_a.force_silent();
        self.silence_b.force_silent();
        self.reporter.silence_changed(Leg::A, true);
        self.reporter.silence_changed(Leg::B, true);
    }

    fn publish(&mut self, window: Option<&AlignedWindow>) {
        let ring_window = self.ring.window();
        self.stats.cycles += 1;
        self.stats.lock_state = self.lock.state();
        self.stats.consecutive_failures = self.lock.consecutive_failures();
        self.stats.window_offset = self.ring.offset();
        self.stats.samples_for_delay = ring_window.samples_for_delay;
        if let Some(window) = window {
            self.stats.peak_a = window.peak_a;
            self.stats.peak_b = window.peak_b;
            self.stats.audio_time = window.timestamp.as_secs_f64();
        }

        self.stats_input.write(self.stats.clone());
    }

    /// Move the engine onto its own thread. The loop runs until [`EngineHandle::stop()`].
    pub fn spawn(self) -> Result<EngineHandle> {
        let running = Arc::clone(&self.running);
        let stats = self.stats_output();
        let thread = thread::Builder::new()
            .name("comparison".to_owned())
            .spawn(move || self.run())?;

        Ok(EngineHandle {
            running,
            stats,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        log::info!(
            "Comparison loop started using {}",
            self.comparator.name()
        );
        while self.running.load(Ordering::Relaxed) {
            self.run_cycle();
        }
        log::info!("Comparison loop stopped");
    }
}

pub struct EngineHandle {
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<triple_buffer::Output<EngineStats>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Latest published statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.lock().read().clone()
    }

    /// Ask the loop to stop and wait for it. The current cycle finishes first, which can take
    /// up to one fill timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Comparison thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
