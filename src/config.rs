//! Monitor configuration. Every section has defaults, so an empty JSON object is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffer::ring::WindowConfig;
use crate::compare::fingerprint;
use crate::compare::ComparatorSettings;
use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name. The host's default input is used when unset.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Frames per capture callback.
    pub frames_per_callback: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48000,
            frames_per_callback: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Largest expected offset right after locking.
    pub start_delay_ms: u32,
    /// The window stops growing at this offset.
    pub max_delay_ms: u32,
    pub samples_to_hash: usize,
    /// Widen the window when lock is lost.
    pub adaptive: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            start_delay_ms: 100,
            max_delay_ms: 8000,
            samples_to_hash: 4096,
            adaptive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub max_failures: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { max_failures: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceSettings {
    pub threshold_db: f32,
    pub holdoff_secs: f32,
}

impl Default for SilenceSettings {
    fn default() -> Self {
        Self {
            threshold_db: -60.0,
            holdoff_secs: 5.0,
        }
    }
}

/// Longest accepted silence holdoff.
pub const MAX_HOLDOFF_SECS: f32 = 3600.0;

impl SilenceSettings {
    /// The holdoff, clamped to `[0, MAX_HOLDOFF_SECS]`. Non-finite values give no holdoff.
    pub fn holdoff(&self) -> Duration {
        Duration::try_from_secs_f32(self.holdoff_secs.clamp(0.0, MAX_HOLDOFF_SECS))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Confidence above which the legs are reported as carrying the same content.
    pub same_threshold: f32,
    /// Initial output mask, see [`OutputMask`][crate::report::OutputMask].
    pub mask: i32,
    pub active: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            same_threshold: 0.6,
            mask: 1,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Added to the expected fill time before a missing window counts as audio loss.
    pub fill_timeout_margin_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fill_timeout_margin_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub capture: CaptureConfig,
    pub window: WindowSettings,
    pub lock: LockSettings,
    pub silence: SilenceSettings,
    pub report: ReportSettings,
    pub comparator: ComparatorSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

impl MonitorConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(MonitorError::Config(message));

        if self.capture.sample_rate == 0 {
            return fail("capture.sample_rate must be positive".to_owned());
        }
        if self.capture.frames_per_callback == 0 {
            return fail("capture.frames_per_callback must be positive".to_owned());
        }
        if self.window.start_delay_ms > self.window.max_delay_ms {
            return fail(format!(
                "window.start_delay_ms ({}) exceeds window.max_delay_ms ({})",
                self.window.start_delay_ms, self.window.max_delay_ms
            ));
        }
        if self.window.samples_to_hash < fingerprint::FRAME_SIZE {
            return fail(format!(
                "window.samples_to_hash must be at least {}",
                fingerprint::FRAME_SIZE
            ));
        }
        if self.lock.max_failures == 0 {
            return fail("lock.max_failures must be at least 1".to_owned());
        }
        if !(0.0..=1.0).contains(&self.report.same_threshold) {
            return fail("report.same_threshold must be within [0, 1]".to_owned());
        }
        if !(0..=2).contains(&self.report.mask) {
            return fail("report.mask must be 0, 1 or 2".to_owned());
        }
        if !(0.0..=MAX_HOLDOFF_SECS).contains(&self.silence.holdoff_secs) {
            return fail(format!(
                "silence.holdoff_secs must be within [0, {MAX_HOLDOFF_SECS}]"
            ));
        }
        if !self.silence.threshold_db.is_finite() {
            return fail("silence.threshold_db must be finite".to_owned());
        }

        Ok(())
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig::new(
            self.window.start_delay_ms,
            self.window.max_delay_ms,
            self.window.samples_to_hash,
            self.capture.sample_rate,
            self.window.adaptive,
        )
    }

    pub fn fill_timeout_margin(&self) -> Duration {
        Duration::from_millis(self.engine.fill_timeout_margin_ms)
    }
}
