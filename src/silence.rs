use std::time::Duration;

use crate::util;

/// Per-leg silence classifier with holdoff. A leg is only reported silent after its peak has
/// stayed below the threshold for the whole holdoff, and is reported audible again as soon as
/// the peak recovers.
pub struct SilenceDetector {
    threshold: f32,
    holdoff: Duration,
    /// `None` until the first edge has been reported.
    silent: Option<bool>,
    /// Start of the current run of quiet windows.
    quiet_since: Option<Duration>,
}

impl SilenceDetector {
    pub fn new(threshold_db: f32, holdoff: Duration) -> Self {
        Self {
            threshold: util::db_to_gain(threshold_db),
            holdoff,
            silent: None,
            quiet_since: None,
        }
    }

    /// The linear threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_below_threshold(&self, peak: f32) -> bool {
        peak < self.threshold
    }

    /// Feed the peak of the latest window, taken at audio clock `now`. Returns the new state
    /// when it changed.
    pub fn update(&mut self, peak: f32, now: Duration) -> Option<bool> {
        if self.is_below_threshold(peak) {
            let since = *self.quiet_since.get_or_insert(now);
            if self.silent != Some(true) && now.saturating_sub(since) >= self.holdoff {
                self.silent = Some(true);
                return Some(true);
            }

            None
        } else {
            self.quiet_since = None;
            if self.silent != Some(false) {
                self.silent = Some(false);
                return Some(false);
            }

            None
        }
    }

    /// Mark the leg silent without waiting for the holdoff, used when audio stops arriving
    /// altogether. The next audible window reports the recovery.
    pub fn force_silent(&mut self) {
        self.silent = Some(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn silence_is_reported_once_after_holdoff() {
        let mut detector = SilenceDetector::new(-60.0, secs(2.0));

        assert_eq!(detector.update(0.5, secs(0.0)), Some(false));
        assert_eq!(detector.update(0.0001, secs(1.0)), None);
        assert_eq!(detector.update(0.0001, secs(2.5)), None);
        assert_eq!(detector.update(0.0001, secs(3.0)), Some(true));
        assert_eq!(detector.update(0.0, secs(4.0)), None);
        assert_eq!(detector.update(0.0, secs(60.0)), None);
    }

    #[test]
    fn recovery_is_reported_immediately_and_once() {
        let mut detector = SilenceDetector::new(-60.0, secs(1.0));
        detector.update(0.0, secs(0.0));
        assert_eq!(detector.update(0.0, secs(1.0)), Some(true));

        assert_eq!(detector.update(0.1, secs(1.1)), Some(false));
        assert_eq!(detector.update(0.1, secs(1.2)), None);
    }

    #[test]
    fn brief_dips_do_not_flap() {
        let mut detector = SilenceDetector::new(-60.0, secs(1.0));
        detector.update(0.5, secs(0.0));

        for step in 1..20 {
            let now = secs(step as f64 * 0.3);
            let peak = if step % 3 == 0 { 0.5 } else { 0.0 };
            assert_eq!(detector.update(peak, now), None, "step {step}");
        }
    }

    #[test]
    fn first_audible_window_reports_not_silent() {
        let mut detector = SilenceDetector::new(-60.0, secs(5.0));

        assert_eq!(detector.update(0.01, secs(0.0)), Some(false));
    }

    #[test]
    fn forced_silence_recovers_with_an_edge() {
        let mut detector = SilenceDetector::new(-60.0, secs(5.0));
        detector.update(0.5, secs(0.0));

        detector.force_silent();
        // Already silent, so quiet windows report nothing
        assert_eq!(detector.update(0.0, secs(0.5)), None);
        assert_eq!(detector.update(0.5, secs(1.0)), Some(false));
    }

    #[test]
    fn threshold_is_linear() {
        let detector = SilenceDetector::new(-20.0, secs(1.0));

        approx::assert_relative_eq!(detector.threshold(), 0.1, epsilon = 1e-6);
        assert!(detector.is_below_threshold(0.099));
        assert!(!detector.is_below_threshold(0.1001));
    }
}
