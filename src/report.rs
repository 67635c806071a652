//! Status reporting towards the monitoring consumer.
//!
//! [`StatusReporter`] keeps the last value of everything the consumer can see and forwards a
//! [`Notification`] to its [`NotificationSink`] only when a value actually changes. An operator
//! mask and an externally driven active flag decide whether notifications go out at all.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{MonitorError, Result};

/// The legs being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Leg {
    A,
    B,
}

/// A boolean that may not have been determined yet. Serialized as `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "i32")]
pub enum TriState {
    #[default]
    Unknown,
    Off,
    On,
}

impl TriState {
    /// `-1`, `0` or `1`, as exposed to polling consumers.
    pub fn as_i32(self) -> i32 {
        match self {
            TriState::Unknown => -1,
            TriState::Off => 0,
            TriState::On => 1,
        }
    }
}

impl From<TriState> for i32 {
    fn from(value: TriState) -> Self {
        value.as_i32()
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            TriState::On
        } else {
            TriState::Off
        }
    }
}

/// Operator override for whether notifications are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputMask {
    ForceOff = 0,
    FollowActive = 1,
    ForceOn = 2,
}

impl TryFrom<i32> for OutputMask {
    type Error = MonitorError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(OutputMask::ForceOff),
            1 => Ok(OutputMask::FollowActive),
            2 => Ok(OutputMask::ForceOn),
            _ => Err(MonitorError::InvalidRequest(format!(
                "output mask {value} is not 0, 1 or 2"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AudioPresent { state: TriState },
    /// `On` when both legs carry the same content.
    Comparison { state: TriState },
    /// The offset at the moment lock was acquired.
    Delay { ms: i32 },
    LegSilence { leg: Leg, silent: bool },
    Overall { enabled: bool },
}

/// Receives notifications, typically on the comparison thread. Implementations should not block.
pub trait NotificationSink: Send {
    fn notify(&mut self, notification: Notification);
}

/// Logs every notification as a JSON line.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&mut self, notification: Notification) {
        match serde_json::to_string(&notification) {
            Ok(json) => log::info!("{json}"),
            Err(err) => log::error!("Could not serialize {notification:?}: {err}"),
        }
    }
}

/// Forwards notifications over an unbounded crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&mut self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            log::trace!("Notification receiver is gone, dropping {notification:?}");
        }
    }
}

/// Everything a polling consumer can read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub audio_present: TriState,
    pub comparison: TriState,
    pub delay_ms: i32,
    /// `Unknown` until the leg has been classified.
    pub silent_a: TriState,
    pub silent_b: TriState,
    pub mask: OutputMask,
    pub active: bool,
    pub overall: bool,
}

struct ReporterState {
    snapshot: StatusSnapshot,
    sink: Box<dyn NotificationSink>,
}

impl ReporterState {
    fn output_enabled(&self) -> bool {
        match self.snapshot.mask {
            OutputMask::ForceOff => false,
            OutputMask::FollowActive => self.snapshot.active,
            OutputMask::ForceOn => true,
        }
    }

    fn emit(&mut self, notification: Notification) {
        if self.snapshot.overall {
            self.sink.notify(notification);
        }
    }

    /// Re-derive the overall flag after a mask or active change and tell the consumer about it.
    fn update_overall(&mut self) {
        let enabled = self.output_enabled();
        let was_enabled = self.snapshot.overall;
        self.snapshot.overall = enabled;
        self.sink.notify(Notification::Overall { enabled });

        if was_enabled && !enabled {
            // Leave the consumer with a clean state rather than a stale alarm
            self.sink.notify(Notification::AudioPresent {
                state: TriState::On,
            });
            self.sink.notify(Notification::Comparison {
                state: TriState::On,
            });
        } else if !was_enabled && enabled {
            let snapshot = self.snapshot;
            self.sink.notify(Notification::AudioPresent {
                state: snapshot.audio_present,
            });
            self.sink.notify(Notification::Comparison {
                state: snapshot.comparison,
            });
            self.sink.notify(Notification::Delay {
                ms: snapshot.delay_ms,
            });
            for (leg, silent) in [(Leg::A, snapshot.silent_a), (Leg::B, snapshot.silent_b)] {
                if silent != TriState::Unknown {
                    self.sink.notify(Notification::LegSilence {
                        leg,
                        silent: silent == TriState::On,
                    });
                }
            }
        }
    }
}

/// Deduplicating front end for a [`NotificationSink`]. Shared between the comparison thread and
/// whatever handles inbound mask/active requests.
pub struct StatusReporter {
    state: Mutex<ReporterState>,
}

impl StatusReporter {
    pub fn new(sink: Box<dyn NotificationSink>, mask: OutputMask, active: bool) -> Self {
        let mut state = ReporterState {
            snapshot: StatusSnapshot {
                audio_present: TriState::Unknown,
                comparison: TriState::Unknown,
                delay_ms: 0,
                silent_a: TriState::Unknown,
                silent_b: TriState::Unknown,
                mask,
                active,
                overall: false,
            },
            sink,
        };
        state.snapshot.overall = state.output_enabled();

        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().snapshot
    }

    pub fn audio_changed(&self, present: TriState) {
        let mut state = self.state.lock();
        if state.snapshot.audio_present != present {
            state.snapshot.audio_present = present;
            state.emit(Notification::AudioPresent { state: present });
        }
    }

    pub fn comparison_changed(&self, same: TriState) {
        let mut state = self.state.lock();
        if state.snapshot.comparison != same {
            state.snapshot.comparison = same;
            state.emit(Notification::Comparison { state: same });
        }
    }

    pub fn delay_changed(&self, ms: i32) {
        let mut state = self.state.lock();
        if state.snapshot.delay_ms != ms {
            state.snapshot.delay_ms = ms;
            state.emit(Notification::Delay { ms });
        }
    }

    pub fn silence_changed(&self, leg: Leg, silent: bool) {
        let mut state = self.state.lock();
        let current = match leg {
            Leg::A => &mut state.snapshot.silent_a,
            Leg::B => &mut state.snapshot.silent_b,
        };
        if *current != TriState::from(silent) {
            *current = TriState::from(silent);
            state.emit(Notification::LegSilence { leg, silent });
        }
    }

    /// Inbound mask request. Values other than 0, 1 and 2 are rejected without side effects.
    pub fn set_mask(&self, value: i32) -> Result<()> {
        let mask = OutputMask::try_from(value)?;
        let mut state = self.state.lock();
        state.snapshot.mask = mask;
        state.update_overall();

        Ok(())
    }

    /// Inbound active request. Only 0 and 1 are accepted.
    pub fn set_active(&self, value: i32) -> Result<()> {
        let active = match value {
            0 => false,
            1 => true,
            _ => {
                return Err(MonitorError::InvalidRequest(format!(
                    "active flag {value} is not 0 or 1"
                )))
            }
        };
        let mut state = self.state.lock();
        state.snapshot.active = active;
        state.update_overall();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(mask: OutputMask, active: bool) -> (StatusReporter, Receiver<Notification>) {
        let (sink, receiver) = ChannelSink::new();
        (StatusReporter::new(Box::new(sink), mask, active), receiver)
    }

    #[test]
    fn notifications_are_sent_on_change_only() {
        let (reporter, receiver) = reporter(OutputMask::FollowActive, true);

        reporter.audio_changed(TriState::On);
        reporter.audio_changed(TriState::On);
        reporter.comparison_changed(TriState::On);
        reporter.comparison_changed(TriState::On);
        reporter.delay_changed(4);
        reporter.delay_changed(4);
        reporter.silence_changed(Leg::B, true);
        reporter.silence_changed(Leg::B, true);

        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(
            received,
            vec![
                Notification::AudioPresent {
                    state: TriState::On
                },
                Notification::Comparison {
                    state: TriState::On
                },
                Notification::Delay { ms: 4 },
                Notification::LegSilence {
                    leg: Leg::B,
                    silent: true
                },
            ]
        );
    }

    #[test]
    fn out_of_range_requests_are_rejected_without_changes() {
        let (reporter, receiver) = reporter(OutputMask::FollowActive, true);
        let before = reporter.snapshot();

        assert!(matches!(
            reporter.set_mask(3),
            Err(MonitorError::InvalidRequest(_))
        ));
        assert!(reporter.set_mask(-1).is_err());
        assert!(reporter.set_active(2).is_err());

        assert_eq!(reporter.snapshot(), before);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn suppressing_output_sends_a_clear() {
        let (reporter, receiver) = reporter(OutputMask::FollowActive, true);
        reporter.audio_changed(TriState::Off);
        reporter.comparison_changed(TriState::Off);
        receiver.try_iter().for_each(drop);

        reporter.set_active(0).unwrap();
        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(
            received,
            vec![
                Notification::Overall { enabled: false },
                Notification::AudioPresent {
                    state: TriState::On
                },
                Notification::Comparison {
                    state: TriState::On
                },
            ]
        );

        // Suppressed changes are remembered but not sent
        reporter.comparison_changed(TriState::Unknown);
        assert!(receiver.try_recv().is_err());
        assert_eq!(reporter.snapshot().comparison, TriState::Unknown);
    }

    #[test]
    fn re_enabling_output_replays_the_current_state() {
        let (reporter, receiver) = reporter(OutputMask::ForceOff, true);
        reporter.audio_changed(TriState::On);
        reporter.silence_changed(Leg::A, true);
        assert!(receiver.try_recv().is_err());

        reporter.set_mask(2).unwrap();
        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(received[0], Notification::Overall { enabled: true });
        assert!(received.contains(&Notification::AudioPresent {
            state: TriState::On
        }));
        assert!(received.contains(&Notification::LegSilence {
            leg: Leg::A,
            silent: true
        }));
    }

    #[test]
    fn accepted_requests_always_emit_overall() {
        let (reporter, receiver) = reporter(OutputMask::ForceOn, false);

        reporter.set_active(0).unwrap();
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![Notification::Overall { enabled: true }]
        );

        reporter.set_mask(1).unwrap();
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.mask, OutputMask::FollowActive);
        assert!(!snapshot.overall);
    }

    #[test]
    fn notifications_serialize_tri_states_as_integers() {
        let json = |notification: Notification| serde_json::to_string(&notification).unwrap();

        assert_eq!(
            json(Notification::AudioPresent {
                state: TriState::Unknown
            }),
            r#"{"kind":"audio_present","state":-1}"#
        );
        assert_eq!(
            json(Notification::Comparison {
                state: TriState::On
            }),
            r#"{"kind":"comparison","state":1}"#
        );
        assert_eq!(
            json(Notification::LegSilence {
                leg: Leg::B,
                silent: false
            }),
            r#"{"kind":"leg_silence","leg":"B","silent":false}"#
        );
    }

    #[test]
    fn leg_silence_starts_unknown() {
        let (reporter, receiver) = reporter(OutputMask::ForceOn, true);
        assert_eq!(reporter.snapshot().silent_a, TriState::Unknown);

        reporter.silence_changed(Leg::A, false);
        assert_eq!(reporter.snapshot().silent_a, TriState::Off);
        assert_eq!(reporter.snapshot().silent_b, TriState::Unknown);
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![Notification::LegSilence {
                leg: Leg::A,
                silent: false
            }]
        );
    }

    #[test]
    fn tri_state_values() {
        assert_eq!(TriState::Unknown.as_i32(), -1);
        assert_eq!(TriState::from(false).as_i32(), 0);
        assert_eq!(TriState::from(true).as_i32(), 1);
    }
}
