//! Lock state machine. Comparison results move the monitor between acquiring, locked and
//! unlocked, with a failure counter providing hysteresis while locked.

use serde::Serialize;

use crate::compare::MATCH_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LockState {
    /// Not locked yet, and no failures have been confirmed.
    #[default]
    Acquiring,
    Locked,
    /// Lock was lost or never found after `max_failures` attempts.
    Unlocked,
}

/// What the caller needs to act on after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    None,
    /// A fresh lock. The offset should be fixed and reported.
    Locked,
    /// The failure threshold was reached. The search window should be widened.
    Unlocked,
    /// Another failed attempt while already unlocked. The window should be widened again.
    StillUnlocked,
}

pub struct LockController {
    state: LockState,
    consecutive_failures: u32,
    max_failures: u32,
}

impl LockController {
    pub fn new(max_failures: u32) -> Self {
        Self {
            state: LockState::Acquiring,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Feed one comparison confidence. Negative confidences carry no information and are
    /// ignored.
    pub fn update(&mut self, confidence: f32) -> LockTransition {
        if confidence < 0.0 {
            return LockTransition::None;
        }

        if confidence >= MATCH_THRESHOLD {
            self.consecutive_failures = 0;
            return match self.state {
                LockState::Locked => LockTransition::None,
                LockState::Acquiring | LockState::Unlocked => {
                    self.state = LockState::Locked;
                    LockTransition::Locked
                }
            };
        }

        // Out of lock there is no grace period
        if self.state == LockState::Unlocked {
            self.consecutive_failures = self.max_failures;
        } else {
            self.consecutive_failures += 1;
        }

        if self.consecutive_failures < self.max_failures {
            return LockTransition::None;
        }

        self.consecutive_failures = 0;
        match std::mem::replace(&mut self.state, LockState::Unlocked) {
            LockState::Unlocked => LockTransition::StillUnlocked,
            LockState::Acquiring | LockState::Locked => LockTransition::Unlocked,
        }
    }

    pub fn reset(&mut self) {
        self.state = LockState::Acquiring;
        self.consecutive_failures = 0;
    }
}
