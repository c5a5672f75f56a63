//! Detection-to-alert debouncer.
//!
//! Turns a noisy per-frame "condition present" signal into alert decisions:
//! - the condition must hold continuously for `sustain` before the first alert
//! - any frame without the condition resets the streak immediately
//! - alerts are spaced by strictly more than `cooldown`
//!
//! Timestamps are offsets on the session clock. Callers feed exactly one
//! evaluation per processed frame, in capture order.
//!
//! The streak start is not reset when an alert fires. A streak that outlasts
//! the cooldown alerts again on the first frame past the cooldown, and keeps
//! doing so once per cooldown window until the condition drops.

use std::time::Duration;

/// Default sustain window ("wait_time").
pub const DEFAULT_SUSTAIN_SECS: f64 = 5.0;

/// Default minimum gap between alerts ("notify_cooldown").
pub const DEFAULT_COOLDOWN_SECS: f64 = 10.0;

/// Timing parameters for a debouncer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceConfig {
    /// How long the condition must hold continuously before alerting.
    pub sustain: Duration,
    /// Minimum gap between two alerts (compared with strict `>`).
    pub cooldown: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            sustain: Duration::from_secs_f64(DEFAULT_SUSTAIN_SECS),
            cooldown: Duration::from_secs_f64(DEFAULT_COOLDOWN_SECS),
        }
    }
}

/// Outcome of a single evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertDecision {
    NoAlert,
    /// Carries the timestamp of the frame that triggered it.
    Alert(Duration),
}

impl AlertDecision {
    pub fn is_alert(&self) -> bool {
        matches!(self, AlertDecision::Alert(_))
    }
}

/// Internal debouncer state. Exposed read-only for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebounceState {
    /// Start of the current unbroken streak, if any.
    pub condition_start: Option<Duration>,
    /// Time of the most recent alert. Never cleared.
    pub last_alert: Option<Duration>,
}

/// Debouncer owned by exactly one session.
#[derive(Clone, Debug)]
pub struct FallDebouncer {
    config: DebounceConfig,
    state: DebounceState,
}

impl FallDebouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            state: DebounceState::default(),
        }
    }

    pub fn config(&self) -> DebounceConfig {
        self.config
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Feed one frame's condition at session time `now`.
    pub fn evaluate(&mut self, condition_met: bool, now: Duration) -> AlertDecision {
        if !condition_met {
            self.state.condition_start = None;
            return AlertDecision::NoAlert;
        }

        let Some(start) = self.state.condition_start else {
            self.state.condition_start = Some(now);
            return AlertDecision::NoAlert;
        };

        let elapsed = now.saturating_sub(start);
        if elapsed < self.config.sustain {
            return AlertDecision::NoAlert;
        }

        let cooled_down = match self.state.last_alert {
            None => true,
            Some(last) => now.saturating_sub(last) > self.config.cooldown,
        };
        if !cooled_down {
            return AlertDecision::NoAlert;
        }

        self.state.last_alert = Some(now);
        AlertDecision::Alert(now)
    }
}

impl Default for FallDebouncer {
    fn default() -> Self {
        Self::new(DebounceConfig::default())
    }
}
