//! Per-tab inactivity detection.
//!
//! The monitor only runs while a user is authenticated. After
//! `idle_timeout - warning_window` without activity it enters a warning
//! state and counts the rest of the window down at one-second granularity;
//! reaching zero reports [`IdleEvent::TimedOut`].

use std::time::Duration;

use tracing::debug;

use super::TimerSlot;
use crate::bus::Outbound;
use crate::clock::Monotonic;
use crate::error::ConfigError;

/// Granularity of the warning countdown.
pub const DEFAULT_COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Raw input events that count as user activity.
///
/// Deliberately broad; double counting is harmless because resets are
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    PointerDown,
    PointerMove,
    KeyDown,
    Scroll,
    TouchStart,
}

/// Where an activity signal came from.
///
/// Only local input may be announced to other tabs; activity relayed from
/// the bus resets this tab silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySource {
    Local(InputKind),
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    idle_timeout: Duration,
    warning_window: Duration,
    countdown_interval: Duration,
}

impl IdlePolicy {
    pub fn new(idle_timeout: Duration, warning_window: Duration) -> Result<Self, ConfigError> {
        if warning_window.is_zero() {
            return Err(ConfigError::Zero("warning window"));
        }
        if warning_window >= idle_timeout {
            return Err(ConfigError::WarningNotShorterThanTimeout {
                warning_ms: warning_window.as_millis() as u64,
                timeout_ms: idle_timeout.as_millis() as u64,
            });
        }
        Ok(Self {
            idle_timeout,
            warning_window,
            countdown_interval: DEFAULT_COUNTDOWN_INTERVAL,
        })
    }

    pub fn with_countdown_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Zero("countdown interval"));
        }
        self.countdown_interval = interval;
        Ok(self)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn warning_window(&self) -> Duration {
        self.warning_window
    }

    /// Quiet period before the warning starts.
    pub fn quiet_period(&self) -> Duration {
        self.idle_timeout - self.warning_window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleState {
    pub last_activity_at: Option<Monotonic>,
    pub is_warning: bool,
    pub remaining: Duration,
    pub is_idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    WarningStarted { remaining: Duration },
    Countdown { remaining: Duration },
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    policy: IdlePolicy,
    state: IdleState,
    monitoring: bool,
    warning_timer: TimerSlot,
    countdown_timer: TimerSlot,
    logout_at: Option<Monotonic>,
}

impl IdleMonitor {
    pub fn new(policy: IdlePolicy) -> Self {
        Self {
            policy,
            state: IdleState {
                last_activity_at: None,
                is_warning: false,
                remaining: policy.warning_window,
                is_idle: false,
            },
            monitoring: false,
            warning_timer: TimerSlot::new(),
            countdown_timer: TimerSlot::new(),
            logout_at: None,
        }
    }

    pub fn policy(&self) -> &IdlePolicy {
        &self.policy
    }

    pub fn state(&self) -> &IdleState {
        &self.state
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Begin monitoring a freshly authenticated session.
    pub fn start(&mut self, now: Monotonic) {
        debug!("Idle monitor started");
        self.monitoring = true;
        self.state.is_idle = false;
        self.rearm(now);
    }

    /// Stop monitoring and drop every pending deadline.
    pub fn stop(&mut self) {
        if self.monitoring {
            debug!("Idle monitor stopped");
        }
        self.monitoring = false;
        self.clear_timers();
        self.state.is_warning = false;
        self.state.remaining = self.policy.warning_window;
    }

    /// Restart the inactivity countdown.
    ///
    /// Returns the activity announcement to publish, which only local input
    /// produces. Does nothing while not monitoring.
    pub fn reset(&mut self, source: ActivitySource, now: Monotonic) -> Option<Outbound> {
        if !self.monitoring {
            return None;
        }
        self.rearm(now);

        match source {
            ActivitySource::Local(_) => Some(Outbound::activity()),
            ActivitySource::Remote => None,
        }
    }

    /// Advance the countdown. Call repeatedly until it returns `None`.
    pub fn poll(&mut self, now: Monotonic) -> Option<IdleEvent> {
        if !self.monitoring {
            return None;
        }

        if self.warning_timer.fire_if_due(now) {
            let logout_at = self
                .state
                .last_activity_at
                .map(|at| at + self.policy.idle_timeout)
                .unwrap_or(now + self.policy.warning_window);
            let remaining = logout_at.saturating_until(now);
            self.logout_at = Some(logout_at);
            self.state.is_warning = true;
            self.state.remaining = remaining;
            self.countdown_timer.arm(now + self.policy.countdown_interval.min(remaining));
            debug!(remaining_ms = remaining.as_millis() as u64, "Idle warning started");
            return Some(IdleEvent::WarningStarted { remaining });
        }

        if self.countdown_timer.fire_if_due(now) {
            let logout_at = self.logout_at.unwrap_or(now);
            let remaining = logout_at.saturating_until(now);
            self.state.remaining = remaining;
            if remaining.is_zero() {
                self.clear_timers();
                debug!("Idle countdown elapsed");
                return Some(IdleEvent::TimedOut);
            }
            self.countdown_timer.arm(now + self.policy.countdown_interval.min(remaining));
            return Some(IdleEvent::Countdown { remaining });
        }

        None
    }

    /// Record that the session ended: idle, no warning, nothing pending.
    pub fn mark_logged_out(&mut self) {
        self.stop();
        self.state.is_idle = true;
    }

    pub fn next_deadline(&self) -> Option<Monotonic> {
        match (self.warning_timer.deadline(), self.countdown_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn rearm(&mut self, now: Monotonic) {
        self.clear_timers();
        self.state.last_activity_at = Some(now);
        self.state.is_warning = false;
        self.state.remaining = self.policy.warning_window;
        self.warning_timer.arm(now + self.policy.quiet_period());
    }

    fn clear_timers(&mut self) {
        self.warning_timer.clear();
        self.countdown_timer.clear();
        self.logout_at = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
