//! Proactive credential renewal scheduling.
//!
//! The scheduler decides *when* to renew; performing the renewal belongs to
//! the controller and the credential owner. At most one renewal timer is
//! outstanding per tab. While the tab is hidden the timer is suspended and
//! its target remembered, so a throttled background tab neither fires nor
//! lets the deadline slip.

use std::time::Duration;

use tracing::debug;

use crate::auth::CredentialSnapshot;
use crate::clock::{Monotonic, Now};

/// Floor between renewal attempts after a transient failure.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Nothing scheduled yet, or the last timer fired.
    Idle,
    Scheduled { fire_at: Monotonic },
    /// Tab hidden; the timer is cancelled but its target kept.
    Suspended { fire_at: Monotonic },
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum RefreshDecision {
    /// The renewal target has already passed; renew immediately.
    RenewNow,
    Armed { at: Monotonic },
    /// Tab is hidden; the target is remembered until it becomes visible.
    Suspended { at: Monotonic },
    NotAuthenticated,
}

#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    margin: Duration,
    state: RefreshState,
    visible: bool,
}

impl RefreshScheduler {
    /// `margin` is how long before expiry to renew. A zero margin is bumped
    /// to one millisecond so the target always lies strictly before expiry.
    pub fn new(margin: Duration) -> Self {
        Self {
            margin: margin.max(Duration::from_millis(1)),
            state: RefreshState::Idle,
            visible: true,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Arm the single renewal timer for `expiry - margin`, replacing any
    /// timer already armed.
    pub fn schedule_proactive_refresh(
        &mut self,
        credential: &CredentialSnapshot,
        now: Now,
    ) -> RefreshDecision {
        let expires_at = match (credential.is_authenticated, credential.expires_at) {
            (true, Some(at)) => at,
            _ => {
                self.clear_proactive_refresh();
                return RefreshDecision::NotAuthenticated;
            }
        };

        let until_expiry = (expires_at - now.wall).to_std().unwrap_or(Duration::ZERO);
        let lead = match until_expiry.checked_sub(self.margin) {
            Some(lead) if !lead.is_zero() => lead,
            _ => {
                debug!(?until_expiry, "Renewal target already passed");
                self.state = RefreshState::Idle;
                return RefreshDecision::RenewNow;
            }
        };

        debug!(fire_in_ms = lead.as_millis() as u64, visible = self.visible, "Proactive renewal armed");
        self.arm(now.monotonic + lead)
    }

    /// Arm one retry after a renewal failed transiently. Activity cannot
    /// bring it forward, so bursts of input never turn into bursts of
    /// renewal calls.
    pub fn schedule_retry(&mut self, now: Monotonic) -> RefreshDecision {
        let delay = self.retry_delay();
        debug!(retry_in_ms = delay.as_millis() as u64, "Renewal retry armed");
        self.arm(now + delay)
    }

    /// A quarter of the margin, so a few attempts fit before expiry.
    pub fn retry_delay(&self) -> Duration {
        (self.margin / 4).max(MIN_RETRY_DELAY)
    }

    fn arm(&mut self, fire_at: Monotonic) -> RefreshDecision {
        if self.visible {
            self.state = RefreshState::Scheduled { fire_at };
            RefreshDecision::Armed { at: fire_at }
        } else {
            self.state = RefreshState::Suspended { fire_at };
            RefreshDecision::Suspended { at: fire_at }
        }
    }

    /// Schedule only if no timer is armed or suspended.
    pub fn ensure_scheduled(&mut self, credential: &CredentialSnapshot, now: Now) -> Option<RefreshDecision> {
        match self.state {
            RefreshState::Scheduled { .. } | RefreshState::Suspended { .. } => None,
            RefreshState::Idle | RefreshState::Cleared => {
                Some(self.schedule_proactive_refresh(credential, now))
            }
        }
    }

    /// Cancel the pending timer, if any. With nothing pending the state is
    /// left as it is.
    pub fn clear_proactive_refresh(&mut self) {
        if let RefreshState::Scheduled { .. } | RefreshState::Suspended { .. } = self.state {
            debug!(state = ?self.state, "Proactive renewal cleared");
            self.state = RefreshState::Cleared;
        }
    }

    /// Visibility input. Returns `true` when renewal must happen right away
    /// because the remembered target passed while the tab was hidden.
    #[must_use]
    pub fn set_tab_visible(&mut self, visible: bool, now: Monotonic) -> bool {
        if visible == self.visible {
            return false;
        }
        self.visible = visible;

        match (visible, self.state) {
            (false, RefreshState::Scheduled { fire_at }) => {
                debug!("Tab hidden, suspending proactive renewal");
                self.state = RefreshState::Suspended { fire_at };
                false
            }
            (true, RefreshState::Suspended { fire_at }) if fire_at <= now => {
                debug!("Tab visible, renewal target passed while hidden");
                self.state = RefreshState::Idle;
                true
            }
            (true, RefreshState::Suspended { fire_at }) => {
                debug!(
                    remaining_ms = fire_at.saturating_until(now).as_millis() as u64,
                    "Tab visible, resuming proactive renewal"
                );
                self.state = RefreshState::Scheduled { fire_at };
                false
            }
            _ => false,
        }
    }

    /// Fire the armed timer once it is due.
    pub fn poll(&mut self, now: Monotonic) -> bool {
        match self.state {
            RefreshState::Scheduled { fire_at } if fire_at <= now => {
                self.state = RefreshState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Deadline the event loop should wake for. Suspended timers have none.
    pub fn next_deadline(&self) -> Option<Monotonic> {
        match self.state {
            RefreshState::Scheduled { fire_at } => Some(fire_at),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
