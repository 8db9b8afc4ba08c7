//! Per-tab session lifecycle controller.
//!
//! Owns one tab's refresh scheduler, idle monitor and bus channel, with the
//! clock and credential owner injected. All methods except [`renew`] are
//! synchronous and run to completion, matching a single cooperative event
//! loop; the loop itself lives in [`super::TabRuntime`].
//!
//! [`renew`]: SessionController::renew

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::{CredentialProvider, RenewError};
use crate::bus::{Outbound, SessionBus, SessionMessage, TabChannel, TabId};
use crate::clock::{Clock, Monotonic};
use crate::config::SessionPolicy;
use crate::timers::{
    ActivitySource, IdleEvent, IdleMonitor, InputKind, RefreshDecision, RefreshScheduler,
    RefreshState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    IdleTimeout,
    RenewalRejected,
    Expired,
    /// Another tab ended the session.
    Remote,
}

/// Something the rendering layer may want to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Warning { remaining: Duration },
    Countdown { remaining: Duration },
    Renewed { expires_at: DateTime<Utc> },
    LoggedOut { reason: LogoutReason },
}

/// What the rendering layer displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub is_authenticated: bool,
    pub is_idle: bool,
    pub is_warning: bool,
    pub remaining_ms: u64,
}

pub struct SessionController {
    tab: TabId,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialProvider>,
    channel: Option<TabChannel>,
    refresh: RefreshScheduler,
    idle: IdleMonitor,
    renewal_pending: bool,
}

impl SessionController {
    /// Build a controller. Without a channel the tab runs on its own.
    pub fn new(
        tab: TabId,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
        credentials: Arc<dyn CredentialProvider>,
        channel: Option<TabChannel>,
    ) -> Self {
        if channel.is_none() {
            warn!(tab = %tab, "No session bus, cross-tab sync disabled for this tab");
        }
        Self {
            tab,
            clock,
            credentials,
            channel,
            refresh: RefreshScheduler::new(policy.refresh_margin),
            idle: IdleMonitor::new(policy.idle),
            renewal_pending: false,
        }
    }

    /// Build a controller attached to `bus`, degrading to single-tab mode
    /// when the bus could not be constructed.
    pub fn attach(
        tab: TabId,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
        credentials: Arc<dyn CredentialProvider>,
        bus: Option<&SessionBus>,
    ) -> Self {
        let channel = bus.and_then(|bus| match bus.open(tab) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!(tab = %tab, error = %e, "Could not open session channel");
                None
            }
        });
        Self::new(tab, policy, clock, credentials, channel)
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn idle(&self) -> &IdleMonitor {
        &self.idle
    }

    pub fn refresh(&self) -> &RefreshScheduler {
        &self.refresh
    }

    pub fn is_cross_tab(&self) -> bool {
        self.channel.as_ref().map(|c| !c.is_closed()).unwrap_or(false)
    }

    /// A renewal is due and should be awaited through [`Self::renew`].
    pub fn renewal_pending(&self) -> bool {
        self.renewal_pending
    }

    /// The session became authenticated: start monitoring and schedule
    /// renewal. Resets this tab silently.
    pub fn activate(&mut self) {
        let snapshot = self.credentials.snapshot();
        if !snapshot.is_authenticated {
            debug!(tab = %self.tab, "Activate ignored, not authenticated");
            return;
        }
        let now = self.clock.now();
        info!(tab = %self.tab, "Session monitoring started");
        self.idle.start(now.monotonic);
        let decision = self.refresh.schedule_proactive_refresh(&snapshot, now);
        self.apply(decision);
    }

    /// The session ended for a reason outside this core (explicit sign-out
    /// through the UI, say). Stops everything without announcing.
    pub fn deactivate(&mut self) {
        debug!(tab = %self.tab, "Session monitoring stopped");
        self.idle.stop();
        self.refresh.clear_proactive_refresh();
        self.renewal_pending = false;
    }

    /// Raw user input in this tab.
    pub fn record_input(&mut self, kind: InputKind) {
        if !self.still_authenticated() {
            return;
        }
        let now = self.clock.now();
        if let Some(outbound) = self.idle.reset(ActivitySource::Local(kind), now.monotonic) {
            self.publish(outbound);
        }
        if self.idle.is_monitoring() {
            let snapshot = self.credentials.snapshot();
            if let Some(decision) = self.refresh.ensure_scheduled(&snapshot, now) {
                self.apply(decision);
            }
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        let now = self.clock.monotonic();
        if self.refresh.set_tab_visible(visible, now) {
            self.renewal_pending = true;
        }
    }

    /// React to a message from another tab. Never re-publishes.
    pub fn handle_remote(&mut self, message: SessionMessage) {
        if !self.still_authenticated() {
            return;
        }
        match message {
            SessionMessage::Activity => {
                let now = self.clock.monotonic();
                let echo = self.idle.reset(ActivitySource::Remote, now);
                debug_assert!(echo.is_none());
            }
            SessionMessage::Logout => {
                if self.end_session(LogoutReason::Remote) {
                    info!(tab = %self.tab, "Signed out by another tab");
                }
            }
        }
    }

    /// Drain and handle everything waiting on the bus.
    pub fn pump_remote(&mut self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.channel.as_mut().and_then(TabChannel::try_recv) {
            debug!(tab = %self.tab, from = %envelope.origin, message = ?envelope.message, "Received");
            self.handle_remote(envelope.message);
            handled += 1;
        }
        handled
    }

    /// Wait for the next message from another tab. Pends forever without a
    /// channel.
    pub async fn recv_remote(&mut self) -> SessionMessage {
        match self.channel.as_mut() {
            Some(channel) => {
                let envelope = channel.recv().await;
                debug!(tab = %self.tab, from = %envelope.origin, message = ?envelope.message, "Received");
                envelope.message
            }
            None => std::future::pending().await,
        }
    }

    /// Fire whatever timers are due.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !self.still_authenticated() {
            return events;
        }
        let now = self.clock.monotonic();

        if self.refresh.poll(now) {
            debug!(tab = %self.tab, "Proactive renewal due");
            self.renewal_pending = true;
        }

        while let Some(event) = self.idle.poll(now) {
            match event {
                IdleEvent::WarningStarted { remaining } => {
                    info!(tab = %self.tab, remaining_secs = remaining.as_secs(), "Idle warning");
                    events.push(SessionEvent::Warning { remaining });
                }
                IdleEvent::Countdown { remaining } => {
                    events.push(SessionEvent::Countdown { remaining });
                }
                IdleEvent::TimedOut => {
                    if self.logout(LogoutReason::IdleTimeout) {
                        events.push(SessionEvent::LoggedOut {
                            reason: LogoutReason::IdleTimeout,
                        });
                    }
                    break;
                }
            }
        }
        events
    }

    /// Ask the credential owner for a fresh credential and reschedule.
    pub async fn renew(&mut self) -> Option<SessionEvent> {
        self.renewal_pending = false;
        if !self.credentials.snapshot().is_authenticated {
            return None;
        }

        match self.credentials.renew().await {
            Ok(expires_at) => {
                info!(tab = %self.tab, %expires_at, "Credential renewed");
                let snapshot = self.credentials.snapshot();
                let decision = self.refresh.schedule_proactive_refresh(&snapshot, self.clock.now());
                if decision == RefreshDecision::RenewNow {
                    // Renewed credential already inside the margin; wait for
                    // the next natural trigger instead of looping.
                    warn!(tab = %self.tab, %expires_at, "Renewed credential expires within refresh margin");
                    self.refresh.clear_proactive_refresh();
                } else {
                    self.apply(decision);
                }
                Some(SessionEvent::Renewed { expires_at })
            }
            Err(RenewError::Rejected(reason)) => {
                warn!(tab = %self.tab, %reason, "Renewal rejected, signing out");
                self.logout(LogoutReason::RenewalRejected)
                    .then_some(SessionEvent::LoggedOut {
                        reason: LogoutReason::RenewalRejected,
                    })
            }
            Err(e @ RenewError::Transient(_)) => {
                let decision = self.refresh.schedule_retry(self.clock.monotonic());
                warn!(tab = %self.tab, error = %e, ?decision, "Renewal failed, keeping current credential");
                None
            }
        }
    }

    /// Reactive check for a credential that expired without being renewed.
    pub fn check_expiration(&mut self) -> Option<SessionEvent> {
        let snapshot = self.credentials.snapshot();
        if snapshot.is_authenticated && snapshot.is_expired(self.clock.wall()) {
            warn!(tab = %self.tab, "Credential expired, signing out");
            return self
                .logout(LogoutReason::Expired)
                .then_some(SessionEvent::LoggedOut {
                    reason: LogoutReason::Expired,
                });
        }
        None
    }

    /// Authoritative logout: mark idle, tell every other tab, sign out.
    /// Returns `false` when the session had already ended.
    pub fn logout(&mut self, reason: LogoutReason) -> bool {
        if !self.end_session(reason) {
            return false;
        }
        self.publish(Outbound::logout());
        true
    }

    /// The credential owner can sign out without telling this tab. Once it
    /// has, stop monitoring quietly: no announcements, no second sign-out.
    fn still_authenticated(&mut self) -> bool {
        if self.credentials.snapshot().is_authenticated {
            return true;
        }
        let timer_pending = matches!(
            self.refresh.state(),
            RefreshState::Scheduled { .. } | RefreshState::Suspended { .. }
        );
        if self.idle.is_monitoring() || timer_pending {
            info!(tab = %self.tab, "Credential owner signed out, stopping session monitoring");
            self.deactivate();
        }
        false
    }

    fn end_session(&mut self, reason: LogoutReason) -> bool {
        if self.idle.state().is_idle {
            return false;
        }
        info!(tab = %self.tab, ?reason, "Session ended");
        self.idle.mark_logged_out();
        self.refresh.clear_proactive_refresh();
        self.renewal_pending = false;
        self.credentials.sign_out();
        true
    }

    pub fn next_deadline(&self) -> Option<Monotonic> {
        match (self.refresh.next_deadline(), self.idle.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// How long the event loop may sleep before something is due.
    pub fn time_until_next_deadline(&self) -> Option<Duration> {
        let now = self.clock.monotonic();
        self.next_deadline().map(|at| at.saturating_until(now))
    }

    pub fn view(&self) -> SessionView {
        let state = self.idle.state();
        SessionView {
            is_authenticated: self.credentials.snapshot().is_authenticated,
            is_idle: state.is_idle,
            is_warning: state.is_warning,
            remaining_ms: state.remaining.as_millis() as u64,
        }
    }

    /// Teardown: clear every timer and detach from the bus.
    pub fn close(&mut self) {
        self.deactivate();
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
    }

    fn publish(&mut self, outbound: Outbound) {
        if let Some(channel) = self.channel.as_mut() {
            channel.publish(outbound);
        }
    }

    fn apply(&mut self, decision: RefreshDecision) {
        if decision == RefreshDecision::RenewNow {
            self.renewal_pending = true;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::testing::{policy, FakeCredentials};

    struct Tab {
        controller: SessionController,
        credentials: Arc<FakeCredentials>,
    }

    fn open_tab(id: u64, clock: &Arc<ManualClock>, bus: Option<&SessionBus>, ttl: Duration) -> Tab {
        let credentials = Arc::new(FakeCredentials::signed_in(clock.clone(), ttl));
        let mut controller = SessionController::attach(
            TabId::new(id),
            policy(5_000, 2_000, 1_000),
            clock.clone(),
            credentials.clone(),
            bus,
        );
        controller.activate();
        Tab { controller, credentials }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    fn advance(clock: &ManualClock, ms: u64) {
        clock.advance(Duration::from_millis(ms));
    }

    #[test]
    fn test_warning_then_reset_restores_window() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(3600));

        advance(&clock, 3_000);
        let events = tab.controller.poll();
        assert_eq!(events, vec![SessionEvent::Warning { remaining: Duration::from_millis(2_000) }]);
        let view = tab.controller.view();
        assert!(view.is_warning);
        assert_eq!(view.remaining_ms, 2_000);

        advance(&clock, 500);
        tab.controller.record_input(InputKind::PointerMove);
        let view = tab.controller.view();
        assert!(!view.is_warning);
        assert_eq!(view.remaining_ms, 2_000);
    }

    #[test]
    fn test_idle_timeout_logs_out_once() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(3600));

        advance(&clock, 5_000);
        let events = tab.controller.poll();
        assert_eq!(
            events.last(),
            Some(&SessionEvent::LoggedOut { reason: LogoutReason::IdleTimeout })
        );
        assert_eq!(tab.credentials.sign_outs(), 1);
        assert!(tab.controller.view().is_idle);
        assert_eq!(tab.controller.next_deadline(), None);

        advance(&clock, 10_000);
        assert!(tab.controller.poll().is_empty());
        assert!(!tab.controller.logout(LogoutReason::IdleTimeout));
        assert_eq!(tab.credentials.sign_outs(), 1);
    }

    #[test]
    fn test_remote_activity_resets_without_echo() {
        let clock = clock();
        let bus = SessionBus::new(16).expect("bus");
        let mut a = open_tab(1, &clock, Some(&bus), Duration::from_secs(3600));
        let mut b = open_tab(2, &clock, Some(&bus), Duration::from_secs(3600));
        let mut observer = bus.open(TabId::new(99)).expect("open");

        advance(&clock, 2_500);
        a.controller.record_input(InputKind::KeyDown);
        assert_eq!(b.controller.pump_remote(), 1);

        // Only A's announcement is on the bus; B did not relay it.
        let seen: Vec<TabId> = std::iter::from_fn(|| observer.try_recv()).map(|e| e.origin).collect();
        assert_eq!(seen, vec![TabId::new(1)]);
        assert_eq!(a.controller.pump_remote(), 0);

        // B's quiet period restarted at 2500
        advance(&clock, 2_000);
        assert!(b.controller.poll().is_empty());
        advance(&clock, 1_000);
        assert!(matches!(b.controller.poll().as_slice(), [SessionEvent::Warning { .. }]));
    }

    #[test]
    fn test_logout_propagates_to_other_tab() {
        let clock = clock();
        let bus = SessionBus::new(16).expect("bus");
        let mut a = open_tab(1, &clock, Some(&bus), Duration::from_secs(3600));
        let mut b = open_tab(2, &clock, Some(&bus), Duration::from_secs(3600));

        advance(&clock, 1_000);
        assert!(a.controller.logout(LogoutReason::IdleTimeout));

        assert!(!b.controller.view().is_idle);
        b.controller.pump_remote();
        assert!(b.controller.view().is_idle);
        assert_eq!(b.credentials.sign_outs(), 1);
        // B's own countdown never elapsed and nothing is left armed
        assert_eq!(b.controller.next_deadline(), None);
        // B does not bounce the logout back
        assert_eq!(a.controller.pump_remote(), 0);
    }

    #[test]
    fn test_without_bus_still_protects_tab() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(3600));
        assert!(!tab.controller.is_cross_tab());

        tab.controller.record_input(InputKind::Scroll);
        advance(&clock, 5_000);
        assert!(tab
            .controller
            .poll()
            .contains(&SessionEvent::LoggedOut { reason: LogoutReason::IdleTimeout }));
    }

    #[test]
    fn test_anonymous_tab_arms_nothing() {
        let clock = clock();
        let credentials = Arc::new(FakeCredentials::anonymous(clock.clone()));
        let mut controller = SessionController::new(
            TabId::new(1),
            policy(5_000, 2_000, 1_000),
            clock.clone(),
            credentials,
            None,
        );
        controller.activate();
        controller.record_input(InputKind::KeyDown);
        assert_eq!(controller.next_deadline(), None);
        assert!(!controller.renewal_pending());
    }

    #[tokio::test]
    async fn test_renewal_fires_before_expiry_and_reschedules() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(10));
        assert_eq!(tab.controller.refresh().next_deadline(), Some(Monotonic::from_millis(9_000)));

        // Keep the idle monitor quiet while time passes
        for _ in 0..9 {
            advance(&clock, 1_000);
            tab.controller.record_input(InputKind::KeyDown);
            tab.controller.poll();
        }
        assert!(tab.controller.renewal_pending());

        let event = tab.controller.renew().await;
        assert!(matches!(event, Some(SessionEvent::Renewed { .. })));
        assert_eq!(tab.credentials.renewals(), 1);
        assert_eq!(
            tab.controller.refresh().next_deadline(),
            Some(Monotonic::from_millis(18_000))
        );
    }

    #[tokio::test]
    async fn test_rejected_renewal_logs_out_everywhere() {
        let clock = clock();
        let bus = SessionBus::new(16).expect("bus");
        let mut a = open_tab(1, &clock, Some(&bus), Duration::from_secs(10));
        let mut b = open_tab(2, &clock, Some(&bus), Duration::from_secs(10));
        a.credentials.fail_next_renewal(RenewError::Rejected("refresh token revoked".into()));

        let event = a.controller.renew().await;
        assert_eq!(event, Some(SessionEvent::LoggedOut { reason: LogoutReason::RenewalRejected }));
        b.controller.pump_remote();
        assert!(b.controller.view().is_idle);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_once_despite_input_burst() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(10));
        for _ in 0..9 {
            advance(&clock, 1_000);
            tab.controller.record_input(InputKind::KeyDown);
            tab.controller.poll();
        }
        assert!(tab.controller.renewal_pending());
        tab.credentials.fail_next_renewal(RenewError::Transient("timeout".into()));

        assert_eq!(tab.controller.renew().await, None);
        assert!(!tab.controller.renewal_pending());
        assert!(!tab.controller.view().is_idle);
        assert_eq!(tab.credentials.sign_outs(), 0);
        // One retry, a quarter of the margin out
        assert_eq!(
            tab.controller.refresh().next_deadline(),
            Some(Monotonic::from_millis(9_250))
        );

        // A pointer-move burst before the retry starts no renewals
        for _ in 0..15 {
            advance(&clock, 16);
            tab.controller.record_input(InputKind::PointerMove);
            tab.controller.poll();
            assert!(!tab.controller.renewal_pending());
        }
        assert_eq!(tab.credentials.attempts(), 1);

        advance(&clock, 10);
        tab.controller.poll();
        assert!(tab.controller.renewal_pending());
        assert!(matches!(tab.controller.renew().await, Some(SessionEvent::Renewed { .. })));
        assert_eq!(tab.credentials.attempts(), 2);
        assert_eq!(tab.credentials.renewals(), 1);
    }

    #[test]
    fn test_owner_sign_out_stops_tab_without_announcing() {
        let clock = clock();
        let bus = SessionBus::new(16).expect("bus");
        let mut a = open_tab(1, &clock, Some(&bus), Duration::from_secs(3600));
        let mut b = open_tab(2, &clock, Some(&bus), Duration::from_secs(3600));
        let mut observer = bus.open(TabId::new(99)).expect("open");

        // The credential owner signs out without a SignedOut event
        a.credentials.sign_out();
        a.controller.record_input(InputKind::KeyDown);
        assert_eq!(observer.try_recv(), None);
        assert!(!a.controller.idle().is_monitoring());
        assert_eq!(a.controller.next_deadline(), None);

        advance(&clock, 5_000);
        assert!(a.controller.poll().is_empty());
        assert_eq!(observer.try_recv(), None);
        assert_eq!(a.credentials.sign_outs(), 1);
        assert!(!a.controller.view().is_authenticated);

        // A logout from elsewhere does not sign the owner out a second time
        b.controller.record_input(InputKind::KeyDown);
        assert!(b.controller.logout(LogoutReason::IdleTimeout));
        a.controller.pump_remote();
        assert_eq!(a.credentials.sign_outs(), 1);
    }

    #[test]
    fn test_expired_credential_is_caught_reactively() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(4));
        assert_eq!(tab.controller.check_expiration(), None);

        advance(&clock, 4_000);
        assert_eq!(
            tab.controller.check_expiration(),
            Some(SessionEvent::LoggedOut { reason: LogoutReason::Expired })
        );
    }

    #[test]
    fn test_hidden_tab_renews_on_return_after_target() {
        let clock = clock();
        let mut tab = open_tab(1, &clock, None, Duration::from_secs(10));

        advance(&clock, 2_000);
        tab.controller.set_visible(false);
        advance(&clock, 9_000);
        // Suspended renewal has no deadline while hidden
        assert_eq!(tab.controller.refresh().next_deadline(), None);
        assert!(!tab.controller.renewal_pending());

        tab.controller.set_visible(true);
        assert!(tab.controller.renewal_pending());
    }

    #[test]
    fn test_close_clears_and_detaches() {
        let clock = clock();
        let bus = SessionBus::new(16).expect("bus");
        let mut tab = open_tab(1, &clock, Some(&bus), Duration::from_secs(3600));
        assert_eq!(bus.open_channels(), 1);

        tab.controller.close();
        tab.controller.close();
        assert_eq!(tab.controller.next_deadline(), None);
        assert_eq!(bus.open_channels(), 0);
    }
}
