//! Stand-ins for the collaborators a real host would provide: a credential
//! service that issues short-lived tokens, and a data cache that refetches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tabsession_core::{
    AccessToken, CacheKey, CacheRefresher, Clock, CredentialProvider, CredentialSnapshot,
    RenewError, SessionCredential,
};
use tracing::{debug, info};

/// Simulated network latency for a renewal round trip.
const RENEW_LATENCY_MS: u64 = 50;

/// Every Nth renewal fails transiently, to exercise the retry path.
const TRANSIENT_FAILURE_EVERY: u64 = 4;

/// One tab's credential holder, talking to a simulated token service.
pub struct SimulatedAuth {
    label: String,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    credential: Mutex<Option<SessionCredential>>,
    attempts: AtomicU64,
}

impl SimulatedAuth {
    /// Sign in immediately with a fresh token.
    pub fn signed_in(label: impl Into<String>, clock: Arc<dyn Clock>, ttl: Duration) -> Result<Self> {
        let expires_at = clock.wall() + chrono::Duration::from_std(ttl)?;
        let label = label.into();
        let credential = SessionCredential::new(AccessToken::new(format!("{label}-token-0")), expires_at);
        Ok(Self {
            label,
            clock,
            ttl,
            credential: Mutex::new(Some(credential)),
            attempts: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SessionCredential>> {
        self.credential.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CredentialProvider for SimulatedAuth {
    fn snapshot(&self) -> CredentialSnapshot {
        self.lock()
            .as_ref()
            .map(SessionCredential::snapshot)
            .unwrap_or_else(CredentialSnapshot::anonymous)
    }

    async fn renew(&self) -> Result<DateTime<Utc>, RenewError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(RENEW_LATENCY_MS)).await;

        if attempt % TRANSIENT_FAILURE_EVERY == 0 {
            return Err(RenewError::from_status(503, "token service busy"));
        }

        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| RenewError::Transient(e.to_string()))?;
        let expires_at = self.clock.wall() + ttl;

        let mut credential = self.lock();
        match credential.as_mut() {
            Some(current) => {
                current.token = AccessToken::new(format!("{}-token-{}", self.label, attempt));
                current.expires_at = expires_at;
                debug!(tab = %self.label, token = %current.token, "Token reissued");
                Ok(expires_at)
            }
            None => Err(RenewError::from_status(401, "no session")),
        }
    }

    fn sign_out(&self) {
        if self.lock().take().is_some() {
            info!(tab = %self.label, "Credential discarded, redirecting to sign-in");
        }
    }
}

/// Cache that just logs what it would refetch.
#[derive(Default)]
pub struct LoggingRefresher {
    refreshed: AtomicU64,
}

impl LoggingRefresher {
    pub fn refreshed(&self) -> u64 {
        self.refreshed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheRefresher for LoggingRefresher {
    async fn refresh(&self, key: &CacheKey) -> Result<()> {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        info!(key = %key, "Refetching query");
        Ok(())
    }
}
