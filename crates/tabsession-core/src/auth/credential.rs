use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::RenewError;

/// Opaque bearer token.
///
/// Not `Serialize` and redacted in `Debug`/`Display`, so it cannot end up in
/// a persisted file or a log line by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw value, for attaching to an outgoing request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// The in-memory record of the current login.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub token: AccessToken,
    pub expires_at: DateTime<Utc>,
    pub authenticated: bool,
}

impl SessionCredential {
    pub fn new(token: AccessToken, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            expires_at,
            authenticated: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if the credential will expire within `margin` and should be renewed
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now >= self.expires_at - margin
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        CredentialSnapshot {
            is_authenticated: self.authenticated,
            expires_at: Some(self.expires_at),
        }
    }
}

/// What the lifecycle controller is allowed to see of the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CredentialSnapshot {
    pub is_authenticated: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSnapshot {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(expires_at: DateTime<Utc>) -> Self {
        Self {
            is_authenticated: true,
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// The collaborator that owns the credential.
///
/// This crate only reads the credential and asks for it to be renewed or
/// discarded; it never writes it.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn snapshot(&self) -> CredentialSnapshot;

    /// Renew the credential, returning its new absolute expiry.
    async fn renew(&self) -> Result<DateTime<Utc>, RenewError>;

    /// Discard the credential and send the user back to sign-in.
    fn sign_out(&self);
}
