//! Session credential model and the credential-owner interface.
//!
//! This module provides:
//! - `SessionCredential`: the in-memory access token and its expiry
//! - `CredentialProvider`: the collaborator that owns, renews and discards it
//! - `RenewError`: classification of failed renewals
//!
//! Access tokens are never persisted; a reload always needs a fresh login or
//! renewal round trip.

pub mod credential;
pub mod error;

pub use credential::{AccessToken, CredentialProvider, CredentialSnapshot, SessionCredential};
pub use error::RenewError;
