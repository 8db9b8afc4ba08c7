//! Client-side session lifecycle and cross-tab coordination.
//!
//! This crate keeps a session's access credential renewed before it expires,
//! signs the session out after sustained inactivity, and keeps every tab that
//! shares a [`SessionBus`] in agreement about both. It also carries the entity
//! invalidation registry that maps data mutations onto cache refreshes.
//!
//! Every component is sans-IO and reads time through an injected [`Clock`];
//! [`TabRuntime`] drives a [`SessionController`] on a tokio task.

pub mod auth;
pub mod bus;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod session;
pub mod timers;

pub use auth::{AccessToken, CredentialProvider, CredentialSnapshot, RenewError, SessionCredential};
pub use bus::{Envelope, SessionBus, SessionMessage, TabChannel, TabId};
pub use cache::{BatchState, CacheKey, CacheRefresher, InvalidationRegistry, InvalidationWorker};
pub use clock::{Clock, ManualClock, Monotonic, Now, SystemClock};
pub use config::{Config, SessionPolicy};
pub use error::{BusError, ConfigError, KeyError};
pub use session::{LogoutReason, SessionController, SessionEvent, SessionView, TabEvent, TabHandle, TabRuntime};
pub use timers::{ActivitySource, IdleEvent, IdleMonitor, IdlePolicy, IdleState, InputKind, RefreshDecision, RefreshScheduler, RefreshState};
