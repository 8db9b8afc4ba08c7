//! Cross-tab session broadcasting.
//!
//! A `SessionBus` stands for one origin: every tab opened on the same bus
//! receives what the others publish. Only two intents ever travel on it,
//! `Activity` and `Logout`.

pub mod channel;
pub mod message;

pub use channel::{SessionBus, TabChannel};
pub use message::{Envelope, Outbound, SessionMessage, TabId};
