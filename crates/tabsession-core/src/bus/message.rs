use std::fmt;

use serde::{Deserialize, Serialize};

/// Intent carried between tabs. No session state ever crosses the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    Activity,
    Logout,
}

/// A message this tab originates.
///
/// Received messages are plain [`SessionMessage`]s and cannot be turned back
/// into an `Outbound`, so a tab has no way to re-publish what it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound(SessionMessage);

impl Outbound {
    pub(crate) fn activity() -> Self {
        Self(SessionMessage::Activity)
    }

    pub(crate) fn logout() -> Self {
        Self(SessionMessage::Logout)
    }

    pub fn message(&self) -> SessionMessage {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(u64);

impl TabId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// What actually travels on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: TabId,
    /// Per-publisher sequence number, starting at 1.
    pub seq: u64,
    pub message: SessionMessage,
}
