use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use super::{Envelope, Outbound, TabId};
use crate::error::BusError;

/// Origin-scoped publish/subscribe bus shared by every tab.
#[derive(Debug, Clone)]
pub struct SessionBus {
    sender: broadcast::Sender<Envelope>,
    closed: Arc<AtomicBool>,
}

impl SessionBus {
    /// `capacity` bounds how many messages a slow tab may fall behind before
    /// it starts skipping.
    pub fn new(capacity: usize) -> Result<Self, BusError> {
        if capacity == 0 {
            return Err(BusError::ZeroCapacity);
        }
        let (sender, _) = broadcast::channel(capacity);
        Ok(Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open this tab's end of the bus. Messages published before this call
    /// are not seen.
    pub fn open(&self, tab: TabId) -> Result<TabChannel, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        debug!(tab = %tab, "Session channel opened");
        Ok(TabChannel {
            tab,
            sender: Some(self.sender.clone()),
            receiver: Some(self.sender.subscribe()),
            seq: 0,
        })
    }

    /// Refuse new tabs. Channels already open stay attached until they close.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Session bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of currently open tab channels.
    pub fn open_channels(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One tab's subscription to the bus.
#[derive(Debug)]
pub struct TabChannel {
    tab: TabId,
    sender: Option<broadcast::Sender<Envelope>>,
    receiver: Option<broadcast::Receiver<Envelope>>,
    seq: u64,
}

impl TabChannel {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Fire-and-forget send to every other tab. Returns whether the message
    /// left this tab.
    pub fn publish(&mut self, outbound: Outbound) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        self.seq += 1;
        let envelope = Envelope {
            origin: self.tab,
            seq: self.seq,
            message: outbound.message(),
        };
        match sender.send(envelope) {
            Ok(_) => {
                debug!(tab = %self.tab, seq = self.seq, message = ?envelope.message, "Published");
                true
            }
            Err(_) => {
                debug!(tab = %self.tab, "No listeners on session bus");
                false
            }
        }
    }

    /// Next message from another tab, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        let tab = self.tab;
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(envelope) if envelope.origin == tab => continue,
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(tab = %tab, skipped, "Session channel lagged, messages dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next message from another tab. Pends forever once the
    /// channel is closed, so it can sit in a `select!` unconditionally.
    pub async fn recv(&mut self) -> Envelope {
        let tab = self.tab;
        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.recv().await {
                    Ok(envelope) if envelope.origin == tab => continue,
                    Ok(envelope) => return envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(tab = %tab, skipped, "Session channel lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        std::future::pending().await
    }

    /// Detach from the bus. Safe to call more than once.
    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            debug!(tab = %self.tab, "Session channel closed");
        }
        self.sender = None;
    }
}

impl Drop for TabChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
