use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{SessionController, SessionEvent, SessionView};
use crate::timers::InputKind;

/// Buffer size for the per-tab event channel.
/// Input bursts (pointer moves) are coalesced by the idle monitor, so a
/// modest buffer is enough.
const EVENT_BUFFER_SIZE: usize = 64;

/// Inputs from the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    Input(InputKind),
    Visibility(bool),
    /// The credential owner established a session.
    Authenticated,
    /// The session ended outside this core.
    SignedOut,
    Shutdown,
}

/// Handle held by the rendering layer.
pub struct TabHandle {
    events: mpsc::Sender<TabEvent>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl TabHandle {
    /// Deliver an event, logging if the tab has already shut down.
    pub async fn send(&self, event: TabEvent) {
        if let Err(e) = self.events.send(event).await {
            debug!(error = %e, "Tab runtime is gone");
        }
    }

    pub fn view(&self) -> SessionView {
        *self.view.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Stop the tab and wait for its teardown.
    pub async fn shutdown(self) {
        self.send(TabEvent::Shutdown).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Tab runtime task failed");
        }
    }
}

/// Cooperative event loop for one tab.
///
/// Each wakeup (user input, bus message, or timer deadline) is handled to
/// completion before the next; renewal is the only step that awaits.
pub struct TabRuntime {
    controller: SessionController,
    events: mpsc::Receiver<TabEvent>,
    view: watch::Sender<SessionView>,
}

impl TabRuntime {
    pub fn spawn(controller: SessionController) -> TabHandle {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (view_tx, view_rx) = watch::channel(controller.view());
        let runtime = TabRuntime {
            controller,
            events: event_rx,
            view: view_tx,
        };
        let task = tokio::spawn(runtime.run());
        TabHandle {
            events: event_tx,
            view: view_rx,
            task,
        }
    }

    async fn run(mut self) {
        let tab = self.controller.tab();
        info!(tab = %tab, "Tab runtime started");
        self.controller.activate();

        loop {
            self.settle().await;

            let sleep_for = self.controller.time_until_next_deadline();
            let controller = &mut self.controller;
            let events = &mut self.events;

            tokio::select! {
                event = events.recv() => match event {
                    None | Some(TabEvent::Shutdown) => break,
                    Some(event) => Self::apply(controller, event),
                },
                message = controller.recv_remote() => controller.handle_remote(message),
                _ = Self::sleep(sleep_for) => {}
            }
        }

        self.controller.close();
        self.publish_view();
        info!(tab = %tab, "Tab runtime stopped");
    }

    fn apply(controller: &mut SessionController, event: TabEvent) {
        match event {
            TabEvent::Input(kind) => controller.record_input(kind),
            TabEvent::Visibility(visible) => controller.set_visible(visible),
            TabEvent::Authenticated => controller.activate(),
            TabEvent::SignedOut => controller.deactivate(),
            TabEvent::Shutdown => {}
        }
    }

    /// Fire due timers, perform any pending renewal, and publish the view.
    async fn settle(&mut self) {
        loop {
            let mut events = self.controller.poll();
            if let Some(event) = self.controller.check_expiration() {
                events.push(event);
            }
            for event in &events {
                debug!(tab = %self.controller.tab(), ?event, "Session event");
            }
            if !self.controller.renewal_pending() {
                break;
            }
            if let Some(SessionEvent::LoggedOut { .. }) = self.controller.renew().await {
                break;
            }
        }
        self.publish_view();
    }

    fn publish_view(&self) {
        let view = self.controller.view();
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    async fn sleep(duration: Option<Duration>) {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
