//! Session lifecycle wiring.
//!
//! This module provides:
//! - `SessionController`: one tab's timers, idle state and bus channel
//! - `TabRuntime`: the tokio event loop driving a controller

pub mod controller;
pub mod runtime;

pub use controller::{LogoutReason, SessionController, SessionEvent, SessionView};
pub use runtime::{TabEvent, TabHandle, TabRuntime};
