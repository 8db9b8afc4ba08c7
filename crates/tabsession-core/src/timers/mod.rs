//! Timer-owning components.
//!
//! - `TimerSlot`: a single replaceable deadline
//! - `RefreshScheduler`: proactive credential renewal, paused while hidden
//! - `IdleMonitor`: inactivity countdown and warning window
//!
//! None of these read the clock themselves; callers pass the current time in.

pub mod idle;
pub mod refresh;
pub mod slot;

pub use idle::{ActivitySource, IdleEvent, IdleMonitor, IdlePolicy, IdleState, InputKind};
pub use refresh::{RefreshDecision, RefreshScheduler, RefreshState};
pub use slot::TimerSlot;
