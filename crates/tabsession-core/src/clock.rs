//! Injected time sources.
//!
//! Deadlines are tracked on a monotonic timeline so that wall-clock jumps
//! (NTP corrections, device sleep across an adjustment) never move a pending
//! timer. Wall-clock time is only read to turn a credential's absolute expiry
//! into a monotonic deadline, once, at scheduling time.

use std::ops::Add;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A point on a clock's monotonic timeline, measured from the clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Monotonic(Duration);

impl Monotonic {
    pub const ZERO: Monotonic = Monotonic(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_since(&self, earlier: Monotonic) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Time remaining until `self` as seen from `now`, zero once passed.
    pub fn saturating_until(&self, now: Monotonic) -> Duration {
        self.0.saturating_sub(now.0)
    }
}

/// Saturates instead of overflowing, so an absurdly long policy just means
/// "never".
impl Add<Duration> for Monotonic {
    type Output = Monotonic;

    fn add(self, rhs: Duration) -> Monotonic {
        Monotonic(self.0.saturating_add(rhs))
    }
}

/// Both readings of a clock taken together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Now {
    pub monotonic: Monotonic,
    pub wall: DateTime<Utc>,
}

pub trait Clock: Send + Sync {
    fn monotonic(&self) -> Monotonic;

    fn wall(&self) -> DateTime<Utc>;

    fn now(&self) -> Now {
        Now {
            monotonic: self.monotonic(),
            wall: self.wall(),
        }
    }
}

/// Production clock.
///
/// The monotonic reading comes from `tokio::time::Instant`, which follows the
/// runtime's paused clock in tests and the OS monotonic clock otherwise.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Monotonic {
        Monotonic(tokio::time::Instant::now().saturating_duration_since(self.origin))
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<Now>,
}

impl ManualClock {
    /// Start at monotonic zero with the given wall-clock reading.
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Now {
                monotonic: Monotonic::ZERO,
                wall,
            }),
        }
    }

    /// Move both readings forward together.
    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        now.monotonic = now.monotonic + by;
        if let Some(wall) = chrono::Duration::from_std(by)
            .ok()
            .and_then(|by| now.wall.checked_add_signed(by))
        {
            now.wall = wall;
        }
    }

    /// Step the wall clock alone, simulating an OS clock adjustment.
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        self.lock().wall = wall;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Now> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Monotonic {
        self.lock().monotonic
    }

    fn wall(&self) -> DateTime<Utc> {
        self.lock().wall
    }

    fn now(&self) -> Now {
        *self.lock()
    }
}

// ============================================================================
// Tests
// ============================================================================
