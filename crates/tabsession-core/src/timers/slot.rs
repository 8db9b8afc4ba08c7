use std::time::Duration;

use crate::clock::Monotonic;

/// A single pending deadline.
///
/// Arming always replaces the previous deadline, so a slot can never hold
/// more than one timer for its purpose. Firing is one-shot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerSlot {
    deadline: Option<Monotonic>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `at`, returning the deadline it replaced.
    pub fn arm(&mut self, at: Monotonic) -> Option<Monotonic> {
        self.deadline.replace(at)
    }

    /// Cancel the pending deadline. Returns whether one was armed.
    pub fn clear(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Monotonic> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn remaining(&self, now: Monotonic) -> Option<Duration> {
        self.deadline.map(|at| at.saturating_until(now))
    }

    /// Disarm and return `true` if the deadline has been reached.
    pub fn fire_if_due(&mut self, now: Monotonic) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_replaces_previous() {
        let mut slot = TimerSlot::new();
        assert_eq!(slot.arm(Monotonic::from_millis(100)), None);
        assert_eq!(slot.arm(Monotonic::from_millis(200)), Some(Monotonic::from_millis(100)));
        assert_eq!(slot.deadline(), Some(Monotonic::from_millis(200)));
    }

    #[test]
    fn test_fire_is_one_shot() {
        let mut slot = TimerSlot::new();
        slot.arm(Monotonic::from_millis(100));

        assert!(!slot.fire_if_due(Monotonic::from_millis(99)));
        assert!(slot.fire_if_due(Monotonic::from_millis(100)));
        assert!(!slot.fire_if_due(Monotonic::from_millis(500)));
        assert!(!slot.is_armed());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut slot = TimerSlot::new();
        assert!(!slot.clear());
        slot.arm(Monotonic::from_millis(5));
        assert!(slot.clear());
        assert!(!slot.clear());
        assert_eq!(slot, TimerSlot::new());
    }
}
