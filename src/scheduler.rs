//! # Scheduler
//!
//! Millisecond deadlines for the two periodic controllers.
//!
//! There is no task switching: each controller runs to completion inside
//! [`crate::kernel::Governor::poll`]. A [`PeriodicTask`] only remembers
//! when its controller is next due. Time is a free-running `u32`
//! millisecond counter that wraps after ~49.7 days; deadlines are compared
//! with wrapping arithmetic, so delays must stay below `i32::MAX` ms.

/// Longest delay [`PeriodicTask::schedule`] accepts.
pub const MAX_DELAY_MS: u32 = i32::MAX as u32;

/// `true` once `now` has reached `due`, across counter wrap.
#[inline]
pub fn reached(now: u32, due: u32) -> bool {
    now.wrapping_sub(due) as i32 >= 0
}

/// A single pending deadline, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodicTask {
    due: Option<u32>,
}

impl PeriodicTask {
    pub const fn new() -> Self {
        Self { due: None }
    }

    /// Run `delay_ms` after `now`, replacing any pending deadline.
    pub fn schedule(&mut self, now: u32, delay_ms: u32) {
        self.due = Some(now.wrapping_add(delay_ms.min(MAX_DELAY_MS)));
    }

    /// Drop the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.due.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    pub fn is_due(&self, now: u32) -> bool {
        self.due.is_some_and(|due| reached(now, due))
    }

    /// Consume the deadline if it has been reached. The caller reschedules.
    pub fn take_due(&mut self, now: u32) -> bool {
        if self.is_due(now) {
            self.due = None;
            true
        } else {
            false
        }
    }

    /// Milliseconds until due (0 if overdue), or `None` if idle.
    pub fn due_in(&self, now: u32) -> Option<u32> {
        self.due
            .map(|due| if reached(now, due) { 0 } else { due.wrapping_sub(now) })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
