//! Leading-and-trailing notification throttle.
//!
//! The first change after a quiet period is delivered immediately. Changes
//! that arrive inside the interval are coalesced into one trailing delivery
//! at the end of the interval, which carries whatever the state is by then.
//! The last change of a burst is therefore never lost.
//!
//! An interval of zero disables throttling entirely.

use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// What the caller should do with a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    /// Deliver now.
    Now,
    /// Schedule one delivery at this instant, then call
    /// [`Throttle::fire_trailing`].
    At(Instant),
    /// A trailing delivery is already scheduled and will cover this change.
    Coalesced,
}

/// Per-target throttle state. Not thread-safe on its own; callers keep it
/// behind the lock that guards the state being observed.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
    trailing: bool,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            trailing: false,
        }
    }

    /// Record a change at `now`.
    pub fn hit(&mut self, now: Instant) -> Fire {
        if self.trailing {
            return Fire::Coalesced;
        }
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => {
                self.trailing = true;
                Fire::At(last + self.interval)
            }
            _ => {
                self.last = Some(now);
                Fire::Now
            }
        }
    }

    /// Record that the scheduled trailing delivery went out at `now`.
    pub fn fire_trailing(&mut self, now: Instant) {
        self.trailing = false;
        self.last = Some(now);
    }

    pub fn is_scheduled(&self) -> bool {
        self.trailing
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
