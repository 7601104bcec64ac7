use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Fixed-interval tick source for periodic refreshes, driven from the
/// frame loop. At most one schedule is active: `start` while running
/// replaces the existing schedule instead of stacking another one, and
/// `stop` is idempotent.
#[derive(Debug, Clone)]
pub struct PollingLoop {
    interval: Duration,
    next_due: Option<Instant>,
}

impl PollingLoop {
    pub fn new(interval: Duration) -> Self {
        PollingLoop {
            interval,
            next_due: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    /// True once per elapsed interval; rearms itself when it fires.
    /// Rearms from the deadline, not from `now`, so late frames do not
    /// stretch the cadence; after a stall longer than one interval the
    /// missed ticks are skipped rather than fired in a burst.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let next = due + self.interval;
                self.next_due = Some(if next > now { next } else { now + self.interval });
                true
            }
            _ => false,
        }
    }
}

impl Default for PollingLoop {
    fn default() -> Self {
        PollingLoop::new(DEFAULT_POLL_INTERVAL)
    }
}
