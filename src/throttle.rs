//! Leading-edge throttle for mutation bursts.
//! A page move fires dozens of mutation records in a few milliseconds; only
//! the first invocation in each window runs a detection pass. Callers keep a
//! pending flag for the rest and flush it on the next timer tick, so the pass
//! that does run always reads the DOM as it is at that moment.

use std::time::{Duration, Instant};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct Throttle {
    interval: Duration,
    last_run: Option<Instant>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True (and the window restarts) if at least `interval` has passed since the last admitted call.
    pub fn admit(&mut self, now: Instant) -> bool {
        let open = match self.last_run {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if open {
            self.last_run = Some(now);
        }
        open
    }

    /// Earliest instant the next call will be admitted.
    pub fn ready_at(&self) -> Option<Instant> {
        self.last_run.map(|last| last + self.interval)
    }

    pub fn reset(&mut self) {
        self.last_run = None;
    }
}
