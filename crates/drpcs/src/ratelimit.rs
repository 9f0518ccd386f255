use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window rate limiter over inbound messages.
///
/// Tracks individual event timestamps and only counts events within the
/// sliding window, so a burst straddling a fixed-window boundary is still
/// limited. A denied event is not recorded.
#[derive(Debug)]
pub struct RateLimiter {
    /// Timestamps of allowed events, oldest first
    window: VecDeque<Instant>,
    max_occurrences: u32,
    period: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_occurrences` events per `period`.
    #[must_use]
    pub fn new(max_occurrences: u32, period: Duration) -> Self {
        Self {
            window: VecDeque::with_capacity(64),
            max_occurrences,
            period,
        }
    }

    /// Remove entries older than the window duration.
    fn expire_old_entries(&mut self, now: Instant) {
        while let Some(&timestamp) = self.window.front() {
            if now.saturating_duration_since(timestamp) > self.period {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the number of events in the current window.
    fn count(&self) -> u32 {
        self.window.len().try_into().unwrap_or(u32::MAX)
    }

    /// Records an event now. Returns `true` if the limit is exceeded.
    pub fn trigger(&mut self) -> bool {
        self.trigger_at(Instant::now())
    }

    /// Records an event at `now`. Returns `true` if the limit is exceeded.
    pub fn trigger_at(&mut self, now: Instant) -> bool {
        self.expire_old_entries(now);

        if self.count() >= self.max_occurrences {
            return true;
        }

        self.window.push_back(now);
        false
    }
}
