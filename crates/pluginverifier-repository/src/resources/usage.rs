use std::cmp::Ordering;
use std::time::Instant;

/// How often and how recently a repository entry was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStatistic {
    /// The number of successful lookups served by the entry.
    pub times_accessed: u64,
    /// When the entry was last handed out (or inserted).
    pub last_access_time: Instant,
    /// Repository-wide access counter, orders accesses that share an `Instant`.
    tick: u64,
}

impl UsageStatistic {
    pub(crate) fn new(last_access_time: Instant, tick: u64) -> Self {
        Self {
            times_accessed: 0,
            last_access_time,
            tick,
        }
    }

    pub(crate) fn record_access(&mut self, now: Instant, tick: u64) {
        self.record_accesses(1, now, tick);
    }

    /// Records `count` lookups that were served at the same time.
    pub(crate) fn record_accesses(&mut self, count: u64, now: Instant, tick: u64) {
        self.times_accessed += count;
        self.last_access_time = now;
        self.tick = tick;
    }

    /// Orders two statistics from least to most recently used.
    pub fn recency(&self, other: &Self) -> Ordering {
        self.last_access_time
            .cmp(&other.last_access_time)
            .then(self.tick.cmp(&other.tick))
    }
}

/// A read-only snapshot of one repository entry.
///
/// Handed to [`SweepPolicy`](super::SweepPolicy) implementations and diagnostics. Holding one
/// does not keep the entry alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableResource<K, W> {
    pub key: K,
    pub weight: W,
    pub usage: UsageStatistic,
    pub is_locked: bool,
}
