use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::{RateDecision, WindowQuota};

/// Decide a rate-limit check from the current window contents.
///
/// `count_in_window` is the number of recorded events newer than
/// `now - quota.window`; `oldest_in_window` is the earliest of them. Shared by
/// the in-memory log and storage-backed limiters so every backend answers
/// identically.
pub fn decide(
    count_in_window: u32,
    oldest_in_window: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    quota: WindowQuota,
) -> RateDecision {
    if count_in_window < quota.limit {
        return RateDecision::Allowed {
            remaining: quota.limit - count_in_window - 1,
        };
    }

    let retry_after = match oldest_in_window {
        Some(oldest) => (oldest + quota.window - now).max(Duration::zero()),
        None => quota.window,
    };
    RateDecision::Limited { retry_after }
}

/// Timestamps of past events for one key, oldest first.
#[derive(Clone, Debug, Default)]
pub struct SlidingWindowLog {
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindowLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events strictly newer than `now - window`.
    pub fn count_within(&self, now: DateTime<Utc>, window: Duration) -> u32 {
        let cutoff = now - window;
        self.events.iter().filter(|t| **t > cutoff).count() as u32
    }

    /// Check the quota and record `now` only when allowed.
    pub fn check_and_record(&mut self, now: DateTime<Utc>, quota: WindowQuota) -> RateDecision {
        self.prune(now, quota.window);
        let oldest = self.events.front().copied();
        let decision = decide(self.events.len() as u32, oldest, now, quota);
        if decision.is_allowed() {
            self.events.push_back(now);
        }
        decision
    }

    /// Drop events at or older than `now - window`. Returns how many were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        let before = self.events.len();
        while matches!(self.events.front(), Some(t) if *t <= cutoff) {
            self.events.pop_front();
        }
        before - self.events.len()
    }
}
