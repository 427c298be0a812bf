//! Per-key rolling request log
//!
//! Each key owns an ordered window of request timestamps covering the
//! trailing 24 hours. Stale entries are evicted lazily whenever the window is
//! touched, and in bulk by [`UsageTracker::prune`].

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

use crate::domain::ApiKeyId;

/// Retention of a usage window
pub const WINDOW_RETENTION: TimeDelta = TimeDelta::hours(24);

/// Ordered request timestamps for one key
#[derive(Debug, Clone, Default)]
pub struct UsageWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl UsageWindow {
    /// Drop everything older than the retention period
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - WINDOW_RETENTION;

        while self.timestamps.front().is_some_and(|ts| *ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Number of requests strictly inside the trailing `period`
    pub fn count_within(&self, now: DateTime<Utc>, period: TimeDelta) -> u32 {
        let cutoff = now - period;
        let count = self
            .timestamps
            .iter()
            .rev()
            .take_while(|ts| **ts > cutoff)
            .count();

        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Append a request, keeping the window ordered
    pub fn push(&mut self, at: DateTime<Utc>) {
        let position = self
            .timestamps
            .iter()
            .rposition(|ts| *ts <= at)
            .map_or(0, |idx| idx + 1);

        self.timestamps.insert(position, at);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The most recent `limit` timestamps, oldest first
    pub fn latest(&self, limit: usize) -> Vec<DateTime<Utc>> {
        let skip = self.timestamps.len().saturating_sub(limit);
        self.timestamps.iter().skip(skip).copied().collect()
    }
}

/// Concurrent map of usage windows keyed by key id
#[derive(Debug, Default)]
pub struct UsageTracker {
    windows: DashMap<ApiKeyId, UsageWindow>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to a key's window
    ///
    /// The window is evicted first. Concurrent callers for the same key are
    /// serialized; callers for other keys are not blocked.
    pub fn with_window<R>(
        &self,
        key_id: &ApiKeyId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UsageWindow) -> R,
    ) -> R {
        let mut window = self.windows.entry(key_id.clone()).or_default();
        window.evict(now);
        f(&mut window)
    }

    /// Record one request
    pub fn record(&self, key_id: &ApiKeyId, at: DateTime<Utc>) {
        self.with_window(key_id, at, |window| window.push(at));
    }

    /// Requests inside the trailing `period`
    pub fn count_within(&self, key_id: &ApiKeyId, now: DateTime<Utc>, period: TimeDelta) -> u32 {
        match self.windows.get_mut(key_id) {
            Some(mut window) => {
                window.evict(now);
                window.count_within(now, period)
            }
            None => 0,
        }
    }

    /// The most recent `limit` timestamps for a key, oldest first
    pub fn latest(&self, key_id: &ApiKeyId, now: DateTime<Utc>, limit: usize) -> Vec<DateTime<Utc>> {
        match self.windows.get_mut(key_id) {
            Some(mut window) => {
                window.evict(now);
                window.latest(limit)
            }
            None => Vec::new(),
        }
    }

    /// Forget a key's history
    pub fn reset(&self, key_id: &ApiKeyId) {
        self.windows.remove(key_id);
    }

    /// Evict stale entries everywhere and drop empty windows
    ///
    /// Returns the number of windows dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();

        self.windows.retain(|_, window| {
            window.evict(now);
            !window.is_empty()
        });

        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
