//! Rate limiter implementation
//!
//! Sliding window rate limiting over the minute, hour and day windows of a
//! key's usage log. The check and the consume happen under the key's window
//! lock, so concurrent callers can never overshoot a limit.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::usage_tracker::{UsageTracker, UsageWindow};
use crate::domain::{ApiKeyId, RateLimits};

/// Rate limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePeriod {
    Minute,
    Hour,
    Day,
}

impl RatePeriod {
    /// Check order
    pub const ALL: [RatePeriod; 3] = [Self::Minute, Self::Hour, Self::Day];

    pub fn seconds(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    pub fn limit(&self, limits: &RateLimits) -> u32 {
        match self {
            Self::Minute => limits.per_minute,
            Self::Hour => limits.per_hour,
            Self::Day => limits.per_day,
        }
    }

    /// Start of the next aligned window boundary after `now`
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let seconds = self.seconds();
        let boundary = (now.timestamp().div_euclid(seconds) + 1) * seconds;

        DateTime::from_timestamp(boundary, 0).unwrap_or(now + self.duration())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl std::fmt::Display for RatePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remaining capacity per window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    pub remaining: Remaining,
    /// When the violated window rolls over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
    /// Which limit was hit (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<RatePeriod>,
}

/// Rate limiter for API keys
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tracker: Arc<UsageTracker>,
}

impl RateLimiter {
    pub fn new(tracker: Arc<UsageTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Check every window and, if all have room, consume one request
    pub fn check_and_consume(
        &self,
        key_id: &ApiKeyId,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        self.tracker
            .with_window(key_id, now, |window| decide(window, limits, now))
    }

    /// Reset rate limits for a key
    pub fn reset(&self, key_id: &ApiKeyId) {
        self.tracker.reset(key_id);
    }
}

fn decide(window: &mut UsageWindow, limits: &RateLimits, now: DateTime<Utc>) -> RateLimitDecision {
    let counts = RatePeriod::ALL.map(|period| (period, window.count_within(now, period.duration())));

    let remaining_after = |consumed: u32| {
        let left = |period: RatePeriod| {
            let count = counts
                .iter()
                .find(|(p, _)| *p == period)
                .map_or(0, |(_, count)| *count);
            period.limit(limits).saturating_sub(count + consumed)
        };

        Remaining {
            minute: left(RatePeriod::Minute),
            hour: left(RatePeriod::Hour),
            day: left(RatePeriod::Day),
        }
    };

    if let Some((period, _)) = counts
        .iter()
        .find(|(period, count)| *count >= period.limit(limits))
    {
        return RateLimitDecision {
            allowed: false,
            remaining: remaining_after(0),
            reset_time: Some(period.next_boundary(now)),
            period: Some(*period),
        };
    }

    window.push(now);

    RateLimitDecision {
        allowed: true,
        remaining: remaining_after(1),
        reset_time: None,
        period: None,
    }
}
