//! Usage anomaly detection
//!
//! Two advisory signals computed from a key's usage window:
//!
//! - **high usage**: the trailing hour has reached a share of the hourly cap
//! - **suspicious timing**: inter-arrival times are bursty relative to the
//!   key's own typical spacing
//!
//! Neither signal blocks a request. Signals are reported to the audit sink,
//! with repeats for the same key suppressed during a cooldown.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::warn;

use super::usage_tracker::UsageTracker;
use crate::domain::{ApiKey, ApiKeyId, AuditEvent, AuditEventKind, AuditSink, DomainError};
use crate::infrastructure::observability::record_anomaly;

/// Anomaly detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
    /// Share of the hourly cap that triggers a high-usage signal
    #[serde(default = "default_high_usage_ratio")]
    pub high_usage_ratio: f64,
    /// Minimum number of requests before timing is analysed
    #[serde(default = "default_min_timing_samples")]
    pub min_timing_samples: usize,
    /// Number of most recent requests analysed
    #[serde(default = "default_max_timing_samples")]
    pub max_timing_samples: usize,
    /// Mean absolute deviation must exceed this multiple of the median interval
    #[serde(default = "default_burst_deviation_factor")]
    pub burst_deviation_factor: f64,
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
    /// Period of the background scan
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_high_usage_ratio() -> f64 {
    0.8
}

fn default_min_timing_samples() -> usize {
    10
}

fn default_max_timing_samples() -> usize {
    50
}

fn default_burst_deviation_factor() -> f64 {
    2.0
}

fn default_alert_cooldown_secs() -> u64 {
    300
}

fn default_scan_interval_secs() -> u64 {
    300
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            high_usage_ratio: default_high_usage_ratio(),
            min_timing_samples: default_min_timing_samples(),
            max_timing_samples: default_max_timing_samples(),
            burst_deviation_factor: default_burst_deviation_factor(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(self.high_usage_ratio > 0.0 && self.high_usage_ratio <= 1.0) {
            return Err(DomainError::configuration(
                "high_usage_ratio must be in (0, 1]",
            ));
        }
        if self.min_timing_samples < 3 || self.max_timing_samples < self.min_timing_samples {
            return Err(DomainError::configuration(
                "Timing sample bounds need 3 <= min_timing_samples <= max_timing_samples",
            ));
        }
        if self.burst_deviation_factor <= 0.0 {
            return Err(DomainError::configuration(
                "burst_deviation_factor must be positive",
            ));
        }
        if self.scan_interval_secs == 0 {
            return Err(DomainError::configuration(
                "Anomaly scan interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Kind of anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalySignal {
    HighUsage,
    SuspiciousActivity,
}

impl AnomalySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighUsage => "high_usage",
            Self::SuspiciousActivity => "suspicious_activity",
        }
    }

    fn audit_kind(&self) -> AuditEventKind {
        match self {
            Self::HighUsage => AuditEventKind::ApiKeyHighUsage,
            Self::SuspiciousActivity => AuditEventKind::ApiKeySuspiciousActivity,
        }
    }
}

/// Inter-arrival statistics in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingStats {
    pub samples: usize,
    pub mean_interval_ms: f64,
    pub median_interval_ms: f64,
    pub mean_deviation_ms: f64,
}

impl TimingStats {
    /// Compute statistics over ordered timestamps; `None` with fewer than two
    pub fn from_timestamps(timestamps: &[DateTime<Utc>]) -> Option<Self> {
        if timestamps.len() < 2 {
            return None;
        }

        let mut intervals: Vec<f64> = timestamps
            .windows(2)
            .map(|pair| interval_ms(pair[1] - pair[0]))
            .collect();

        let count = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / count;
        let mean_deviation = intervals.iter().map(|i| (i - mean).abs()).sum::<f64>() / count;

        intervals.sort_by(f64::total_cmp);
        let mid = intervals.len() / 2;
        let median = if intervals.len() % 2 == 0 {
            (intervals[mid - 1] + intervals[mid]) / 2.0
        } else {
            intervals[mid]
        };

        Some(Self {
            samples: timestamps.len(),
            mean_interval_ms: mean,
            median_interval_ms: median,
            mean_deviation_ms: mean_deviation,
        })
    }

    /// Bursty when the spread dwarfs the typical spacing
    pub fn is_bursty(&self, factor: f64) -> bool {
        self.mean_deviation_ms > factor * self.median_interval_ms
    }
}

fn interval_ms(delta: TimeDelta) -> f64 {
    delta
        .num_microseconds()
        .map_or(delta.num_milliseconds() as f64, |us| us as f64 / 1000.0)
}

/// Detects usage anomalies from the shared usage tracker
#[derive(Debug)]
pub struct AnomalyDetector {
    tracker: Arc<UsageTracker>,
    audit: Arc<dyn AuditSink>,
    config: AnomalyConfig,
    last_alerts: DashMap<(ApiKeyId, AnomalySignal), DateTime<Utc>>,
}

impl AnomalyDetector {
    pub fn new(tracker: Arc<UsageTracker>, audit: Arc<dyn AuditSink>, config: AnomalyConfig) -> Self {
        Self {
            tracker,
            audit,
            config,
            last_alerts: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Evaluate both signals after a successful request
    pub fn observe(&self, key: &ApiKey, now: DateTime<Utc>) -> Vec<AnomalySignal> {
        let mut emitted = Vec::new();

        if let Some(signal) = self.check_high_usage(key, now) {
            emitted.push(signal);
        }

        if let Some(signal) = self.check_timing(key, now) {
            emitted.push(signal);
        }

        emitted
    }

    /// Periodic re-evaluation of high usage for the given keys
    pub fn scan<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a ApiKey>,
        now: DateTime<Utc>,
    ) -> usize {
        keys.into_iter()
            .filter_map(|key| self.check_high_usage(key, now))
            .count()
    }

    /// Drop cooldown entries that have lapsed
    pub fn prune_alerts(&self, now: DateTime<Utc>) {
        let cooldown = self.cooldown();
        self.last_alerts.retain(|_, at| now - *at < cooldown);
    }

    fn check_high_usage(&self, key: &ApiKey, now: DateTime<Utc>) -> Option<AnomalySignal> {
        let hourly_cap = key.rate_limits().per_hour;
        let threshold = (f64::from(hourly_cap) * self.config.high_usage_ratio).ceil() as u32;
        let hour_count = self.tracker.count_within(key.id(), now, TimeDelta::hours(1));

        if hour_count < threshold.max(1) {
            return None;
        }

        self.emit(key, AnomalySignal::HighUsage, now, |event| {
            event
                .with_detail("hour_count", hour_count)
                .with_detail("hourly_limit", hourly_cap)
        })
    }

    fn check_timing(&self, key: &ApiKey, now: DateTime<Utc>) -> Option<AnomalySignal> {
        let timestamps = self
            .tracker
            .latest(key.id(), now, self.config.max_timing_samples);

        if timestamps.len() < self.config.min_timing_samples {
            return None;
        }

        let stats = TimingStats::from_timestamps(&timestamps)?;
        if !stats.is_bursty(self.config.burst_deviation_factor) {
            return None;
        }

        self.emit(key, AnomalySignal::SuspiciousActivity, now, |event| {
            event
                .with_detail("samples", stats.samples)
                .with_detail("mean_interval_ms", stats.mean_interval_ms)
                .with_detail("median_interval_ms", stats.median_interval_ms)
                .with_detail("mean_deviation_ms", stats.mean_deviation_ms)
        })
    }

    fn emit(
        &self,
        key: &ApiKey,
        signal: AnomalySignal,
        now: DateTime<Utc>,
        details: impl FnOnce(AuditEvent) -> AuditEvent,
    ) -> Option<AnomalySignal> {
        let cooldown = self.cooldown();

        {
            let mut last = self
                .last_alerts
                .entry((key.id().clone(), signal))
                .or_insert(DateTime::<Utc>::MIN_UTC);

            if *last != DateTime::<Utc>::MIN_UTC && now - *last < cooldown {
                return None;
            }
            *last = now;
        }

        warn!(
            key_id = %key.id(),
            owner_id = %key.owner_id(),
            signal = signal.as_str(),
            "API key anomaly detected"
        );
        record_anomaly(signal.as_str());

        let event = AuditEvent::new(signal.audit_kind(), now)
            .with_key(key.id())
            .with_user(key.owner_id());
        self.audit.record(details(event));

        Some(signal)
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.config.alert_cooldown_secs).unwrap_or(i64::MAX))
    }
}
