//! Age-based rotation scheduling
//!
//! The scheduler warns about old keys and marks very old ones with a
//! `rotation_due_at` deadline. It never rotates a key itself; the owner does
//! that, which also clears the deadline.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::store::KeyStore;
use super::worker::{Sweep, SweepSummary};
use crate::domain::{
    ApiKey, ApiKeyId, ApiKeyPatch, ApiKeyStatus, AuditEvent, AuditEventKind, AuditSink,
    DomainError, KeyUsability,
};

/// Rotation sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RotationConfig {
    /// Key age after which a warning is emitted on every sweep
    #[serde(default = "default_warning_after_days")]
    pub warning_after_days: u32,
    /// Key age after which a rotation is scheduled
    #[serde(default = "default_auto_rotate_after_days")]
    pub auto_rotate_after_days: u32,
    /// Time between scheduling and the rotation deadline
    #[serde(default = "default_notice_days")]
    pub notice_days: u32,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_warning_after_days() -> u32 {
    90
}

fn default_auto_rotate_after_days() -> u32 {
    365
}

fn default_notice_days() -> u32 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    86_400
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            warning_after_days: default_warning_after_days(),
            auto_rotate_after_days: default_auto_rotate_after_days(),
            notice_days: default_notice_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RotationConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.auto_rotate_after_days < self.warning_after_days {
            return Err(DomainError::configuration(
                "auto_rotate_after_days must not be shorter than warning_after_days",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(DomainError::configuration(
                "Rotation sweep interval must be greater than 0",
            ));
        }
        Ok(())
    }

    fn warning_after(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.warning_after_days))
    }

    fn auto_rotate_after(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.auto_rotate_after_days))
    }

    fn notice(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.notice_days))
    }
}

/// Counts from one rotation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub scanned: usize,
    /// Keys found past their expiry or grace period and marked `Expired`
    pub expired: usize,
    pub warned: usize,
    pub scheduled: usize,
    pub failed: usize,
}

enum Action {
    None,
    Warn,
    Schedule,
}

/// Periodic rotation sweep over live keys
#[derive(Debug)]
pub struct RotationScheduler {
    store: Arc<KeyStore>,
    audit: Arc<dyn AuditSink>,
    config: RotationConfig,
}

impl RotationScheduler {
    pub fn new(
        store: Arc<KeyStore>,
        audit: Arc<dyn AuditSink>,
        config: RotationConfig,
    ) -> Result<Self, DomainError> {
        config.validate()?;

        Ok(Self {
            store,
            audit,
            config,
        })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Run one pass over a snapshot of the live keys
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> RotationReport {
        let snapshot = self.store.live_keys();
        let mut report = RotationReport {
            scanned: snapshot.len(),
            ..Default::default()
        };

        let mut usable = Vec::with_capacity(snapshot.len());
        for key in snapshot {
            if key.usability_at(now) != KeyUsability::Expired {
                usable.push(key);
                continue;
            }
            match self.store.expire_if_lapsed(key.id(), now).await {
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(key_id = %key.id(), error = %e, "Failed to expire lapsed key");
                    report.failed += 1;
                }
            }
        }

        // Keys whose lineage is still inside a grace period
        let mut lineage: HashSet<ApiKeyId> = usable
            .iter()
            .filter(|key| key.status() == ApiKeyStatus::Deprecated)
            .flat_map(|key| key.replaced_by().cloned().into_iter().chain([key.id().clone()]))
            .collect();

        for key in &usable {
            if key.status() != ApiKeyStatus::Active || lineage.contains(key.id()) {
                continue;
            }

            match self.action_for(key, now) {
                Action::None => {}
                Action::Warn => {
                    self.warn_rotation(key, now);
                    report.warned += 1;
                }
                Action::Schedule => match self.schedule(key.id(), now).await {
                    Ok(true) => {
                        lineage.insert(key.id().clone());
                        report.scheduled += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(key_id = %key.id(), error = %e, "Failed to schedule key rotation");
                        report.failed += 1;
                    }
                },
            }
        }

        if report.expired > 0 || report.warned > 0 || report.scheduled > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                warned = report.warned,
                scheduled = report.scheduled,
                failed = report.failed,
                "Rotation sweep completed"
            );
        }

        report
    }

    fn action_for(&self, key: &ApiKey, now: DateTime<Utc>) -> Action {
        let age = now - key.created_at();

        if age > self.config.auto_rotate_after() && key.rotation_due_at().is_none() {
            Action::Schedule
        } else if age > self.config.warning_after() {
            Action::Warn
        } else {
            Action::None
        }
    }

    fn warn_rotation(&self, key: &ApiKey, now: DateTime<Utc>) {
        let age_days = (now - key.created_at()).num_days();

        self.audit.record(
            AuditEvent::new(AuditEventKind::ApiKeyRotationWarning, now)
                .with_key(key.id())
                .with_user(key.owner_id())
                .with_detail("age_days", age_days)
                .with_detail(
                    "rotation_due_at",
                    key.rotation_due_at().map(|due| due.to_rfc3339()),
                ),
        );
    }

    /// Record a rotation deadline; `Ok(false)` when the key changed underneath
    async fn schedule(&self, id: &ApiKeyId, now: DateTime<Utc>) -> Result<bool, DomainError> {
        let _guard = self.store.lock_key(id).await;

        let Some(current) = self.store.get(id) else {
            return Ok(false);
        };
        if current.status() != ApiKeyStatus::Active || current.rotation_due_at().is_some() {
            return Ok(false);
        }

        let due_at = now + self.config.notice();
        let updated = self
            .store
            .apply(id, &ApiKeyPatch::schedule_rotation(due_at, now))
            .await?;

        info!(key_id = %id, due_at = %due_at, "API key rotation scheduled");
        self.audit.record(
            AuditEvent::new(AuditEventKind::ApiKeyRotationScheduled, now)
                .with_key(id)
                .with_user(updated.owner_id())
                .with_detail("due_at", due_at.to_rfc3339()),
        );

        Ok(true)
    }
}

#[async_trait]
impl Sweep for RotationScheduler {
    fn name(&self) -> &'static str {
        "rotation"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<SweepSummary, DomainError> {
        let report = self.sweep_at(now).await;

        Ok(SweepSummary {
            affected: report.expired + report.warned + report.scheduled,
            failed: report.failed,
        })
    }
}
