//! Audit events emitted by the key lifecycle engine

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::api_key::ApiKeyId;
use super::identity::UserId;

/// Kind of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ApiKeyCreated,
    ApiKeyRevoked,
    ApiKeyRotated,
    ApiKeyUsed,
    ApiKeyValidationFailed,
    ApiKeyHighUsage,
    ApiKeySuspiciousActivity,
    ApiKeyRotationWarning,
    ApiKeyRotationScheduled,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKeyCreated => "api_key_created",
            Self::ApiKeyRevoked => "api_key_revoked",
            Self::ApiKeyRotated => "api_key_rotated",
            Self::ApiKeyUsed => "api_key_used",
            Self::ApiKeyValidationFailed => "api_key_validation_failed",
            Self::ApiKeyHighUsage => "api_key_high_usage",
            Self::ApiKeySuspiciousActivity => "api_key_suspicious_activity",
            Self::ApiKeyRotationWarning => "api_key_rotation_warning",
            Self::ApiKeyRotationScheduled => "api_key_rotation_scheduled",
        }
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured audit event
///
/// `key_id` is absent only for validation failures where no record matched.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<ApiKeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            key_id: None,
            user_id: None,
            timestamp,
            details: Map::new(),
        }
    }

    pub fn with_key(mut self, key_id: &ApiKeyId) -> Self {
        self.key_id = Some(key_id.clone());
        self
    }

    pub fn with_user(mut self, user_id: &UserId) -> Self {
        self.user_id = Some(user_id.clone());
        self
    }

    pub fn with_detail(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.details.insert(name.to_string(), value.into());
        self
    }

    pub fn detail(&self, name: &str) -> Option<&Value> {
        self.details.get(name)
    }
}

/// Destination for audit events
///
/// Recording must not block; sinks that talk to slow backends buffer internally.
pub trait AuditSink: Send + Sync + Debug {
    fn record(&self, event: AuditEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let key_id = ApiKeyId::new("key-1").unwrap();
        let event = AuditEvent::new(AuditEventKind::ApiKeyRevoked, Utc::now())
            .with_key(&key_id)
            .with_user(&UserId::new("user-1"))
            .with_detail("reason", "leaked");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "api_key_revoked");
        assert_eq!(json["key_id"], "key-1");
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["details"]["reason"], "leaked");
    }

    #[test]
    fn test_event_without_key_omits_field() {
        let event = AuditEvent::new(AuditEventKind::ApiKeyValidationFailed, Utc::now());
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("key_id").is_none());
        assert!(json.get("details").is_none());
        assert_eq!(event.kind.to_string(), "api_key_validation_failed");
    }
}
