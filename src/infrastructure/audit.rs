//! Audit sink implementations

use crate::domain::{AuditEvent, AuditSink};

/// Writes audit events to the `audit` tracing target as structured JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = serde_json::Value::Object(event.details.clone()).to_string();

        tracing::info!(
            target: "audit",
            kind = %event.kind,
            key_id = event.key_id.as_ref().map(|id| id.as_str()),
            user_id = event.user_id.as_ref().map(|id| id.as_str()),
            timestamp = %event.timestamp,
            details = %details,
            "audit event"
        );
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use memory::InMemoryAuditSink;

#[cfg(any(test, feature = "test-helpers"))]
mod memory {
    use std::sync::{Arc, Mutex};

    use crate::domain::{AuditEvent, AuditEventKind, AuditSink};

    /// Collects audit events for assertions
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryAuditSink {
        events: Arc<Mutex<Vec<AuditEvent>>>,
    }

    impl InMemoryAuditSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<AuditEvent> {
            self.events
                .lock()
                .expect("audit sink mutex poisoned")
                .clone()
        }

        pub fn of_kind(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
            self.events()
                .into_iter()
                .filter(|event| event.kind == kind)
                .collect()
        }

        pub fn count(&self, kind: AuditEventKind) -> usize {
            self.of_kind(kind).len()
        }
    }

    impl AuditSink for InMemoryAuditSink {
        fn record(&self, event: AuditEvent) {
            self.events
                .lock()
                .expect("audit sink mutex poisoned")
                .push(event);
        }
    }
}
