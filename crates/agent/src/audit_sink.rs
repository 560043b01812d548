use tracing::info;

use bazaar_core::audit::{AuditEvent, AuditSink};

/// Writes audit events to the `audit` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            target: "audit",
            event_name = %event.event_type,
            event_id = %event.event_id,
            correlation_id = %event.correlation_id,
            session_id = event.session_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            category = ?event.category,
            outcome = ?event.outcome,
            actor = %event.actor,
            metadata = %metadata,
            "audit event"
        );
    }
}
