//! Best-effort audit trail for privileged actions.

use crate::db::AuditLog;
use crate::identity::ProfileStore;

/// Record an audit entry without failing the calling request.
///
/// The action has already taken effect when this runs, so a store failure
/// is only logged.
pub async fn audit_log(
    store: &dyn ProfileStore,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    actor_id: Option<&str>,
    details: Option<serde_json::Value>,
) {
    let entry = AuditLog::new(action, resource_type, resource_id, actor_id, details);

    if let Err(e) = store.record_audit(&entry).await {
        tracing::warn!(
            action = action,
            resource_type = resource_type,
            resource_id = ?resource_id,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}
