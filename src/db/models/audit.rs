//! Audit log models for tracking privileged actions.

use serde::{Deserialize, Serialize};

/// Audit log entry for a privileged account-management action
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub actor_id: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

impl AuditLog {
    pub fn new(
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        actor_id: Option<&str>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            actor_id: actor_id.map(str::to_string),
            details: details.map(|d| d.to_string()),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Audit action names
pub mod actions {
    // Admin approval actions
    pub const ADMIN_APPROVE: &str = "admin.approve";
    pub const ADMIN_REJECT: &str = "admin.reject";
    pub const ADMIN_SUSPEND: &str = "admin.suspend";
    pub const ADMIN_CREATE: &str = "admin.create";

    // Customer actions
    pub const CUSTOMER_VERIFY_EMAIL: &str = "customer.verify_email";
    pub const CUSTOMER_UPDATE_EMAIL: &str = "customer.update_email";
    pub const CUSTOMER_UPDATE_PASSWORD: &str = "customer.update_password";
    pub const CUSTOMER_SUSPEND: &str = "customer.suspend";
    pub const CUSTOMER_ACTIVATE: &str = "customer.activate";
    pub const CUSTOMER_DELETE: &str = "customer.delete";

    // Auth actions
    pub const AUTH_SIGNUP: &str = "auth.signup";
    pub const AUTH_BOOTSTRAP: &str = "auth.bootstrap";
}

/// Resource types
pub mod resource_types {
    pub const ADMIN: &str = "admin";
    pub const CUSTOMER: &str = "customer";
    pub const ACCOUNT: &str = "account";
}
