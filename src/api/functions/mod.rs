//! Privileged account-management functions.
//!
//! Every call re-authorizes the caller from scratch: bearer token, account
//! lookup, then a `super_admin` role check. Nothing is cached between
//! calls. The request body is parsed only after the caller is authorized.
//!
//! No action is transactional across its two writes (for example status
//! then role on approve). A failure between them leaves the first write in
//! place and is reported to the caller; re-querying shows the state.

pub mod admins;
pub mod customers;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::db::Role;
use crate::AppState;

/// The authorized super admin making a call
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub email: Option<String>,
}

/// Flat request body shared by both function endpoints
#[derive(Debug, Default, Deserialize)]
pub struct FunctionRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl FunctionRequest {
    pub fn parse(body: &Bytes) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ApiError::bad_request("Request body is required"));
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
    }

    fn action(&self) -> Result<&str, ApiError> {
        match self.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => Ok(action),
            _ => Err(ApiError::validation_field("action", "action is required")),
        }
    }

    /// The target account id, required by every per-account action
    fn target(&self) -> Result<String, ApiError> {
        let user_id = self.user_id.as_deref().unwrap_or_default();
        super::validation::validate_user_id(user_id)
            .map_err(|e| ApiError::validation_field("user_id", e))?;
        Ok(user_id.trim().to_string())
    }
}

fn unknown_action(action: &str) -> ApiError {
    ApiError::validation_field("action", format!("Invalid action: {}", action))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Run the authorization preamble shared by every action
pub async fn authorize_super_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Caller, ApiError> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let account = match state.identity.get_user(token).await {
        Ok(account) => account,
        Err(e) if e.is_auth_failure() => {
            tracing::debug!(error = %e, "Rejected function call with invalid token");
            return Err(ApiError::unauthorized("Unauthorized"));
        }
        Err(e) => return Err(e.into()),
    };

    if account.is_banned_at(chrono::Utc::now()) {
        tracing::warn!(user_id = %account.id, "Function call from a banned account");
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    if !state.store.has_role(&account.id, Role::SuperAdmin).await? {
        tracing::warn!(user_id = %account.id, "Function call without super_admin role");
        return Err(ApiError::forbidden("Forbidden: super_admin role required"));
    }

    Ok(Caller {
        id: account.id,
        email: account.email,
    })
}

/// Answer a bare pre-flight request; CORS headers come from the layer
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}
