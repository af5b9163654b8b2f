//! `manage-customers`: listing and administering customer accounts.
//!
//! A customer is any account holding none of the admin-tier roles.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{authorize_super_admin, unknown_action, Caller, FunctionRequest, Success};
use crate::api::audit::audit_log;
use crate::api::error::ApiError;
use crate::api::validation::{validate_email, validate_password};
use crate::db::{actions, resource_types, AccountUpdate, Ban, ProfileStatus, Role};
use crate::AppState;

/// Status reported for a customer without a profile row
const UNKNOWN_STATUS: &str = "unknown";

#[derive(Debug)]
pub enum CustomerAction {
    List,
    VerifyEmail { user_id: String },
    UpdateEmail { user_id: String, email: String },
    UpdatePassword { user_id: String, password: String },
    Suspend { user_id: String },
    Activate { user_id: String },
    Delete { user_id: String },
}

impl TryFrom<FunctionRequest> for CustomerAction {
    type Error = ApiError;

    fn try_from(request: FunctionRequest) -> Result<Self, Self::Error> {
        let action = request.action()?.to_string();
        match action.as_str() {
            "list" => Ok(CustomerAction::List),
            "verify_email" => Ok(CustomerAction::VerifyEmail {
                user_id: request.target()?,
            }),
            "update_email" => {
                let user_id = request.target()?;
                let email = request.email.unwrap_or_default();
                validate_email(&email).map_err(|e| ApiError::validation_field("email", e))?;
                Ok(CustomerAction::UpdateEmail {
                    user_id,
                    email: email.trim().to_string(),
                })
            }
            "update_password" => {
                let user_id = request.target()?;
                let password = request.password.unwrap_or_default();
                validate_password(&password)
                    .map_err(|e| ApiError::validation_field("password", e))?;
                Ok(CustomerAction::UpdatePassword { user_id, password })
            }
            "suspend" => Ok(CustomerAction::Suspend {
                user_id: request.target()?,
            }),
            "activate" => Ok(CustomerAction::Activate {
                user_id: request.target()?,
            }),
            "delete" => Ok(CustomerAction::Delete {
                user_id: request.target()?,
            }),
            other => Err(unknown_action(other)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CustomerSummary {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email_confirmed: bool,
    pub created_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub banned_until: Option<String>,
    /// Profile status, or `unknown` when the account has no profile
    pub profile_status: String,
}

#[derive(Debug, Serialize)]
pub struct CustomerList {
    pub customers: Vec<CustomerSummary>,
}

/// `POST /functions/v1/manage-customers`
pub async fn manage_customers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let caller = authorize_super_admin(&state, &headers).await?;
    let action = CustomerAction::try_from(FunctionRequest::parse(&body)?)?;

    match action {
        CustomerAction::List => list_customers(&state).await,
        CustomerAction::VerifyEmail { user_id } => {
            state
                .identity
                .update_user(
                    &user_id,
                    AccountUpdate {
                        email_confirm: true,
                        ..Default::default()
                    },
                )
                .await?;
            state.store.set_status(&user_id, ProfileStatus::Active).await?;
            finish(&state, &caller, actions::CUSTOMER_VERIFY_EMAIL, &user_id, None).await
        }
        CustomerAction::UpdateEmail { user_id, email } => {
            let account = state
                .identity
                .update_user(
                    &user_id,
                    AccountUpdate {
                        email: Some(email.clone()),
                        email_confirm: true,
                        ..Default::default()
                    },
                )
                .await?;
            let stored = account.email.unwrap_or(email);
            state.store.set_email(&user_id, &stored).await?;
            finish(
                &state,
                &caller,
                actions::CUSTOMER_UPDATE_EMAIL,
                &user_id,
                Some(serde_json::json!({ "email": stored })),
            )
            .await
        }
        CustomerAction::UpdatePassword { user_id, password } => {
            state
                .identity
                .update_user(
                    &user_id,
                    AccountUpdate {
                        password: Some(password),
                        ..Default::default()
                    },
                )
                .await?;
            finish(&state, &caller, actions::CUSTOMER_UPDATE_PASSWORD, &user_id, None).await
        }
        CustomerAction::Suspend { user_id } => {
            state
                .store
                .set_status(&user_id, ProfileStatus::Suspended)
                .await?;
            state
                .identity
                .update_user(
                    &user_id,
                    AccountUpdate {
                        ban: Some(Ban::long()),
                        ..Default::default()
                    },
                )
                .await?;
            finish(&state, &caller, actions::CUSTOMER_SUSPEND, &user_id, None).await
        }
        CustomerAction::Activate { user_id } => {
            state.store.set_status(&user_id, ProfileStatus::Active).await?;
            state
                .identity
                .update_user(
                    &user_id,
                    AccountUpdate {
                        ban: Some(Ban::Lift),
                        ..Default::default()
                    },
                )
                .await?;
            finish(&state, &caller, actions::CUSTOMER_ACTIVATE, &user_id, None).await
        }
        CustomerAction::Delete { user_id } => {
            state.identity.delete_user(&user_id).await?;
            finish(&state, &caller, actions::CUSTOMER_DELETE, &user_id, None).await
        }
    }
}

/// Log and audit a completed action, then answer `{success: true}`
async fn finish(
    state: &AppState,
    caller: &Caller,
    action: &str,
    user_id: &str,
    details: Option<serde_json::Value>,
) -> Result<Response, ApiError> {
    tracing::info!(actor = %caller.id, target = %user_id, action = action, "Customer action applied");
    audit_log(
        state.store.as_ref(),
        action,
        resource_types::CUSTOMER,
        Some(user_id),
        Some(&caller.id),
        details,
    )
    .await;
    Ok(Json(Success::ok()).into_response())
}

async fn list_customers(state: &AppState) -> Result<Response, ApiError> {
    let (staff, accounts, profiles) = tokio::try_join!(
        state.store.list_role_assignments(&Role::ADMIN_TIER),
        state.identity.list_users(),
        state.store.list_profiles(),
    )?;

    let staff: HashSet<String> = staff.into_iter().map(|a| a.user_id).collect();
    let profiles: HashMap<String, _> = profiles.into_iter().map(|p| (p.id.clone(), p)).collect();

    let customers = accounts
        .into_iter()
        .filter(|account| !staff.contains(&account.id))
        .map(|account| {
            let profile = profiles.get(&account.id);
            let full_name = account
                .full_name()
                .map(str::to_string)
                .or_else(|| profile.and_then(|p| p.full_name.clone()));
            CustomerSummary {
                full_name,
                phone: account.phone().map(str::to_string),
                email_confirmed: account.email_confirmed(),
                profile_status: profile
                    .map(|p| p.status.to_string())
                    .unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
                email: account.email,
                created_at: account.created_at,
                last_sign_in_at: account.last_sign_in_at,
                banned_until: account.banned_until,
                id: account.id,
            }
        })
        .collect();

    Ok(Json(CustomerList { customers }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{call_function, seed_user, test_state, SeededUser};
    use axum::http::StatusCode;

    async fn root(state: &Arc<AppState>) -> SeededUser {
        seed_user(state, "root@example.com", ProfileStatus::Active, Some(Role::SuperAdmin)).await
    }

    #[tokio::test]
    async fn test_requires_authorization() {
        let state = test_state().await;
        let customer = seed_user(&state, "c@example.com", ProfileStatus::Active, None).await;

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            None,
            serde_json::json!({"action": "delete", "user_id": customer.id}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(state.identity.list_users().await.unwrap().len(), 1);

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            Some(&customer.token),
            serde_json::json!({"action": "list"}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_list_excludes_staff_and_labels_unknown() {
        let state = test_state().await;
        let root = root(&state).await;
        seed_user(&state, "branch@example.com", ProfileStatus::Active, Some(Role::AdminBranch)).await;
        seed_user(&state, "staff@example.com", ProfileStatus::Active, Some(Role::Employee)).await;
        let legacy = seed_user(&state, "legacy@example.com", ProfileStatus::Active, Some(Role::Admin)).await;
        let customer = seed_user(&state, "c@example.com", ProfileStatus::Suspended, None).await;

        // An account with no profile row at all
        let bare = state
            .identity
            .sign_up(crate::db::NewAccount {
                email: "bare@example.com".to_string(),
                password: "password123".to_string(),
                phone: Some("+233200000000".to_string()),
                full_name: None,
                email_confirmed: false,
            })
            .await
            .unwrap();

        let (status, body) = call_function(
            state,
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "list"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let customers = body["customers"].as_array().unwrap();
        let by_id: HashMap<&str, &serde_json::Value> = customers
            .iter()
            .map(|c| (c["id"].as_str().unwrap(), c))
            .collect();

        assert_eq!(customers.len(), 3);
        assert!(!by_id.contains_key(root.id.as_str()));
        assert_eq!(by_id[customer.id.as_str()]["profile_status"], "suspended");
        assert_eq!(by_id[legacy.id.as_str()]["profile_status"], "active");
        assert_eq!(by_id[bare.id.as_str()]["profile_status"], "unknown");
        assert_eq!(by_id[bare.id.as_str()]["phone"], "+233200000000");
        assert_eq!(by_id[bare.id.as_str()]["email_confirmed"], false);
    }

    #[tokio::test]
    async fn test_update_password_enforces_length() {
        let state = test_state().await;
        let root = root(&state).await;
        let customer = seed_user(&state, "c@example.com", ProfileStatus::Active, None).await;

        let (status, body) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "update_password", "user_id": customer.id, "password": "1234567"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Password must be at least 8 characters");
        assert!(state
            .identity
            .sign_in("c@example.com", crate::test_support::SEED_PASSWORD)
            .await
            .is_ok());

        let (status, body) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "update_password", "user_id": customer.id, "password": "12345678"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"success": true}));
        assert!(state.identity.sign_in("c@example.com", "12345678").await.is_ok());
    }

    #[tokio::test]
    async fn test_suspend_blocks_login_and_activate_restores() {
        let state = test_state().await;
        let root = root(&state).await;
        let customer = seed_user(&state, "c@example.com", ProfileStatus::Active, None).await;

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "suspend", "user_id": customer.id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let profile = state.store.get_profile(&customer.id).await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Suspended);

        let login = serde_json::json!({"email": "c@example.com", "password": crate::test_support::SEED_PASSWORD});
        let (status, _) = crate::test_support::call_json(state.clone(), "/api/auth/login", None, login.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "activate", "user_id": customer.id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let profile = state.store.get_profile(&customer.id).await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Active);

        let (status, _) = crate::test_support::call_json(state, "/api/auth/login", None, login).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_verify_and_update_email() {
        let state = test_state().await;
        let root = root(&state).await;
        let customer = seed_user(&state, "c@example.com", ProfileStatus::Pending, None).await;

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "verify_email", "user_id": customer.id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let profile = state.store.get_profile(&customer.id).await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Active);

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "update_email", "user_id": customer.id, "email": "not-an-email"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "update_email", "user_id": customer.id, "email": "moved@example.com"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let profile = state.store.get_profile(&customer.id).await.unwrap().unwrap();
        assert_eq!(profile.email.as_deref(), Some("moved@example.com"));
        let grant = state
            .identity
            .sign_in("moved@example.com", crate::test_support::SEED_PASSWORD)
            .await
            .unwrap();
        assert!(grant.user.email_confirmed());
    }

    #[tokio::test]
    async fn test_delete_customer_and_missing_target() {
        let state = test_state().await;
        let root = root(&state).await;
        let customer = seed_user(&state, "c@example.com", ProfileStatus::Active, None).await;

        let (status, body) = call_function(
            state.clone(),
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "delete", "user_id": customer.id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(state.store.get_profile(&customer.id).await.unwrap().is_none());

        let (status, body) = call_function(
            state,
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "delete", "user_id": "00000000-0000-0000-0000-000000000000"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn test_missing_user_id() {
        let state = test_state().await;
        let root = root(&state).await;

        let (status, body) = call_function(
            state,
            "manage-customers",
            Some(&root.token),
            serde_json::json!({"action": "suspend"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "user_id is required");
    }
}
