//! `manage-admins`: approval workflow and admin provisioning.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{authorize_super_admin, unknown_action, Caller, FunctionRequest};
use crate::api::audit::audit_log;
use crate::api::error::{ApiError, ValidationErrorBuilder};
use crate::api::validation::{
    validate_admin_role, validate_email, validate_full_name, validate_password,
};
use crate::db::{
    actions, effective_role, resource_types, NewAccount, NewProfile, ProfileStatus, Role,
};
use crate::AppState;

/// Approval decision on an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Reject,
    Suspend,
}

impl Approval {
    /// Profile status each decision leads to
    pub fn status(&self) -> ProfileStatus {
        match self {
            Approval::Approve => ProfileStatus::Active,
            Approval::Reject => ProfileStatus::Rejected,
            Approval::Suspend => ProfileStatus::Suspended,
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            Approval::Approve => actions::ADMIN_APPROVE,
            Approval::Reject => actions::ADMIN_REJECT,
            Approval::Suspend => actions::ADMIN_SUSPEND,
        }
    }
}

#[derive(Debug)]
pub enum AdminAction {
    Decide {
        user_id: String,
        approval: Approval,
    },
    CreateAdmin {
        full_name: String,
        email: String,
        password: String,
        role: Role,
    },
    ListAdmins,
}

impl TryFrom<FunctionRequest> for AdminAction {
    type Error = ApiError;

    fn try_from(request: FunctionRequest) -> Result<Self, Self::Error> {
        let action = request.action()?.to_string();
        match action.as_str() {
            "approve" => Ok(AdminAction::Decide {
                user_id: request.target()?,
                approval: Approval::Approve,
            }),
            "reject" => Ok(AdminAction::Decide {
                user_id: request.target()?,
                approval: Approval::Reject,
            }),
            "suspend" => Ok(AdminAction::Decide {
                user_id: request.target()?,
                approval: Approval::Suspend,
            }),
            "create_admin" => {
                let full_name = request.full_name.unwrap_or_default();
                let email = request.email.unwrap_or_default();
                let password = request.password.unwrap_or_default();
                let role = request.role.unwrap_or_default();

                let mut errors = ValidationErrorBuilder::new();
                errors
                    .check("full_name", validate_full_name(&full_name))
                    .check("email", validate_email(&email))
                    .check("password", validate_password(&password));
                let role = match validate_admin_role(&role) {
                    Ok(role) => Some(role),
                    Err(e) => {
                        errors.add("role", e);
                        None
                    }
                };
                errors.finish()?;
                let role = role.ok_or_else(|| ApiError::validation_field("role", "role is required"))?;

                Ok(AdminAction::CreateAdmin {
                    full_name: full_name.trim().to_string(),
                    email: email.trim().to_string(),
                    password,
                    role,
                })
            }
            "list_admins" => Ok(AdminAction::ListAdmins),
            other => Err(unknown_action(other)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusChanged {
    pub success: bool,
    pub status: ProfileStatus,
}

#[derive(Debug, Serialize)]
pub struct AdminCreated {
    pub success: bool,
    pub user_id: String,
}

/// An account on the approval page: staff, or anyone awaiting approval
#[derive(Debug, Serialize)]
pub struct AdminSummary {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub roles: Vec<Role>,
    pub status: Option<ProfileStatus>,
    pub created_at: Option<String>,
    pub last_sign_in_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminList {
    pub admins: Vec<AdminSummary>,
}

/// `POST /functions/v1/manage-admins`
pub async fn manage_admins(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let caller = authorize_super_admin(&state, &headers).await?;
    let action = AdminAction::try_from(FunctionRequest::parse(&body)?)?;

    match action {
        AdminAction::Decide { user_id, approval } => {
            decide(&state, &caller, &user_id, approval).await
        }
        AdminAction::CreateAdmin {
            full_name,
            email,
            password,
            role,
        } => create_admin(&state, &caller, full_name, email, password, role).await,
        AdminAction::ListAdmins => list_admins(&state).await,
    }
}

async fn decide(
    state: &AppState,
    caller: &Caller,
    user_id: &str,
    approval: Approval,
) -> Result<Response, ApiError> {
    let status = approval.status();
    state.store.set_status(user_id, status).await?;

    if approval == Approval::Approve {
        state.store.assign_role(user_id, Role::Admin).await?;
    }

    tracing::info!(
        actor = %caller.id,
        target = %user_id,
        status = %status,
        "Admin approval decision applied"
    );
    audit_log(
        state.store.as_ref(),
        approval.audit_action(),
        resource_types::ADMIN,
        Some(user_id),
        Some(&caller.id),
        Some(serde_json::json!({ "status": status })),
    )
    .await;

    Ok(Json(StatusChanged {
        success: true,
        status,
    })
    .into_response())
}

async fn create_admin(
    state: &AppState,
    caller: &Caller,
    full_name: String,
    email: String,
    password: String,
    role: Role,
) -> Result<Response, ApiError> {
    let account = state
        .identity
        .create_user(NewAccount {
            email,
            password,
            phone: None,
            full_name: Some(full_name.clone()),
            email_confirmed: true,
        })
        .await?;

    state
        .store
        .upsert_profile(&NewProfile {
            id: account.id.clone(),
            status: ProfileStatus::Active,
            full_name: Some(full_name),
            email: account.email.clone(),
        })
        .await?;
    state.store.assign_role(&account.id, role).await?;

    tracing::info!(actor = %caller.id, user_id = %account.id, role = %role, "Admin account created");
    audit_log(
        state.store.as_ref(),
        actions::ADMIN_CREATE,
        resource_types::ADMIN,
        Some(&account.id),
        Some(&caller.id),
        Some(serde_json::json!({ "role": role, "email": account.email })),
    )
    .await;

    Ok(Json(AdminCreated {
        success: true,
        user_id: account.id,
    })
    .into_response())
}

async fn list_admins(state: &AppState) -> Result<Response, ApiError> {
    let (accounts, assignments, profiles) = tokio::try_join!(
        state.identity.list_users(),
        state.store.list_role_assignments(&Role::ALL),
        state.store.list_profiles(),
    )?;

    let mut roles: HashMap<String, Vec<Role>> = HashMap::new();
    for assignment in assignments {
        roles.entry(assignment.user_id).or_default().push(assignment.role);
    }
    let profiles: HashMap<String, _> = profiles.into_iter().map(|p| (p.id.clone(), p)).collect();

    let admins = accounts
        .into_iter()
        .filter_map(|account| {
            let held = roles.remove(&account.id).unwrap_or_default();
            let profile = profiles.get(&account.id);
            let status = profile.map(|p| p.status);
            if held.is_empty() && status != Some(ProfileStatus::Pending) {
                return None;
            }

            let full_name = account
                .full_name()
                .map(str::to_string)
                .or_else(|| profile.and_then(|p| p.full_name.clone()));
            Some(AdminSummary {
                role: effective_role(&held),
                roles: held,
                status,
                full_name,
                email: account.email,
                created_at: account.created_at,
                last_sign_in_at: account.last_sign_in_at,
                id: account.id,
            })
        })
        .collect();

    Ok(Json(AdminList { admins }).into_response())
}
