//! Client for a hosted backend-as-a-service.
//!
//! Accounts and sessions live behind a GoTrue-style auth API (`/auth/v1`),
//! profiles, roles and the audit log behind a PostgREST-style table API
//! (`/rest/v1`). Admin calls authenticate with the service-role key.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use super::{BackendError, IdentityProvider, ProfileStore};
use crate::config::BackendConfig;
use crate::db::{
    Account, AccountUpdate, AuditLog, Ban, NewAccount, NewProfile, Profile, ProfileRow,
    ProfileStatus, Role, RoleAssignment, RoleAssignmentRow, SessionGrant,
};

/// Page size used when walking the admin user listing
const USERS_PER_PAGE: usize = 1000;

pub struct HostedBackend {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Account,
}

/// Sign-up answers with a bare user, or with a user plus session when
/// confirmation is disabled
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignupResponse {
    WithSession { user: Account },
    Bare(Account),
}

#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<Account>,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct SignupBody<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct AdminCreateBody<'a> {
    email: &'a str,
    password: &'a str,
    email_confirm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    user_metadata: serde_json::Value,
}

#[derive(Debug, Default, Serialize)]
struct AdminUpdateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    email_confirm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ban_duration: Option<String>,
}

impl From<AccountUpdate> for AdminUpdateBody {
    fn from(update: AccountUpdate) -> Self {
        Self {
            email: update.email,
            password: update.password,
            email_confirm: update.email_confirm,
            ban_duration: update.ban.map(ban_duration),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusPatch<'a> {
    status: ProfileStatus,
    updated_at: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailPatch<'a> {
    email: &'a str,
    updated_at: &'a str,
}

#[derive(Debug, Serialize)]
struct RoleInsert<'a> {
    user_id: &'a str,
    role: Role,
}

#[derive(Debug, Serialize)]
struct AuditInsert<'a> {
    id: &'a str,
    action: &'a str,
    resource_type: &'a str,
    resource_id: Option<&'a str>,
    actor_id: Option<&'a str>,
    details: Option<serde_json::Value>,
    created_at: &'a str,
}

/// Render a ban the way the auth admin API expects it
fn ban_duration(ban: Ban) -> String {
    match ban {
        Ban::For(duration) => format!("{}h", duration.num_hours()),
        Ban::Lift => "none".to_string(),
    }
}

/// Pull a human-readable message out of an error body.
///
/// The auth API uses `msg`, `error_description` or `error`; the table API
/// uses `message`. Falls back to the raw body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                if !msg.is_empty() {
                    return msg.to_string();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Upstream request failed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Map an upstream failure onto the shared error taxonomy
fn classify(status: StatusCode, message: String) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("banned") {
        return BackendError::Banned;
    }
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::CONFLICT => BackendError::Conflict(message),
        StatusCode::UNPROCESSABLE_ENTITY if lower.contains("already") => {
            BackendError::Conflict(message)
        }
        _ => BackendError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

fn epoch_to_rfc3339(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}

impl HostedBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = match config.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => bail!("backend.url is required for the hosted backend"),
        };
        let service_key = match config.service_role_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => bail!("backend.service_role_key is required for the hosted backend"),
        };
        let anon_key = config
            .anon_key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| service_key.clone());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("ivalora/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            service_key,
            anon_key,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    /// Admin URL for a single user; ids must be UUIDs
    fn admin_user_url(&self, id: &str) -> Result<String, BackendError> {
        let id = uuid::Uuid::parse_str(id)
            .map_err(|_| BackendError::NotFound("User not found".to_string()))?;
        Ok(self.auth_url(&format!("/admin/users/{}", id.hyphenated())))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Request authenticated with the service-role key
    fn admin(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Request made on behalf of the holder of a user session token
    fn as_user(&self, method: Method, url: String, token: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    /// Send a request, returning the response only on success
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        tracing::debug!(status = %status, message = %message, "Hosted backend call failed");
        Err(classify(status, message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    async fn select_profiles(&self, filter: &[(&str, String)]) -> Result<Vec<Profile>, BackendError> {
        let rows: Vec<ProfileRow> = self
            .send_json(
                self.admin(Method::GET, self.rest_url("user_profiles"))
                    .query(&[("select", "*")])
                    .query(filter),
            )
            .await?;

        rows.into_iter()
            .map(Profile::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::Internal)
    }

    async fn select_roles(
        &self,
        filter: &[(&str, String)],
    ) -> Result<Vec<RoleAssignment>, BackendError> {
        let rows: Vec<RoleAssignmentRow> = self
            .send_json(
                self.admin(Method::GET, self.rest_url("user_roles"))
                    .query(&[("select", "user_id,role")])
                    .query(filter),
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(RoleAssignmentRow::into_assignment)
            .collect())
    }
}

#[async_trait]
impl IdentityProvider for HostedBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionGrant, BackendError> {
        let request = self
            .client
            .post(self.auth_url("/token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&Credentials { email, password });

        let grant: TokenResponse = match self.send_json(request).await {
            Ok(grant) => grant,
            Err(BackendError::Upstream { status: 400, message })
                if message.to_lowercase().contains("invalid login credentials") =>
            {
                return Err(BackendError::InvalidCredentials)
            }
            Err(e) => return Err(e),
        };

        let expires_at = grant
            .expires_at
            .or_else(|| {
                grant
                    .expires_in
                    .map(|secs| chrono::Utc::now().timestamp() + secs)
            })
            .and_then(epoch_to_rfc3339)
            .unwrap_or_default();

        Ok(SessionGrant {
            access_token: grant.access_token,
            expires_at,
            user: grant.user,
        })
    }

    async fn sign_up(&self, account: NewAccount) -> Result<Account, BackendError> {
        let body = SignupBody {
            email: &account.email,
            password: &account.password,
            phone: account.phone.as_deref(),
            data: serde_json::json!({ "full_name": account.full_name }),
        };
        let response: SignupResponse = self
            .send_json(
                self.client
                    .post(self.auth_url("/signup"))
                    .header("apikey", &self.anon_key)
                    .json(&body),
            )
            .await?;

        Ok(match response {
            SignupResponse::WithSession { user } => user,
            SignupResponse::Bare(user) => user,
        })
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        self.send(self.as_user(Method::POST, self.auth_url("/logout"), token))
            .await?;
        Ok(())
    }

    async fn get_user(&self, token: &str) -> Result<Account, BackendError> {
        match self
            .send_json(self.as_user(Method::GET, self.auth_url("/user"), token))
            .await
        {
            Err(BackendError::Upstream { status, .. }) if status == 401 || status == 403 => {
                Err(BackendError::InvalidToken)
            }
            other => other,
        }
    }

    async fn create_user(&self, account: NewAccount) -> Result<Account, BackendError> {
        let body = AdminCreateBody {
            email: &account.email,
            password: &account.password,
            email_confirm: account.email_confirmed,
            phone: account.phone.as_deref(),
            user_metadata: serde_json::json!({ "full_name": account.full_name }),
        };
        self.send_json(
            self.admin(Method::POST, self.auth_url("/admin/users"))
                .json(&body),
        )
        .await
    }

    async fn update_user(
        &self,
        id: &str,
        update: AccountUpdate,
    ) -> Result<Account, BackendError> {
        let url = self.admin_user_url(id)?;
        let body = AdminUpdateBody::from(update);
        self.send_json(self.admin(Method::PUT, url).json(&body))
            .await
    }

    async fn list_users(&self) -> Result<Vec<Account>, BackendError> {
        let mut users = Vec::new();
        let mut page = 1;

        loop {
            let batch: UserList = self
                .send_json(
                    self.admin(Method::GET, self.auth_url("/admin/users"))
                        .query(&[("page", page), ("per_page", USERS_PER_PAGE)]),
                )
                .await?;

            let count = batch.users.len();
            users.extend(batch.users);
            if count < USERS_PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(users)
    }

    async fn delete_user(&self, id: &str) -> Result<(), BackendError> {
        let url = self.admin_user_url(id)?;
        self.send(self.admin(Method::DELETE, url)).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for HostedBackend {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let mut profiles = self
            .select_profiles(&[("id", format!("eq.{}", user_id))])
            .await?;
        Ok(if profiles.is_empty() {
            None
        } else {
            Some(profiles.swap_remove(0))
        })
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError> {
        self.select_profiles(&[]).await
    }

    async fn upsert_profile(&self, profile: &NewProfile) -> Result<(), BackendError> {
        self.send(
            self.admin(Method::POST, self.rest_url("user_profiles"))
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(profile),
        )
        .await?;
        Ok(())
    }

    async fn set_status(&self, user_id: &str, status: ProfileStatus) -> Result<(), BackendError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.send(
            self.admin(Method::PATCH, self.rest_url("user_profiles"))
                .query(&[("id", format!("eq.{}", user_id))])
                .header("Prefer", "return=minimal")
                .json(&StatusPatch {
                    status,
                    updated_at: &now,
                }),
        )
        .await?;
        Ok(())
    }

    async fn set_email(&self, user_id: &str, email: &str) -> Result<(), BackendError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.send(
            self.admin(Method::PATCH, self.rest_url("user_profiles"))
                .query(&[("id", format!("eq.{}", user_id))])
                .header("Prefer", "return=minimal")
                .json(&EmailPatch {
                    email,
                    updated_at: &now,
                }),
        )
        .await?;
        Ok(())
    }

    async fn roles_for(&self, user_id: &str) -> Result<Vec<Role>, BackendError> {
        let assignments = self
            .select_roles(&[("user_id", format!("eq.{}", user_id))])
            .await?;
        Ok(assignments.into_iter().map(|a| a.role).collect())
    }

    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool, BackendError> {
        let assignments = self
            .select_roles(&[
                ("user_id", format!("eq.{}", user_id)),
                ("role", format!("eq.{}", role)),
            ])
            .await?;
        Ok(!assignments.is_empty())
    }

    async fn assign_role(&self, user_id: &str, role: Role) -> Result<(), BackendError> {
        self.send(
            self.admin(Method::POST, self.rest_url("user_roles"))
                .query(&[("on_conflict", "user_id,role")])
                .header("Prefer", "resolution=ignore-duplicates,return=minimal")
                .json(&RoleInsert { user_id, role }),
        )
        .await?;
        Ok(())
    }

    async fn list_role_assignments(
        &self,
        roles: &[Role],
    ) -> Result<Vec<RoleAssignment>, BackendError> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        self.select_roles(&[("role", role_filter(roles))]).await
    }

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), BackendError> {
        let details = entry
            .details
            .as_deref()
            .and_then(|d| serde_json::from_str(d).ok());
        self.send(
            self.admin(Method::POST, self.rest_url("audit_logs"))
                .header("Prefer", "return=minimal")
                .json(&AuditInsert {
                    id: &entry.id,
                    action: &entry.action,
                    resource_type: &entry.resource_type,
                    resource_id: entry.resource_id.as_deref(),
                    actor_id: entry.actor_id.as_deref(),
                    details,
                    created_at: &entry.created_at,
                }),
        )
        .await?;
        Ok(())
    }
}

/// PostgREST `in.(...)` filter over role names
fn role_filter(roles: &[Role]) -> String {
    let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
    format!("in.({})", names.join(","))
}
