//! Sign-in, sign-up and session endpoints.

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::audit::audit_log;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_full_name, validate_password};
use crate::access::{decide, resolve_snapshot, AccessDecision, AuthSnapshot};
use crate::db::{
    actions, resource_types, LoginRequest, LoginResponse, NewAccount, NewProfile, ProfileStatus,
    Role, SignupRequest, UserResponse,
};
use crate::identity::{IdentityProvider, ProfileStore};
use crate::AppState;

/// Session token from `Authorization: Bearer`, falling back to the cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((state.config.auth.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(state.config.auth.secure_cookies)
        .same_site(SameSite::Lax)
        .build()
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    if request.email.trim().is_empty() {
        errors.add("email", "Email is required");
    }
    if request.password.is_empty() {
        errors.add("password", "Password is required");
    }
    errors.finish()?;

    let grant = state
        .identity
        .sign_in(request.email.trim(), &request.password)
        .await
        .map_err(|e| {
            tracing::info!(email = %request.email.trim(), error = %e, "Sign-in rejected");
            ApiError::from(e)
        })?;

    tracing::info!(user_id = %grant.user.id, "User signed in");

    let jar = jar.add(session_cookie(&state, grant.access_token.clone()));
    Ok((
        jar,
        Json(LoginResponse {
            token: grant.access_token,
            expires_at: grant.expires_at,
            user: UserResponse::from(grant.user),
        }),
    ))
}

/// Create a customer account awaiting approval
pub async fn signup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(&request.email))
        .check("password", validate_password(&request.password))
        .check("full_name", validate_full_name(&request.full_name));
    errors.finish()?;

    let full_name = request.full_name.trim().to_string();
    let account = state
        .identity
        .sign_up(NewAccount {
            email: request.email.trim().to_string(),
            password: request.password,
            phone: request.phone.filter(|p| !p.trim().is_empty()),
            full_name: Some(full_name.clone()),
            email_confirmed: false,
        })
        .await?;

    state
        .store
        .upsert_profile(&NewProfile {
            id: account.id.clone(),
            status: ProfileStatus::Pending,
            full_name: Some(full_name),
            email: account.email.clone(),
        })
        .await?;

    audit_log(
        state.store.as_ref(),
        actions::AUTH_SIGNUP,
        resource_types::ACCOUNT,
        Some(&account.id),
        Some(&account.id),
        None,
    )
    .await;

    tracing::info!(user_id = %account.id, "Account signed up, awaiting approval");
    Ok((StatusCode::CREATED, Json(UserResponse::from(account))))
}

/// Revoke the session and clear the cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(token) = extract_token(&headers, &state.config.auth.cookie_name) {
        match state.identity.sign_out(&token).await {
            Ok(()) => {}
            Err(e) if e.is_auth_failure() => {}
            Err(e) => tracing::warn!(error = %e, "Failed to revoke session"),
        }
    }

    let jar = jar.remove(Cookie::build((state.config.auth.cookie_name.clone(), "")).path("/"));
    (StatusCode::NO_CONTENT, jar)
}

/// The caller's auth snapshot
pub async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AuthSnapshot>, ApiError> {
    let token = extract_token(&headers, &state.config.auth.cookie_name);
    let snapshot =
        resolve_snapshot(state.identity.as_ref(), state.store.as_ref(), token.as_deref()).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    #[serde(default)]
    pub required_role: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    pub location: String,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub allowed: bool,
    pub decision: AccessDecision,
    pub redirect: Option<RedirectResponse>,
}

/// Access decision for a page, for client-side guards
pub async fn access(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AccessQuery>,
) -> Result<Json<AccessResponse>, ApiError> {
    let required = match query.required_role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(role) => Some(
            role.parse::<Role>()
                .map_err(|e| ApiError::validation_field("required_role", e))?,
        ),
    };
    let from = query
        .from
        .unwrap_or_else(|| state.config.access.dashboard_path.clone());

    let token = extract_token(&headers, &state.config.auth.cookie_name);
    let snapshot =
        resolve_snapshot(state.identity.as_ref(), state.store.as_ref(), token.as_deref()).await?;
    let decision = decide(&snapshot, required, &from);

    let redirect = decision
        .redirect(&state.config.access.paths())
        .map(|r| RedirectResponse {
            location: r.location(),
            path: r.path,
            state: r.state,
        });

    Ok(Json(AccessResponse {
        allowed: decision.is_allowed(),
        decision,
        redirect,
    }))
}

/// Ensure a super admin account exists.
///
/// Creates the account with a confirmed email, an active profile and the
/// `super_admin` role. Returns `false` when an account with this email
/// already exists, in which case nothing is changed.
pub async fn ensure_super_admin(
    identity: &dyn IdentityProvider,
    store: &dyn ProfileStore,
    email: &str,
    password: &str,
    full_name: &str,
) -> Result<bool> {
    validate_email(email).map_err(anyhow::Error::msg)?;
    validate_password(password).map_err(anyhow::Error::msg)?;
    validate_full_name(full_name).map_err(anyhow::Error::msg)?;

    let email = email.trim();
    let existing = identity
        .list_users()
        .await
        .context("Failed to list accounts")?
        .into_iter()
        .find(|a| {
            a.email
                .as_deref()
                .map(|e| e.eq_ignore_ascii_case(email))
                .unwrap_or(false)
        });

    if let Some(account) = existing {
        tracing::info!(user_id = %account.id, "Super admin account already exists");
        return Ok(false);
    }

    let account = identity
        .create_user(NewAccount {
            email: email.to_string(),
            password: password.to_string(),
            phone: None,
            full_name: Some(full_name.trim().to_string()),
            email_confirmed: true,
        })
        .await
        .context("Failed to create super admin account")?;

    store
        .upsert_profile(&NewProfile {
            id: account.id.clone(),
            status: ProfileStatus::Active,
            full_name: Some(full_name.trim().to_string()),
            email: account.email.clone(),
        })
        .await
        .context("Failed to create super admin profile")?;

    store
        .assign_role(&account.id, Role::SuperAdmin)
        .await
        .context("Failed to assign super_admin role")?;

    audit_log(
        store,
        actions::AUTH_BOOTSTRAP,
        resource_types::ADMIN,
        Some(&account.id),
        None,
        None,
    )
    .await;

    tracing::info!(user_id = %account.id, email = %email, "Created super admin account");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_user, test_state};
    use axum::{
        body::Body,
        http::{header, Request},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(
        state: Arc<AppState>,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = crate::api::create_router(state)
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, headers, json)
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "ivalora_session=from-cookie".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "ivalora_session").as_deref(),
            Some("from-cookie")
        );

        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "ivalora_session").as_deref(),
            Some("from-header")
        );

        assert_eq!(extract_token(&HeaderMap::new(), "ivalora_session"), None);
    }

    #[tokio::test]
    async fn test_signup_then_login_sets_cookie() {
        let state = test_state().await;

        let (status, _, body) = call(
            state.clone(),
            "POST",
            "/api/auth/signup",
            None,
            Some(serde_json::json!({
                "email": "new@example.com",
                "password": "password123",
                "full_name": "New Customer"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let user_id = body["id"].as_str().unwrap().to_string();
        assert_eq!(body["full_name"], "New Customer");

        let profile = state.store.get_profile(&user_id).await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Pending);
        assert!(state.store.roles_for(&user_id).await.unwrap().is_empty());

        let (status, headers, body) = call(
            state,
            "POST",
            "/api/auth/login",
            None,
            Some(serde_json::json!({"email": "new@example.com", "password": "password123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some());
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("ivalora_session="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_signup_validation() {
        let state = test_state().await;
        let (status, _, body) = call(
            state,
            "POST",
            "/api/auth/signup",
            None,
            Some(serde_json::json!({
                "email": "bad",
                "password": "short",
                "full_name": ""
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert!(body["details"]["email"].is_array());
        assert!(body["details"]["password"].is_array());
        assert!(body["details"]["full_name"].is_array());
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let state = test_state().await;
        seed_user(&state, "u@example.com", ProfileStatus::Active, None).await;

        let (status, _, body) = call(
            state,
            "POST",
            "/api/auth/login",
            None,
            Some(serde_json::json!({"email": "u@example.com", "password": "wrong-password"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid login credentials");
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let state = test_state().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = crate::api::create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_snapshot() {
        let state = test_state().await;
        let user = seed_user(&state, "s@example.com", ProfileStatus::Active, Some(Role::Employee)).await;

        let (status, _, body) = call(state.clone(), "GET", "/api/auth/session", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["session"].is_null());
        assert_eq!(body["is_loading"], false);

        let (status, _, body) =
            call(state, "GET", "/api/auth/session", Some(&user.token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["user_id"], user.id.as_str());
        assert_eq!(body["status"], "active");
        assert_eq!(body["role"], "employee");
    }

    #[tokio::test]
    async fn test_access_endpoint() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com", ProfileStatus::Active, Some(Role::Admin)).await;

        let (status, _, body) = call(
            state.clone(),
            "GET",
            "/api/auth/access?required_role=super_admin&from=/customers",
            Some(&user.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], false);
        assert_eq!(body["decision"]["outcome"], "insufficient_role");
        assert_eq!(body["redirect"]["path"], "/dashboard");

        let (_, _, body) = call(
            state.clone(),
            "GET",
            "/api/auth/access?from=/inventory",
            None,
            None,
        )
        .await;
        assert_eq!(body["decision"]["outcome"], "login");
        assert_eq!(body["redirect"]["location"], "/login?from=%2Finventory");

        let (status, _, _) = call(
            state,
            "GET",
            "/api/auth/access?required_role=owner",
            Some(&user.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let state = test_state().await;
        let user = seed_user(&state, "l@example.com", ProfileStatus::Active, None).await;

        let (status, _, _) = call(state.clone(), "POST", "/api/auth/logout", Some(&user.token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, _, body) = call(state, "GET", "/api/auth/session", Some(&user.token), None).await;
        assert!(body["session"].is_null());
    }

    #[tokio::test]
    async fn test_ensure_super_admin_is_idempotent() {
        let state = test_state().await;

        let created = ensure_super_admin(
            state.identity.as_ref(),
            state.store.as_ref(),
            "root@example.com",
            "bootstrap-pass",
            "Root",
        )
        .await
        .unwrap();
        assert!(created);

        let again = ensure_super_admin(
            state.identity.as_ref(),
            state.store.as_ref(),
            "ROOT@example.com",
            "bootstrap-pass",
            "Root",
        )
        .await
        .unwrap();
        assert!(!again);

        let grant = state
            .identity
            .sign_in("root@example.com", "bootstrap-pass")
            .await
            .unwrap();
        let roles = state.store.roles_for(&grant.user.id).await.unwrap();
        assert_eq!(roles, vec![Role::SuperAdmin]);
        let profile = state.store.get_profile(&grant.user.id).await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Active);
    }

    #[tokio::test]
    async fn test_ensure_super_admin_rejects_weak_password() {
        let state = test_state().await;
        let result = ensure_super_admin(
            state.identity.as_ref(),
            state.store.as_ref(),
            "root@example.com",
            "short",
            "Root",
        )
        .await;
        assert!(result.is_err());
    }
}
