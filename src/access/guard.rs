//! Route guard for dashboard pages.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{decide, resolve_snapshot, AccessDecision};
use crate::api::auth::extract_token;
use crate::api::error::ApiError;
use crate::AppState;

/// Gate page loads on the configured protected prefixes.
///
/// Allowed requests pass through; everything else gets a `303 See Other`.
/// When the redirect would point back at the requested page (an
/// insufficient role on the dashboard itself) the guard answers 403.
pub async fn route_guard(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let access = &state.config.access;
    let path = request.uri().path().to_string();

    if path == access.login_path || path == access.pending_path {
        return next.run(request).await;
    }

    let Some(route) = access.route_for(&path) else {
        return next.run(request).await;
    };
    let required = route.required_role;

    let token = extract_token(request.headers(), &state.config.auth.cookie_name);
    let snapshot = match resolve_snapshot(
        state.identity.as_ref(),
        state.store.as_ref(),
        token.as_deref(),
    )
    .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Failed to resolve session for route guard");
            return ApiError::from(e).into_response();
        }
    };

    let from = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let decision = decide(&snapshot, required, &from);

    let Some(redirect) = decision.redirect(&access.paths()) else {
        return next.run(request).await;
    };

    if redirect.path == path {
        tracing::debug!(path = %path, "Access denied on redirect target");
        let required = match decision {
            AccessDecision::InsufficientRole { required } => required.to_string(),
            _ => "access".to_string(),
        };
        return ApiError::forbidden(format!("This page requires the {} role", required))
            .into_response();
    }

    tracing::debug!(
        path = %path,
        decision = ?decision,
        location = %redirect.location(),
        "Redirecting page load"
    );
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, redirect.location())],
    )
        .into_response()
}
