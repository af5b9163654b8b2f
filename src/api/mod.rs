mod audit;
pub mod auth;
pub mod error;
mod functions;
pub mod rate_limit;
mod validation;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::access::guard;
use crate::config::CorsConfig;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential-accepting endpoints share the strict tier
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/signup", post(auth::signup))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ))
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::session))
        .route("/access", get(auth::access));

    let function_routes = Router::new()
        .route(
            "/manage-admins",
            post(functions::admins::manage_admins).options(functions::preflight),
        )
        .route(
            "/manage-customers",
            post(functions::customers::manage_customers).options(functions::preflight),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    // Dashboard SPA, gated by the route guard on protected prefixes
    let static_dir = &state.config.server.static_dir;
    let serve_static =
        ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));
    let pages = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::route_guard,
        ))
        .service(serve_static);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/functions/v1", function_routes)
        .fallback_service(pages)
        .layer(cors_layer(&state.config.cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
}

async fn health_check() -> &'static str {
    "OK"
}
